//! Exhaustive enumeration of sensor subsets for small search spaces.

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use tracing::{debug, info};

use crate::annealing::{normalized_value, SearchDriver};
use crate::configuration::Configuration;
use crate::inference::{InferenceStrategy, InferenceTest};
use crate::monitor::IterationReport;
use crate::mutation::MutationStrategy;
use crate::objective::ObjectiveStrategy;
use crate::prng::Pcg32;
use crate::provider::ScenarioDataProvider;
use crate::scenario::ScenarioSet;
use crate::sensor::Sensor;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumerationParams {
    /// Seed for the one-time shuffle of the candidate list.
    pub seed: u64,
    /// Stop after this many scored configurations.
    pub cap: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EnumerationResult {
    pub evaluated: u64,
    pub best: Option<Configuration>,
    pub best_value: f64,
    pub cancelled: bool,
}

/// Visit every non-empty subset of `universe` in "choose suffix" order:
/// for `[A, B, C]` that is A, AB, ABC, AC, B, BC, C.
///
/// `keep` is asked before descending into a grown subset; returning false
/// prunes it and everything built on top of it.
pub fn for_each_subset<T: Clone>(
    universe: &[T],
    keep: &mut dyn FnMut(&[T]) -> bool,
    visit: &mut dyn FnMut(&[T]) -> ControlFlow<()>,
) -> ControlFlow<()> {
    let mut chosen = Vec::new();
    walk(&mut chosen, universe, keep, visit)
}

fn walk<T: Clone>(
    chosen: &mut Vec<T>,
    remaining: &[T],
    keep: &mut dyn FnMut(&[T]) -> bool,
    visit: &mut dyn FnMut(&[T]) -> ControlFlow<()>,
) -> ControlFlow<()> {
    if !chosen.is_empty() {
        visit(chosen.as_slice())?;
    }
    for (i, item) in remaining.iter().enumerate() {
        chosen.push(item.clone());
        let flow = if keep(chosen.as_slice()) {
            walk(chosen, &remaining[i + 1..], keep, visit)
        } else {
            ControlFlow::Continue(())
        };
        chosen.pop();
        flow?;
    }
    ControlFlow::Continue(())
}

/// Every legal single placement: each type at each node of its cloud.
pub fn candidate_sensors(set: &ScenarioSet) -> Vec<Sensor> {
    let total = set.node_structure.total_nodes();
    set.sensor_types()
        .flat_map(|t| {
            let nodes: Vec<u32> = match set.cloud(t) {
                Some(cloud) => cloud.iter().copied().collect(),
                None => (1..=total).collect(),
            };
            nodes.into_iter().map(move |n| Sensor::new(t, n))
        })
        .collect()
}

fn counts_of(sensors: &[Sensor]) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for s in sensors {
        *counts.entry(s.sensor_type.clone()).or_insert(0) += 1;
    }
    counts
}

impl<'a, I, O, P, M> SearchDriver<'a, I, O, P, M>
where
    I: InferenceStrategy,
    O: ObjectiveStrategy,
    P: ScenarioDataProvider + ?Sized,
    M: MutationStrategy,
{
    /// Score every placement that satisfies the constraints and could pass
    /// inference. `on_scored` sees each configuration right after evaluation.
    pub fn enumerate(
        &self,
        params: &EnumerationParams,
        mut on_scored: impl FnMut(&Configuration, f64),
    ) -> EnumerationResult {
        let set = self.evaluator().set();
        let monitor = self.evaluator().monitor();
        let test = InferenceTest::from_set(set);
        let inference = self.evaluator().inference();

        let mut universe = candidate_sensors(set);
        Pcg32::new(params.seed, 0).shuffle(&mut universe);
        info!(candidates = universe.len(), cap = ?params.cap, "enumeration started");

        let mut evaluated = 0u64;
        let mut cancelled = false;
        let mut best: Option<Configuration> = None;
        let mut best_value = f64::MAX;
        let mut best_norm = f64::MAX;

        let mut keep = |chosen: &[Sensor]| {
            let cost = set.cost_of(chosen);
            let needed = test.completion_cost(&counts_of(chosen), set);
            cost + needed <= set.cost_constraint
                && set.wells_of(chosen).len() as u64 <= set.max_wells as u64
        };
        let mut visit = |chosen: &[Sensor]| {
            if params.cap.is_some_and(|cap| evaluated >= cap) {
                return ControlFlow::Break(());
            }
            if monitor.is_cancelled() {
                cancelled = true;
                return ControlFlow::Break(());
            }
            if !inference.ready(&counts_of(chosen)) {
                return ControlFlow::Continue(());
            }
            let mut config = Configuration::from_sensors(chosen.iter().cloned());
            let value = self.evaluate(&mut config);
            let norm = normalized_value(value, config.scenarios_detected());
            monitor.iteration(&IterationReport {
                run: 0,
                iteration: evaluated as u32,
                current_value: value,
                new_value: value,
                best_value: if norm < best_norm { value } else { best_value },
                temperature: 0.0,
                scenarios_detected: config.scenarios_detected(),
            });
            debug!(evaluated, value, sensors = config.len(), "enumerated configuration");
            on_scored(&config, value);
            evaluated += 1;
            if norm < best_norm {
                best_norm = norm;
                best_value = value;
                best = Some(config);
            }
            ControlFlow::Continue(())
        };
        let _ = for_each_subset(&universe, &mut keep, &mut visit);

        info!(evaluated, cancelled, best_value, "enumeration finished");
        EnumerationResult {
            evaluated,
            best,
            best_value,
            cancelled,
        }
    }
}
