//! Precomputed earliest-trigger table.
//!
//! For each sensor-type rule (keyed by [`SensorSetting::specific_type`]) the
//! cache holds, per scenario, the index of the first time step at which each
//! node trips the trigger predicate. Nodes that never trigger have no entry.
//! The cache is owned by a search session and read-only once built.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::grid::{NodeNumber, TimeStep};
use crate::monitor::SearchMonitor;
use crate::provider::ScenarioDataProvider;
use crate::scenario::ScenarioSet;
use crate::sensor::SensorSetting;

type NodeTriggers = HashMap<NodeNumber, u32>;

/// Outcome of building one sensor type's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBuild {
    Complete,
    AlreadyBuilt,
    Cancelled,
}

#[derive(Debug, Default, Clone)]
pub struct DetectionCache {
    entries: HashMap<String, HashMap<String, NodeTriggers>>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_type(&self, specific_type: &str) -> bool {
        self.entries.contains_key(specific_type)
    }

    /// Drop a type's entries so the next build recomputes them.
    pub fn invalidate(&mut self, specific_type: &str) {
        self.entries.remove(specific_type);
    }

    /// Scan every active scenario once and record each node's earliest
    /// trigger step for `setting`.
    ///
    /// Scenarios are processed in parallel on the current rayon pool. The
    /// monitor is polled before each scenario; on cancellation nothing is
    /// recorded for this type. A scenario whose data cannot be read is
    /// logged and left empty (never triggers).
    pub fn build<P>(
        &mut self,
        set: &ScenarioSet,
        setting: &SensorSetting,
        provider: &P,
        monitor: &dyn SearchMonitor,
    ) -> CacheBuild
    where
        P: ScenarioDataProvider + ?Sized,
    {
        let specific_type = setting.specific_type();
        if self.contains_type(&specific_type) {
            return CacheBuild::AlreadyBuilt;
        }
        let steps = &set.node_structure.time_steps;
        let scenarios: Vec<&str> = set.active_scenarios().map(|s| s.id.as_str()).collect();
        info!(
            specific_type = %specific_type,
            scenarios = scenarios.len(),
            time_steps = steps.len(),
            "building detection cache"
        );

        // Outer None: cancelled. Inner None: the scenario could not be read.
        let scanned: Vec<Option<(String, Option<NodeTriggers>)>> = scenarios
            .par_iter()
            .map(|scenario| {
                if monitor.is_cancelled() {
                    return None;
                }
                let triggers = match scan_scenario(provider, scenario, setting, steps) {
                    Ok(t) => Some(t),
                    Err(e) => {
                        warn!(
                            scenario = %scenario,
                            error = %e,
                            "scenario left out of detection cache"
                        );
                        None
                    }
                };
                Some((scenario.to_string(), triggers))
            })
            .collect();

        if monitor.is_cancelled() || scanned.iter().any(Option::is_none) {
            info!(specific_type = %specific_type, "detection cache build cancelled");
            return CacheBuild::Cancelled;
        }

        let by_scenario: HashMap<String, NodeTriggers> = scanned
            .into_iter()
            .flatten()
            .filter_map(|(scenario, triggers)| triggers.map(|t| (scenario, t)))
            .collect();
        debug!(
            specific_type = %specific_type,
            triggering = by_scenario.values().map(HashMap::len).sum::<usize>(),
            "detection cache built"
        );
        self.entries.insert(specific_type, by_scenario);
        CacheBuild::Complete
    }

    /// Earliest trigger step index, if the node ever triggers.
    pub fn earliest(&self, specific_type: &str, scenario: &str, node: NodeNumber) -> Option<u32> {
        self.entries
            .get(specific_type)?
            .get(scenario)?
            .get(&node)
            .copied()
    }

    /// Whether `scenario` was scanned for this type. Scenarios whose data
    /// could not be read have no entry at all.
    pub fn covers(&self, specific_type: &str, scenario: &str) -> bool {
        self.entries
            .get(specific_type)
            .is_some_and(|by_scenario| by_scenario.contains_key(scenario))
    }

    /// Like [`is_triggered`](Self::is_triggered), but `None` when the
    /// scenario is not covered.
    pub fn lookup(
        &self,
        specific_type: &str,
        scenario: &str,
        node: NodeNumber,
        step: &TimeStep,
    ) -> Option<bool> {
        let nodes = self.entries.get(specific_type)?.get(scenario)?;
        Some(nodes.get(&node).is_some_and(|first| step.index >= *first))
    }

    /// Whether the node has triggered by `step`.
    pub fn is_triggered(
        &self,
        specific_type: &str,
        scenario: &str,
        node: NodeNumber,
        step: &TimeStep,
    ) -> bool {
        self.earliest(specific_type, scenario, node)
            .is_some_and(|first| step.index >= first)
    }

    /// Union over scenarios of nodes that ever trigger.
    pub fn triggering_nodes(&self, specific_type: &str) -> BTreeSet<NodeNumber> {
        self.entries
            .get(specific_type)
            .map(|by_scenario| {
                by_scenario
                    .values()
                    .flat_map(|nodes| nodes.keys().copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Triggering nodes whose per-scenario earliest-trigger vector is not
    /// dominated by another node's. Never triggering counts as +inf.
    pub fn pareto_optimal_nodes(&self, specific_type: &str) -> BTreeSet<NodeNumber> {
        let Some(by_scenario) = self.entries.get(specific_type) else {
            return BTreeSet::new();
        };
        let scenarios: Vec<&String> = by_scenario.keys().collect();
        let nodes: Vec<NodeNumber> = self.triggering_nodes(specific_type).into_iter().collect();
        let vectors: Vec<Vec<u32>> = nodes
            .iter()
            .map(|node| {
                scenarios
                    .iter()
                    .map(|s| {
                        by_scenario[*s]
                            .get(node)
                            .copied()
                            .unwrap_or(u32::MAX)
                    })
                    .collect()
            })
            .collect();

        let dominates = |a: &[u32], b: &[u32]| {
            a.iter().zip(b).all(|(x, y)| x <= y) && a.iter().zip(b).any(|(x, y)| x < y)
        };
        nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                !vectors
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != *i && dominates(other, &vectors[*i]))
            })
            .map(|(_, n)| *n)
            .collect()
    }

    /// Placeable nodes per sensor type, derived from cached triggers.
    pub fn clouds(
        &self,
        set: &ScenarioSet,
        pareto: bool,
    ) -> BTreeMap<String, BTreeSet<NodeNumber>> {
        set.sensor_settings
            .iter()
            .map(|(sensor_type, setting)| {
                let specific = setting.specific_type();
                let nodes = if pareto {
                    self.pareto_optimal_nodes(&specific)
                } else {
                    self.triggering_nodes(&specific)
                };
                (sensor_type.clone(), nodes)
            })
            .collect()
    }
}

fn scan_scenario<P>(
    provider: &P,
    scenario: &str,
    setting: &SensorSetting,
    steps: &[TimeStep],
) -> Result<NodeTriggers>
where
    P: ScenarioDataProvider + ?Sized,
{
    let mut triggers = NodeTriggers::new();
    let Some(first) = steps.first() else {
        return Ok(triggers);
    };
    let baseline = if setting.trigger.uses_baseline() {
        provider.all_values_at(scenario, first, &setting.data_type)?
    } else {
        None
    };
    for step in steps {
        let Some(values) = provider.all_values_at(scenario, step, &setting.data_type)? else {
            continue;
        };
        for (idx, value) in values.iter().enumerate() {
            let node = idx as NodeNumber + 1;
            if triggers.contains_key(&node) {
                continue;
            }
            let base = baseline.as_ref().and_then(|b| b.get(idx)).copied();
            if setting.is_triggered(Some(*value), base) {
                triggers.insert(node, step.index);
            }
        }
    }
    Ok(triggers)
}

/// Direct provider query: has `node` triggered at `step`?
pub fn triggered_directly<P>(
    provider: &P,
    scenario: &str,
    setting: &SensorSetting,
    step: &TimeStep,
    baseline_step: &TimeStep,
    node: NodeNumber,
) -> Result<bool>
where
    P: ScenarioDataProvider + ?Sized,
{
    let current = provider.value_at(scenario, step, &setting.data_type, node)?;
    let baseline = if setting.trigger.uses_baseline() {
        provider.value_at(scenario, baseline_step, &setting.data_type, node)?
    } else {
        None
    };
    Ok(setting.is_triggered(current, baseline))
}
