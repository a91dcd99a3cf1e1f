//! Scoring a configuration against the whole scenario set.
//!
//! Each active scenario is evaluated as an independent task on a bounded
//! rayon pool. A task walks the time steps in order, updates the trigger
//! state of every placed sensor, and stops at the first step where the
//! inference strategy succeeds. Results come back as a vector indexed by
//! scenario ordinal and are written into the configuration on the calling
//! thread once every task has joined.

use std::collections::BTreeMap;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, warn};

use crate::configuration::Configuration;
use crate::detection::{triggered_directly, DetectionCache};
use crate::error::{EngineError, Result};
use crate::grid::TimeStep;
use crate::inference::{InferenceResult, InferenceStrategy};
use crate::monitor::SearchMonitor;
use crate::provider::ScenarioDataProvider;
use crate::scenario::{Scenario, ScenarioSet};
use crate::sensor::Sensor;

/// Metric charged for a scenario no time step could infer.
pub const NO_DETECTION_PENALTY: f64 = 1_000_000.0;

/// What one scenario task produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOutcome {
    pub scenario: String,
    /// Real time of the first inferring step, if any.
    pub detection_time: Option<f64>,
    pub inference: InferenceResult,
    pub triggered: Vec<bool>,
}

/// Turns a scenario outcome into the metric that is weighted and summed.
/// Lower is better.
pub trait ObjectiveStrategy: Sync {
    fn metric(&self, outcome: &ScenarioOutcome) -> f64;
}

/// Minimize expected time to detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeToDetection;

impl ObjectiveStrategy for TimeToDetection {
    fn metric(&self, outcome: &ScenarioOutcome) -> f64 {
        outcome.detection_time.unwrap_or(NO_DETECTION_PENALTY)
    }
}

/// Maximize covered area: `-goodness` when inferred, `+1` otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coverage;

impl ObjectiveStrategy for Coverage {
    fn metric(&self, outcome: &ScenarioOutcome) -> f64 {
        match (outcome.inference.inferred, outcome.inference.goodness) {
            (true, Some(g)) => -g,
            _ => 1.0,
        }
    }
}

/// Worker pool for scenario tasks: `max_threads`, or all cores but one.
pub fn build_pool(max_threads: Option<usize>) -> Result<ThreadPool> {
    let threads = max_threads
        .unwrap_or_else(|| rayon::current_num_threads().saturating_sub(1))
        .max(1);
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("dream-eval-{i}"))
        .build()?)
}

pub struct Evaluator<'a, I, O, P: ?Sized> {
    set: &'a ScenarioSet,
    provider: &'a P,
    cache: Option<&'a DetectionCache>,
    pool: &'a ThreadPool,
    monitor: &'a dyn SearchMonitor,
    inference: I,
    objective: O,
    specific_types: BTreeMap<String, String>,
}

impl<'a, I, O, P> Evaluator<'a, I, O, P>
where
    I: InferenceStrategy,
    O: ObjectiveStrategy,
    P: ScenarioDataProvider + ?Sized,
{
    pub fn new(
        set: &'a ScenarioSet,
        provider: &'a P,
        cache: Option<&'a DetectionCache>,
        pool: &'a ThreadPool,
        monitor: &'a dyn SearchMonitor,
        inference: I,
        objective: O,
    ) -> Self {
        let specific_types = set
            .sensor_settings
            .iter()
            .map(|(t, s)| (t.clone(), s.specific_type()))
            .collect();
        Self {
            set,
            provider,
            cache,
            pool,
            monitor,
            inference,
            objective,
            specific_types,
        }
    }

    pub fn set(&self) -> &ScenarioSet {
        self.set
    }

    pub fn inference(&self) -> &I {
        &self.inference
    }

    pub fn monitor(&self) -> &dyn SearchMonitor {
        self.monitor
    }

    /// Score `config`, replacing its per-scenario results. Returns the sum of
    /// `metric x normalized weight` over scenarios that evaluated cleanly.
    pub fn evaluate(&self, config: &mut Configuration) -> f64 {
        config.clear_results();
        let scenarios: Vec<&Scenario> = self.set.active_scenarios().collect();
        let sensors = config.sensors();

        let outcomes: Vec<Option<ScenarioOutcome>> = self.pool.install(|| {
            scenarios
                .par_iter()
                .map(|scenario| {
                    let outcome = match self.evaluate_scenario(sensors, &scenario.id) {
                        Ok(o) => Some(o),
                        Err(e) => {
                            warn!(
                                scenario = %scenario.id,
                                error = %e,
                                "scenario evaluation failed"
                            );
                            None
                        }
                    };
                    self.monitor.scenario_evaluated(&scenario.id);
                    outcome
                })
                .collect()
        });

        let mut total = 0.0;
        for outcome in outcomes.into_iter().flatten() {
            let weight = self.set.normalized_weight(&outcome.scenario);
            let contribution = self.objective.metric(&outcome) * weight;
            total += contribution;
            config
                .objective_values
                .insert(outcome.scenario.clone(), contribution);
            if let Some(t) = outcome.detection_time {
                config.time_to_detection.insert(outcome.scenario.clone(), t);
            }
            config
                .inference_results
                .insert(outcome.scenario.clone(), outcome.inference);
            config.triggered.insert(outcome.scenario, outcome.triggered);
        }
        debug!(
            value = total,
            detected = config.scenarios_detected(),
            sensors = config.len(),
            "configuration evaluated"
        );
        total
    }

    /// Walk the time steps of one scenario until inference succeeds.
    ///
    /// Trigger state is local to the call and sticky: once a sensor trips it
    /// stays tripped for later steps.
    pub fn evaluate_scenario(&self, sensors: &[Sensor], scenario: &str) -> Result<ScenarioOutcome> {
        let steps = &self.set.node_structure.time_steps;
        let baseline = steps.first().ok_or(EngineError::NoTimeSteps)?;
        let mut triggered = vec![false; sensors.len()];
        let mut inference = InferenceResult::not_inferred();
        let mut detection_time = None;

        for step in steps {
            for (slot, sensor) in triggered.iter_mut().zip(sensors) {
                if !*slot {
                    *slot = self.sensor_triggered(sensor, scenario, step, baseline)?;
                }
            }
            inference = self.inference.infer(sensors, &triggered);
            if inference.inferred {
                detection_time = Some(step.real_time);
                break;
            }
        }
        Ok(ScenarioOutcome {
            scenario: scenario.to_string(),
            detection_time,
            inference,
            triggered,
        })
    }

    fn sensor_triggered(
        &self,
        sensor: &Sensor,
        scenario: &str,
        step: &TimeStep,
        baseline: &TimeStep,
    ) -> Result<bool> {
        if !self.set.in_cloud(sensor) {
            return Ok(false);
        }
        let specific = self
            .specific_types
            .get(&sensor.sensor_type)
            .ok_or_else(|| EngineError::UnknownSensorType(sensor.sensor_type.clone()))?;
        if let Some(cache) = self.cache.filter(|c| c.contains_type(specific)) {
            return cache
                .lookup(specific, scenario, sensor.node, step)
                .ok_or_else(|| EngineError::UnknownScenario(scenario.to_string()));
        }
        let setting = self.set.setting(&sensor.sensor_type)?;
        triggered_directly(self.provider, scenario, setting, step, baseline, sensor.node)
    }
}
