//! Scenario data access.
//!
//! The engine never reads simulator output itself; whatever owns the files
//! implements [`ScenarioDataProvider`]. [`InMemoryScenarioData`] is the
//! serde-backed implementation used by the JSON entry point and tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::grid::{NodeNumber, TimeStep};

pub trait ScenarioDataProvider: Sync {
    /// Scenario identifiers, in a stable order.
    fn scenarios(&self) -> Vec<String>;

    fn time_steps(&self) -> Vec<TimeStep>;

    /// Point query. `Ok(None)` means the value is unavailable.
    fn value_at(
        &self,
        scenario: &str,
        step: &TimeStep,
        data_type: &str,
        node: NodeNumber,
    ) -> Result<Option<f32>>;

    /// Bulk query, node-ordered (`values[node - 1]`).
    fn all_values_at(
        &self,
        scenario: &str,
        step: &TimeStep,
        data_type: &str,
    ) -> Result<Option<Vec<f32>>>;
}

/// `scenario -> data type -> one node-ordered array per time step`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryScenarioData {
    pub time_steps: Vec<TimeStep>,
    pub values: BTreeMap<String, BTreeMap<String, Vec<Vec<f32>>>>,
}

impl InMemoryScenarioData {
    pub fn new(time_steps: Vec<TimeStep>) -> Self {
        Self {
            time_steps,
            values: BTreeMap::new(),
        }
    }

    /// Store the series for one (scenario, data type); one array per time step.
    pub fn insert(&mut self, scenario: &str, data_type: &str, series: Vec<Vec<f32>>) -> Result<()> {
        if series.len() != self.time_steps.len() {
            return Err(EngineError::Provider(format!(
                "{scenario}/{data_type}: {} arrays for {} time steps",
                series.len(),
                self.time_steps.len()
            )));
        }
        self.values
            .entry(scenario.to_string())
            .or_default()
            .insert(data_type.to_string(), series);
        Ok(())
    }

    fn step_slot(&self, step: &TimeStep) -> Option<usize> {
        self.time_steps.iter().position(|t| t.index == step.index)
    }

    fn series(&self, scenario: &str, data_type: &str) -> Result<Option<&Vec<Vec<f32>>>> {
        let by_type = self
            .values
            .get(scenario)
            .ok_or_else(|| EngineError::UnknownScenario(scenario.to_string()))?;
        Ok(by_type.get(data_type))
    }
}

impl ScenarioDataProvider for InMemoryScenarioData {
    fn scenarios(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn time_steps(&self) -> Vec<TimeStep> {
        self.time_steps.clone()
    }

    fn value_at(
        &self,
        scenario: &str,
        step: &TimeStep,
        data_type: &str,
        node: NodeNumber,
    ) -> Result<Option<f32>> {
        let Some(series) = self.series(scenario, data_type)? else {
            return Ok(None);
        };
        let Some(slot) = self.step_slot(step) else {
            return Ok(None);
        };
        Ok(series
            .get(slot)
            .and_then(|arr| arr.get((node as usize).wrapping_sub(1)))
            .copied())
    }

    fn all_values_at(
        &self,
        scenario: &str,
        step: &TimeStep,
        data_type: &str,
    ) -> Result<Option<Vec<f32>>> {
        let Some(series) = self.series(scenario, data_type)? else {
            return Ok(None);
        };
        Ok(self
            .step_slot(step)
            .and_then(|slot| series.get(slot))
            .cloned())
    }
}
