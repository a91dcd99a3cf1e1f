//! JSON documents for the search entry point.
//!
//! Every optional knob has a serde default, so `{}` is a valid
//! `SearchParams` and a request only needs the scenario set and data.

use serde::{Deserialize, Serialize};

use crate::annealing::AnnealingParams;
use crate::configuration::{Configuration, ConfigurationStats};
use crate::enumeration::EnumerationParams;
use crate::error::{EngineError, Result};
use crate::mutation::PlacementPolicy;
use crate::provider::InMemoryScenarioData;
use crate::scenario::ScenarioSet;
use crate::sensor::Sensor;

// -- Parameters ----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Annealing,
    Enumeration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    #[default]
    Sensor,
    Well,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    #[default]
    TimeToDetection,
    Coverage,
}

fn default_iterations() -> u32 {
    1000
}
fn default_runs() -> u32 {
    1
}
fn default_initial_temperature() -> f64 {
    1.0
}
fn default_cooling_rate() -> f64 {
    0.99
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_runs")]
    pub runs: u32,
    #[serde(default)]
    pub mutation: MutationKind,
    #[serde(default)]
    pub placement_policy: PlacementPolicy,
    #[serde(default)]
    pub objective: ObjectiveKind,
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f64,
    #[serde(default = "default_cooling_rate")]
    pub cooling_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stagnation_rebase: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<usize>,
    #[serde(default = "default_true")]
    pub use_detection_cache: bool,
    #[serde(default)]
    pub pareto_filter: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration_cap: Option<u64>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            seed: 0,
            mode: SearchMode::default(),
            iterations: default_iterations(),
            runs: default_runs(),
            mutation: MutationKind::default(),
            placement_policy: PlacementPolicy::default(),
            objective: ObjectiveKind::default(),
            initial_temperature: default_initial_temperature(),
            cooling_rate: default_cooling_rate(),
            stagnation_rebase: None,
            max_threads: None,
            use_detection_cache: true,
            pareto_filter: false,
            enumeration_cap: None,
        }
    }
}

impl SearchParams {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EngineError::InvalidParams(msg));
        if !(self.cooling_rate > 0.0 && self.cooling_rate <= 1.0) {
            return invalid(format!("cooling_rate must be in (0, 1], got {}", self.cooling_rate));
        }
        if !(self.initial_temperature > 0.0 && self.initial_temperature.is_finite()) {
            return invalid(format!(
                "initial_temperature must be positive, got {}",
                self.initial_temperature
            ));
        }
        if self.runs == 0 {
            return invalid("runs must be at least 1".into());
        }
        if let Some(f) = self.stagnation_rebase {
            if !(f > 0.0 && f <= 1.0) {
                return invalid(format!("stagnation_rebase must be in (0, 1], got {f}"));
            }
        }
        if self.max_threads == Some(0) {
            return invalid("max_threads must be at least 1".into());
        }
        Ok(())
    }

    pub fn annealing(&self) -> AnnealingParams {
        AnnealingParams {
            seed: self.seed,
            iterations: self.iterations,
            initial_temperature: self.initial_temperature,
            cooling_rate: self.cooling_rate,
            stagnation_rebase: self.stagnation_rebase,
        }
    }

    pub fn enumeration(&self) -> EnumerationParams {
        EnumerationParams {
            seed: self.seed,
            cap: self.enumeration_cap,
        }
    }
}

// -- Request / response --------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub params: SearchParams,
    pub scenario_set: ScenarioSet,
    pub data: InMemoryScenarioData,
    /// Starting placement for annealing; empty starts from nothing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial_sensors: Vec<Sensor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: u32,
    pub best_value: f64,
    pub iterations_completed: u32,
    pub cancelled: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub best: Configuration,
    pub best_value: f64,
    pub stats: ConfigurationStats,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<RunSummary>,
    /// Configurations scored by enumeration.
    #[serde(default)]
    pub evaluated: u64,
    #[serde(default)]
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let params: SearchParams = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(params, SearchParams::default());
        assert!(params.use_detection_cache);
        assert_eq!(params.cooling_rate, 0.99);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn enums_use_snake_case() {
        let json = r#"{
            "mode": "enumeration",
            "mutation": "well",
            "placement_policy": "relocate_well",
            "objective": "coverage",
            "enumeration_cap": 50
        }"#;
        let params: SearchParams = serde_json::from_str(json).expect("deserialize");
        assert_eq!(params.mode, SearchMode::Enumeration);
        assert_eq!(params.mutation, MutationKind::Well);
        assert_eq!(params.placement_policy, PlacementPolicy::RelocateWell);
        assert_eq!(params.objective, ObjectiveKind::Coverage);
        assert_eq!(params.enumeration().cap, Some(50));
    }

    #[test]
    fn validate_rejects_bad_schedule() {
        let bad = [
            SearchParams { cooling_rate: 1.5, ..SearchParams::default() },
            SearchParams { cooling_rate: 0.0, ..SearchParams::default() },
            SearchParams { initial_temperature: 0.0, ..SearchParams::default() },
            SearchParams { runs: 0, ..SearchParams::default() },
            SearchParams { stagnation_rebase: Some(2.0), ..SearchParams::default() },
            SearchParams { max_threads: Some(0), ..SearchParams::default() },
        ];
        for params in bad {
            assert!(matches!(params.validate(), Err(EngineError::InvalidParams(_))), "{params:?}");
        }
    }

    #[test]
    fn zero_iterations_is_allowed() {
        let params = SearchParams { iterations: 0, ..SearchParams::default() };
        assert!(params.validate().is_ok());
        assert_eq!(params.annealing().iterations, 0);
    }
}
