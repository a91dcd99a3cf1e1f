//! Candidate solution: a set of placed sensors plus the per-scenario results
//! of its most recent evaluation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::grid::NodeStructure;
use crate::inference::InferenceResult;
use crate::scenario::ScenarioSet;
use crate::sensor::Sensor;

/// Sensors are kept sorted by (type, node) and unique, so two configurations
/// with the same placement have identical sensor lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "StoredConfiguration")]
pub struct Configuration {
    sensors: Vec<Sensor>,
    /// Detection time per detected scenario. Undetected scenarios are absent.
    #[serde(default)]
    pub time_to_detection: BTreeMap<String, f64>,
    /// Weighted objective contribution per evaluated scenario.
    #[serde(default)]
    pub objective_values: BTreeMap<String, f64>,
    #[serde(default)]
    pub inference_results: BTreeMap<String, InferenceResult>,
    /// Final trigger state of each sensor (same order as `sensors`).
    #[serde(default, skip_serializing)]
    pub triggered: BTreeMap<String, Vec<bool>>,
}

/// Wire form of [`Configuration`]; converting re-sorts and dedups the sensors.
#[derive(Deserialize)]
struct StoredConfiguration {
    sensors: Vec<Sensor>,
    #[serde(default)]
    time_to_detection: BTreeMap<String, f64>,
    #[serde(default)]
    objective_values: BTreeMap<String, f64>,
    #[serde(default)]
    inference_results: BTreeMap<String, InferenceResult>,
}

impl From<StoredConfiguration> for Configuration {
    fn from(stored: StoredConfiguration) -> Self {
        let mut config = Self::from_sensors(stored.sensors);
        config.time_to_detection = stored.time_to_detection;
        config.objective_values = stored.objective_values;
        config.inference_results = stored.inference_results;
        config
    }
}

/// Aggregate numbers describing an evaluated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationStats {
    pub sensors: usize,
    pub cost: f64,
    pub wells: usize,
    pub scenarios_detected: usize,
    /// Weighted share of active scenarios that were detected.
    pub weighted_fraction_detected: f64,
    /// Weighted mean detection time over detected scenarios only.
    pub weighted_average_ttd: Option<f64>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sensors(sensors: impl IntoIterator<Item = Sensor>) -> Self {
        let mut sensors: Vec<Sensor> = sensors.into_iter().collect();
        sensors.sort();
        sensors.dedup();
        Self {
            sensors,
            ..Self::default()
        }
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn contains(&self, sensor: &Sensor) -> bool {
        self.sensors.binary_search(sensor).is_ok()
    }

    /// Insert in canonical position. Returns false if already present.
    pub fn add_sensor(&mut self, sensor: Sensor) -> bool {
        match self.sensors.binary_search(&sensor) {
            Ok(_) => false,
            Err(pos) => {
                self.sensors.insert(pos, sensor);
                true
            }
        }
    }

    pub fn remove_sensor(&mut self, index: usize) -> Option<Sensor> {
        (index < self.sensors.len()).then(|| self.sensors.remove(index))
    }

    /// Swap the sensor at `index` for `sensor`. Leaves the configuration
    /// untouched and returns false if `sensor` is already placed.
    pub fn replace_sensor(&mut self, index: usize, sensor: Sensor) -> bool {
        if index >= self.sensors.len() || self.contains(&sensor) {
            return false;
        }
        self.sensors.remove(index);
        self.add_sensor(sensor)
    }

    pub fn same_placement(&self, other: &Configuration) -> bool {
        self.sensors == other.sensors
    }

    pub fn counts_by_type(&self) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for s in &self.sensors {
            *counts.entry(s.sensor_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Distinct (i, j) columns holding at least one sensor.
    pub fn wells(&self, grid: &NodeStructure) -> BTreeSet<(u32, u32)> {
        self.sensors
            .iter()
            .map(|s| grid.ijk(s.node).column())
            .collect()
    }

    /// Indices of the sensors in column `column`.
    pub fn sensors_in_well(&self, grid: &NodeStructure, column: (u32, u32)) -> Vec<usize> {
        self.sensors
            .iter()
            .enumerate()
            .filter(|(_, s)| grid.ijk(s.node).column() == column)
            .map(|(i, _)| i)
            .collect()
    }

    /// Deep copy into `dst`, reusing its allocations.
    ///
    /// Not thread-safe: `dst` must not be under evaluation.
    pub fn copy_into(&self, dst: &mut Configuration) {
        dst.sensors.clone_from(&self.sensors);
        dst.time_to_detection.clone_from(&self.time_to_detection);
        dst.objective_values.clone_from(&self.objective_values);
        dst.inference_results.clone_from(&self.inference_results);
        dst.triggered.clone_from(&self.triggered);
    }

    pub fn clear_results(&mut self) {
        self.time_to_detection.clear();
        self.objective_values.clear();
        self.inference_results.clear();
        self.triggered.clear();
    }

    pub fn scenarios_detected(&self) -> usize {
        self.time_to_detection.len()
    }

    pub fn stats(&self, set: &ScenarioSet) -> ConfigurationStats {
        let mut detected_weight = 0.0;
        let mut weighted_ttd = 0.0;
        for (scenario, ttd) in &self.time_to_detection {
            let w = set.normalized_weight(scenario);
            detected_weight += w;
            weighted_ttd += w * ttd;
        }
        ConfigurationStats {
            sensors: self.sensors.len(),
            cost: set.cost_of(&self.sensors),
            wells: self.wells(&set.node_structure).len(),
            scenarios_detected: self.scenarios_detected(),
            weighted_fraction_detected: detected_weight,
            weighted_average_ttd: (detected_weight > 0.0).then(|| weighted_ttd / detected_weight),
        }
    }

    /// One-line description, stable for identical placements and results.
    pub fn summary(&self, set: &ScenarioSet) -> String {
        let grid = &set.node_structure;
        let mut out = String::new();
        for (i, s) in self.sensors.iter().enumerate() {
            let ijk = grid.ijk(s.node);
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{}@({},{},{})", s.sensor_type, ijk.i, ijk.j, ijk.k);
        }
        let stats = self.stats(set);
        let _ = write!(
            out,
            " | cost {} | wells {} | detected {}/{}",
            stats.cost,
            stats.wells,
            stats.scenarios_detected,
            set.active_scenarios().count()
        );
        if let Some(ttd) = stats.weighted_average_ttd {
            let _ = write!(out, " | avg ttd {ttd:.3}");
        }
        out
    }
}
