//! Scenario set: the grid, the weighted scenarios, sensor settings and the
//! placement constraints every candidate must respect.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::grid::{Ijk, NodeNumber, NodeStructure};
use crate::sensor::{Sensor, SensorSetting};

/// One simulated realization with its likelihood weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Scenario {
    pub fn new(id: &str, weight: f64) -> Self {
        Self {
            id: id.to_string(),
            weight,
        }
    }

    /// Scenarios with weight <= 0 are skipped by every evaluation.
    pub fn is_active(&self) -> bool {
        self.weight > 0.0
    }
}

fn default_weight() -> f64 {
    1.0
}
fn default_cost_constraint() -> f64 {
    f64::MAX
}
fn default_max_wells() -> u32 {
    u32::MAX
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSet {
    pub node_structure: NodeStructure,
    pub scenarios: Vec<Scenario>,
    /// Keyed by sensor type name.
    pub sensor_settings: BTreeMap<String, SensorSetting>,
    #[serde(default = "default_cost_constraint")]
    pub cost_constraint: f64,
    #[serde(default = "default_max_wells")]
    pub max_wells: u32,
    /// Preferred location for new sensors, used whenever it is legal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_point: Option<Ijk>,
    /// Total triggered sensors (of required types) that alone suffice for
    /// inference; `<= 0` disables the aggregate rule.
    #[serde(default)]
    pub overall_min_required: i32,
}

impl ScenarioSet {
    pub fn new(node_structure: NodeStructure, scenarios: Vec<Scenario>) -> Self {
        Self {
            node_structure,
            scenarios,
            sensor_settings: BTreeMap::new(),
            cost_constraint: default_cost_constraint(),
            max_wells: default_max_wells(),
            add_point: None,
            overall_min_required: 0,
        }
    }

    pub fn with_setting(mut self, sensor_type: &str, setting: SensorSetting) -> Self {
        self.sensor_settings.insert(sensor_type.to_string(), setting);
        self
    }

    /// Rejects sets a search cannot run against.
    pub fn validate(&self) -> Result<()> {
        if self.node_structure.time_steps.is_empty() {
            return Err(EngineError::NoTimeSteps);
        }
        if !self.scenarios.iter().any(Scenario::is_active) {
            return Err(EngineError::EmptyScenarioSet);
        }
        if self.sensor_settings.is_empty() {
            return Err(EngineError::InvalidParams("no sensor settings".into()));
        }
        let d = self.node_structure.dimensions;
        if d.i == 0 || d.j == 0 || d.k == 0 {
            return Err(EngineError::InvalidParams(format!(
                "grid dimensions must be positive, got {}x{}x{}",
                d.i, d.j, d.k
            )));
        }
        let total = self.node_structure.total_nodes();
        for (sensor_type, setting) in &self.sensor_settings {
            let outside = setting
                .valid_nodes
                .iter()
                .flatten()
                .find(|n| !(1..=total).contains(*n));
            if let Some(node) = outside {
                return Err(EngineError::InvalidParams(format!(
                    "{sensor_type}: valid node {node} is outside 1..={total}"
                )));
            }
        }
        Ok(())
    }

    pub fn active_scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter().filter(|s| s.is_active())
    }

    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn total_weight(&self) -> f64 {
        self.active_scenarios().map(|s| s.weight).sum()
    }

    /// `w / Σw` over active scenarios, 0 for inactive or unknown ones.
    pub fn normalized_weight(&self, id: &str) -> f64 {
        let total = self.total_weight();
        match self.scenario(id) {
            Some(s) if s.is_active() && total > 0.0 => s.weight / total,
            _ => 0.0,
        }
    }

    pub fn sensor_types(&self) -> impl Iterator<Item = &String> {
        self.sensor_settings.keys()
    }

    pub fn setting(&self, sensor_type: &str) -> Result<&SensorSetting> {
        self.sensor_settings
            .get(sensor_type)
            .ok_or_else(|| EngineError::UnknownSensorType(sensor_type.to_string()))
    }

    pub fn sensor_cost(&self, sensor_type: &str) -> f64 {
        self.sensor_settings
            .get(sensor_type)
            .map(|s| s.cost)
            .unwrap_or(0.0)
    }

    pub fn cost_of(&self, sensors: &[Sensor]) -> f64 {
        sensors.iter().map(|s| self.sensor_cost(&s.sensor_type)).sum()
    }

    pub fn wells_of<'a>(
        &self,
        sensors: impl IntoIterator<Item = &'a Sensor>,
    ) -> BTreeSet<(u32, u32)> {
        sensors
            .into_iter()
            .map(|s| self.node_structure.ijk(s.node).column())
            .collect()
    }

    /// Cost and well-count constraints.
    pub fn is_affordable(&self, sensors: &[Sensor]) -> bool {
        self.cost_of(sensors) <= self.cost_constraint
            && self.wells_of(sensors).len() as u64 <= self.max_wells as u64
    }

    pub fn add_point_node(&self) -> Option<NodeNumber> {
        self.add_point
            .filter(|p| self.node_structure.contains(*p))
            .map(|p| self.node_structure.node_number(p))
    }

    /// Placeable nodes for a type; `None` means every grid node.
    pub fn cloud(&self, sensor_type: &str) -> Option<&BTreeSet<NodeNumber>> {
        self.sensor_settings
            .get(sensor_type)
            .and_then(|s| s.valid_nodes.as_ref())
    }

    pub fn in_cloud(&self, sensor: &Sensor) -> bool {
        match self.sensor_settings.get(&sensor.sensor_type) {
            None => false,
            Some(setting) => match &setting.valid_nodes {
                Some(nodes) => nodes.contains(&sensor.node),
                None => sensor.node >= 1 && sensor.node <= self.node_structure.total_nodes(),
            },
        }
    }

    /// Union of every type's placeable nodes.
    pub fn all_cloud_nodes(&self) -> BTreeSet<NodeNumber> {
        let mut out = BTreeSet::new();
        for setting in self.sensor_settings.values() {
            match &setting.valid_nodes {
                Some(nodes) => out.extend(nodes.iter().copied()),
                None => return (1..=self.node_structure.total_nodes()).collect(),
            }
        }
        out
    }

    /// Nodes where a sensor of `sensor_type` could legally go.
    ///
    /// When `replacing` is set, the sensor at that index is taken out of the
    /// placement first (its cost and its well no longer count). The result is
    /// in the cloud, unoccupied by the same type, affordable, and either
    /// inside an existing well or allowed by the well limit.
    pub fn valid_nodes(
        &self,
        sensor_type: &str,
        sensors: &[Sensor],
        replacing: Option<usize>,
    ) -> Vec<NodeNumber> {
        let Some(setting) = self.sensor_settings.get(sensor_type) else {
            return Vec::new();
        };
        let others = || {
            sensors
                .iter()
                .enumerate()
                .filter(move |(idx, _)| Some(*idx) != replacing)
                .map(|(_, s)| s)
        };
        let base_cost: f64 = others().map(|s| self.sensor_cost(&s.sensor_type)).sum();
        if base_cost + setting.cost > self.cost_constraint {
            return Vec::new();
        }
        let occupied: BTreeSet<NodeNumber> = others()
            .filter(|s| s.sensor_type == sensor_type)
            .map(|s| s.node)
            .collect();
        let wells = self.wells_of(others());
        let can_open_well = (wells.len() as u64) < self.max_wells as u64;

        let grid = &self.node_structure;
        let candidate_ok = |node: NodeNumber| {
            if occupied.contains(&node) {
                return false;
            }
            can_open_well || wells.contains(&grid.ijk(node).column())
        };
        match &setting.valid_nodes {
            Some(nodes) => nodes.iter().copied().filter(|n| candidate_ok(*n)).collect(),
            None => (1..=grid.total_nodes()).filter(|n| candidate_ok(*n)).collect(),
        }
    }

    /// Types the sensor at `index` could switch to without breaking the
    /// cost constraint.
    pub fn affordable_switch_types(&self, sensors: &[Sensor], index: usize) -> Vec<String> {
        let Some(current) = sensors.get(index) else {
            return Vec::new();
        };
        let remaining =
            self.cost_constraint - (self.cost_of(sensors) - self.sensor_cost(&current.sensor_type));
        self.sensor_settings
            .iter()
            .filter(|(_, s)| s.cost <= remaining)
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Fill in missing `valid_nodes` from a per-type cloud.
    pub fn resolve_clouds(&mut self, clouds: &BTreeMap<String, BTreeSet<NodeNumber>>) {
        for (sensor_type, setting) in self.sensor_settings.iter_mut() {
            if setting.valid_nodes.is_none() {
                if let Some(nodes) = clouds.get(sensor_type) {
                    setting.valid_nodes = Some(nodes.clone());
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grid::TimeStep;
    use crate::sensor::{DeltaType, Trigger};

    /// 3x3x2 grid, two time steps, two sensor types and two scenarios.
    pub(crate) fn small_set() -> ScenarioSet {
        let grid = NodeStructure::new(
            Ijk::new(3, 3, 2),
            vec![TimeStep::new(0, 0.0, 0.0), TimeStep::new(1, 1.0, 10.0)],
            vec!["pressure".into(), "co2".into()],
        );
        let mut pressure =
            SensorSetting::new("pressure", Trigger::AbsoluteChange, DeltaType::Increase, 1.0);
        pressure.cost = 2.0;
        let co2 = SensorSetting::new("co2", Trigger::AboveThreshold, DeltaType::Both, 0.5);
        ScenarioSet::new(grid, vec![Scenario::new("a", 3.0), Scenario::new("b", 1.0)])
            .with_setting("pressure", pressure)
            .with_setting("co2", co2)
    }

    #[test]
    fn normalized_weights_sum_to_one() {
        let mut set = small_set();
        set.scenarios.push(Scenario::new("zero", 0.0));
        assert!((set.normalized_weight("a") - 0.75).abs() < 1e-12);
        assert!((set.normalized_weight("b") - 0.25).abs() < 1e-12);
        assert_eq!(set.normalized_weight("zero"), 0.0);
        assert_eq!(set.active_scenarios().count(), 2);
    }

    #[test]
    fn validate_rejects_all_zero_weights() {
        let mut set = small_set();
        for s in set.scenarios.iter_mut() {
            s.weight = 0.0;
        }
        assert!(matches!(set.validate(), Err(EngineError::EmptyScenarioSet)));
    }

    #[test]
    fn validate_rejects_nodes_outside_grid() {
        let mut set = small_set();
        assert!(set.validate().is_ok());
        if let Some(s) = set.sensor_settings.get_mut("co2") {
            s.valid_nodes = Some([0, 7].into_iter().collect());
        }
        assert!(matches!(set.validate(), Err(EngineError::InvalidParams(_))));
        if let Some(s) = set.sensor_settings.get_mut("co2") {
            s.valid_nodes = Some([7, 19].into_iter().collect());
        }
        assert!(matches!(set.validate(), Err(EngineError::InvalidParams(_))));
    }

    #[test]
    fn validate_rejects_empty_grid() {
        let mut set = small_set();
        set.node_structure.dimensions.j = 0;
        assert!(matches!(set.validate(), Err(EngineError::InvalidParams(_))));
    }

    #[test]
    fn valid_nodes_respect_cost() {
        let mut set = small_set();
        set.cost_constraint = 3.0;
        let sensors = vec![Sensor::new("pressure", 1)];
        assert!(set.valid_nodes("pressure", &sensors, None).is_empty());
        assert_eq!(set.valid_nodes("co2", &sensors, None).len(), 18);
        // Replacing the only sensor frees its cost.
        assert_eq!(set.valid_nodes("pressure", &sensors, Some(0)).len(), 18);
    }

    #[test]
    fn valid_nodes_respect_well_limit() {
        let mut set = small_set();
        set.max_wells = 1;
        let sensors = vec![Sensor::new("pressure", 1)];
        let nodes = set.valid_nodes("co2", &sensors, None);
        // Only column (1,1): node 1 on layer 1, node 10 on layer 2.
        assert_eq!(nodes, vec![1, 10]);
        let pressure = set.valid_nodes("pressure", &sensors, None);
        assert_eq!(pressure, vec![10]);
    }

    #[test]
    fn switch_types_are_affordable() {
        let mut set = small_set();
        set.cost_constraint = 2.0;
        let sensors = vec![Sensor::new("co2", 4), Sensor::new("co2", 5)];
        assert_eq!(set.affordable_switch_types(&sensors, 0), vec!["co2".to_string()]);
    }
}
