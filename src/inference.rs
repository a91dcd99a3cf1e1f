//! Inference: turning per-sensor trigger state into a detected / not
//! detected decision for one scenario at one time step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::grid::NodeNumber;
use crate::scenario::ScenarioSet;
use crate::sensor::Sensor;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub inferred: bool,
    /// Only meaningful when `inferred` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goodness: Option<f64>,
}

impl InferenceResult {
    pub fn not_inferred() -> Self {
        Self {
            inferred: false,
            goodness: None,
        }
    }

    pub fn inferred(goodness: f64) -> Self {
        Self {
            inferred: true,
            goodness: Some(goodness),
        }
    }
}

/// Total and triggered sensor counts per type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeCounts {
    pub total: BTreeMap<String, u32>,
    pub triggered: BTreeMap<String, u32>,
}

impl TypeCounts {
    pub fn tally(sensors: &[Sensor], triggered: &[bool]) -> Self {
        let mut counts = TypeCounts::default();
        for (sensor, hit) in sensors.iter().zip(triggered) {
            *counts.total.entry(sensor.sensor_type.clone()).or_insert(0) += 1;
            if *hit {
                *counts.triggered.entry(sensor.sensor_type.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Minimum triggered sensors per type, plus an optional aggregate minimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceTest {
    pub min_per_type: BTreeMap<String, i32>,
    pub overall_min: i32,
}

impl InferenceTest {
    pub fn from_set(set: &ScenarioSet) -> Self {
        Self {
            min_per_type: set
                .sensor_settings
                .iter()
                .map(|(t, s)| (t.clone(), s.min_required))
                .collect(),
            overall_min: set.overall_min_required,
        }
    }

    /// Every required type (minimum > 0) meets its minimum, or the summed
    /// count over required types reaches `overall_min` when that is positive.
    /// A required type missing from `triggered` fails its minimum.
    pub fn reached(&self, triggered: &BTreeMap<String, u32>) -> bool {
        let mut inferred = true;
        let mut total = 0i64;
        for (sensor_type, &required) in &self.min_per_type {
            if required <= 0 {
                continue;
            }
            match triggered.get(sensor_type) {
                None => inferred = false,
                Some(&count) => {
                    if (count as i64) < required as i64 {
                        inferred = false;
                    }
                    total += count as i64;
                }
            }
        }
        if self.overall_min > 0 && total >= self.overall_min as i64 {
            inferred = true;
        }
        inferred
    }

    /// Mean over placed types of triggered / total.
    pub fn goodness(&self, counts: &TypeCounts) -> f64 {
        if counts.total.is_empty() {
            return 0.0;
        }
        let sum: f64 = counts
            .total
            .iter()
            .map(|(t, &total)| {
                let hit = counts.triggered.get(t).copied().unwrap_or(0);
                hit as f64 / total as f64
            })
            .sum();
        sum / counts.total.len() as f64
    }

    /// Cheapest extra cost needed before placed counts could pass the test.
    pub fn completion_cost(&self, placed: &BTreeMap<String, u32>, set: &ScenarioSet) -> f64 {
        let required = || self.min_per_type.iter().filter(|(_, m)| **m > 0);
        let per_type: f64 = required()
            .map(|(t, &m)| {
                let have = placed.get(t).copied().unwrap_or(0) as i64;
                (m as i64 - have).max(0) as f64 * set.sensor_cost(t)
            })
            .sum();
        if self.overall_min <= 0 {
            return per_type;
        }
        let have: i64 = required()
            .map(|(t, _)| placed.get(t).copied().unwrap_or(0) as i64)
            .sum();
        let missing = (self.overall_min as i64 - have).max(0) as f64;
        let cheapest = required()
            .map(|(t, _)| set.sensor_cost(t))
            .fold(f64::INFINITY, f64::min);
        if cheapest.is_finite() {
            per_type.min(missing * cheapest)
        } else {
            per_type
        }
    }
}

/// Decides inference for one scenario at one time step.
pub trait InferenceStrategy: Sync {
    fn infer(&self, sensors: &[Sensor], triggered: &[bool]) -> InferenceResult;

    /// Whether a placement could ever pass, assuming every sensor triggers.
    fn ready(&self, counts: &BTreeMap<String, u32>) -> bool;
}

/// Count-based inference with goodness as the mean triggered fraction.
#[derive(Debug, Clone)]
pub struct CountingInference {
    pub test: InferenceTest,
}

impl CountingInference {
    pub fn new(test: InferenceTest) -> Self {
        Self { test }
    }
}

impl InferenceStrategy for CountingInference {
    fn infer(&self, sensors: &[Sensor], triggered: &[bool]) -> InferenceResult {
        let counts = TypeCounts::tally(sensors, triggered);
        trace!(total = ?counts.total, triggered = ?counts.triggered, "inference counts");
        if self.test.reached(&counts.triggered) {
            InferenceResult::inferred(self.test.goodness(&counts))
        } else {
            InferenceResult::not_inferred()
        }
    }

    fn ready(&self, counts: &BTreeMap<String, u32>) -> bool {
        self.test.reached(counts)
    }
}

/// Area-style inference: triggered sensors on a layer span triangles, and
/// goodness is the number of cloud nodes on that layer inside any of them.
#[derive(Debug, Clone)]
pub struct CoverageInference {
    pub test: InferenceTest,
    layer_points: BTreeMap<u32, Vec<(f64, f64)>>,
    positions: BTreeMap<NodeNumber, (u32, (f64, f64))>,
}

impl CoverageInference {
    pub fn new(test: InferenceTest, set: &ScenarioSet) -> Self {
        let grid = &set.node_structure;
        let mut layer_points: BTreeMap<u32, Vec<(f64, f64)>> = BTreeMap::new();
        let mut positions = BTreeMap::new();
        for node in set.all_cloud_nodes() {
            let ijk = grid.ijk(node);
            let (x, y, _) = grid.xyz(ijk);
            let point = (x as f64, y as f64);
            layer_points.entry(ijk.k).or_default().push(point);
            positions.insert(node, (ijk.k, point));
        }
        for node in 1..=grid.total_nodes() {
            positions.entry(node).or_insert_with(|| {
                let ijk = grid.ijk(node);
                let (x, y, _) = grid.xyz(ijk);
                (ijk.k, (x as f64, y as f64))
            });
        }
        Self {
            test,
            layer_points,
            positions,
        }
    }

    fn covered_on_layer(&self, corners: &[(f64, f64)], cloud: &[(f64, f64)]) -> usize {
        let n = corners.len();
        cloud
            .iter()
            .filter(|p| {
                (0..n).any(|a| {
                    (a + 1..n).any(|b| {
                        (b + 1..n).any(|c| in_triangle(**p, corners[a], corners[b], corners[c]))
                    })
                })
            })
            .count()
    }
}

impl InferenceStrategy for CoverageInference {
    fn infer(&self, sensors: &[Sensor], triggered: &[bool]) -> InferenceResult {
        let counts = TypeCounts::tally(sensors, triggered);
        trace!(total = ?counts.total, triggered = ?counts.triggered, "coverage counts");
        let hits: u32 = counts.triggered.values().sum();
        if hits < 3 || !self.test.reached(&counts.triggered) {
            return InferenceResult::not_inferred();
        }
        let mut by_layer: BTreeMap<u32, Vec<(f64, f64)>> = BTreeMap::new();
        for (sensor, _) in sensors.iter().zip(triggered).filter(|(_, hit)| **hit) {
            if let Some((k, point)) = self.positions.get(&sensor.node) {
                let layer = by_layer.entry(*k).or_default();
                if !layer.contains(point) {
                    layer.push(*point);
                }
            }
        }
        let area: usize = by_layer
            .iter()
            .filter(|(_, corners)| corners.len() >= 3)
            .filter_map(|(k, corners)| {
                self.layer_points
                    .get(k)
                    .map(|cloud| self.covered_on_layer(corners, cloud))
            })
            .sum();
        InferenceResult::inferred(area as f64)
    }

    fn ready(&self, counts: &BTreeMap<String, u32>) -> bool {
        counts.values().sum::<u32>() >= 3 && self.test.reached(counts)
    }
}

/// Barycentric point-in-triangle test; degenerate triangles contain nothing.
fn in_triangle(p: (f64, f64), a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> bool {
    let v0 = (c.0 - a.0, c.1 - a.1);
    let v1 = (b.0 - a.0, b.1 - a.1);
    let v2 = (p.0 - a.0, p.1 - a.1);
    let dot = |u: (f64, f64), v: (f64, f64)| u.0 * v.0 + u.1 * v.1;
    let (d00, d01, d02, d11, d12) =
        (dot(v0, v0), dot(v0, v1), dot(v0, v2), dot(v1, v1), dot(v1, v2));
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < f64::EPSILON {
        return false;
    }
    let u = (d11 * d02 - d01 * d12) / denom;
    let v = (d00 * d12 - d01 * d02) / denom;
    u >= 0.0 && v >= 0.0 && u + v <= 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Ijk, NodeStructure, TimeStep};
    use crate::scenario::tests::small_set;
    use crate::scenario::{Scenario, ScenarioSet};
    use crate::sensor::{DeltaType, SensorSetting, Trigger};

    fn counts(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(t, n)| (t.to_string(), *n)).collect()
    }

    #[test]
    fn per_type_minimums() {
        let test = InferenceTest::from_set(&small_set());
        assert!(test.reached(&counts(&[("co2", 1), ("pressure", 1)])));
        assert!(!test.reached(&counts(&[("co2", 3)])));
        assert!(!test.reached(&counts(&[("co2", 1), ("pressure", 0)])));
    }

    #[test]
    fn overall_minimum_overrides_per_type() {
        let mut set = small_set();
        set.overall_min_required = 2;
        let test = InferenceTest::from_set(&set);
        assert!(test.reached(&counts(&[("co2", 2)])));
        assert!(!test.reached(&counts(&[("co2", 1)])));
    }

    #[test]
    fn type_not_required_is_ignored() {
        let mut set = small_set();
        if let Some(s) = set.sensor_settings.get_mut("pressure") {
            s.min_required = 0;
        }
        let test = InferenceTest::from_set(&set);
        assert!(test.reached(&counts(&[("co2", 1)])));
    }

    #[test]
    fn goodness_is_mean_triggered_fraction() {
        let test = InferenceTest::from_set(&small_set());
        let sensors = vec![
            Sensor::new("co2", 1),
            Sensor::new("co2", 2),
            Sensor::new("pressure", 3),
        ];
        let c = TypeCounts::tally(&sensors, &[true, false, true]);
        assert!((test.goodness(&c) - 0.75).abs() < 1e-12);
        let inf = CountingInference::new(test);
        let r = inf.infer(&sensors, &[true, false, true]);
        assert!(r.inferred);
        assert_eq!(r.goodness, Some(0.75));
        assert!(!inf.infer(&sensors, &[true, true, false]).inferred);
    }

    #[test]
    fn completion_cost_counts_missing_sensors() {
        let set = small_set();
        let test = InferenceTest::from_set(&set);
        // pressure costs 2, co2 costs 1.
        assert_eq!(test.completion_cost(&counts(&[]), &set), 3.0);
        assert_eq!(test.completion_cost(&counts(&[("co2", 4)]), &set), 2.0);
        assert_eq!(test.completion_cost(&counts(&[("co2", 1), ("pressure", 1)]), &set), 0.0);
    }

    fn plane_set() -> ScenarioSet {
        let grid = NodeStructure::new(
            Ijk::new(5, 5, 1),
            vec![TimeStep::new(0, 0.0, 0.0)],
            vec!["c".into()],
        );
        let setting = SensorSetting::new("c", Trigger::AboveThreshold, DeltaType::Both, 1.0);
        ScenarioSet::new(grid, vec![Scenario::new("a", 1.0)]).with_setting("c", setting)
    }

    #[test]
    fn coverage_counts_nodes_inside_triangle() {
        let set = plane_set();
        let grid = &set.node_structure;
        let inf = CoverageInference::new(InferenceTest::from_set(&set), &set);
        // Right triangle with legs of length 2 covers 6 grid points.
        let sensors = vec![
            Sensor::new("c", grid.node_number(Ijk::new(1, 1, 1))),
            Sensor::new("c", grid.node_number(Ijk::new(3, 1, 1))),
            Sensor::new("c", grid.node_number(Ijk::new(1, 3, 1))),
        ];
        let r = inf.infer(&sensors, &[true, true, true]);
        assert_eq!(r, InferenceResult::inferred(6.0));
        assert!(!inf.infer(&sensors, &[true, true, false]).inferred);
    }

    #[test]
    fn collinear_sensors_cover_nothing() {
        let set = plane_set();
        let grid = &set.node_structure;
        let inf = CoverageInference::new(InferenceTest::from_set(&set), &set);
        let sensors: Vec<Sensor> = (1..=3)
            .map(|i| Sensor::new("c", grid.node_number(Ijk::new(i, 1, 1))))
            .collect();
        assert_eq!(inf.infer(&sensors, &[true, true, true]), InferenceResult::inferred(0.0));
    }
}
