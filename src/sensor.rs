//! Sensor types, trigger rules and placed sensors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::grid::NodeNumber;

/// How a sensor decides it has seen the plume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    AboveThreshold,
    BelowThreshold,
    RelativeChange,
    AbsoluteChange,
}

impl Trigger {
    /// Delta triggers compare against the value at the first time step.
    pub fn uses_baseline(self) -> bool {
        matches!(self, Trigger::RelativeChange | Trigger::AbsoluteChange)
    }

    fn tag(self) -> &'static str {
        match self {
            Trigger::AboveThreshold => "above",
            Trigger::BelowThreshold => "below",
            Trigger::RelativeChange => "rel",
            Trigger::AbsoluteChange => "abs",
        }
    }
}

/// Direction of change that counts for delta triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaType {
    Increase,
    Decrease,
    Both,
}

fn default_delta_type() -> DeltaType {
    DeltaType::Both
}
fn default_cost() -> f64 {
    1.0
}
fn default_min_required() -> i32 {
    1
}

/// Trigger configuration and cost for one sensor type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSetting {
    /// Name of the data type this sensor reads from the provider.
    pub data_type: String,
    pub trigger: Trigger,
    #[serde(default = "default_delta_type")]
    pub delta_type: DeltaType,
    pub threshold: f32,
    #[serde(default = "default_cost")]
    pub cost: f64,
    /// Triggered sensors of this type needed for inference; `<= 0` means
    /// the type is not required.
    #[serde(default = "default_min_required")]
    pub min_required: i32,
    /// Placeable nodes. When absent they are derived from the detection
    /// cache, or every grid node is allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_nodes: Option<BTreeSet<NodeNumber>>,
}

impl SensorSetting {
    pub fn new(data_type: &str, trigger: Trigger, delta_type: DeltaType, threshold: f32) -> Self {
        Self {
            data_type: data_type.to_string(),
            trigger,
            delta_type,
            threshold,
            cost: default_cost(),
            min_required: default_min_required(),
            valid_nodes: None,
        }
    }

    /// Key identifying the (data type, trigger rule) pair. Two settings with
    /// the same specific type share detection cache entries.
    pub fn specific_type(&self) -> String {
        if self.trigger.uses_baseline() {
            let dir = match self.delta_type {
                DeltaType::Increase => "inc",
                DeltaType::Decrease => "dec",
                DeltaType::Both => "both",
            };
            format!("{}_{}_{}_{}", self.data_type, self.trigger.tag(), dir, self.threshold)
        } else {
            format!("{}_{}_{}", self.data_type, self.trigger.tag(), self.threshold)
        }
    }

    /// Whether `current` trips this sensor given the time-zero `baseline`.
    pub fn is_triggered(&self, current: Option<f32>, baseline: Option<f32>) -> bool {
        sensor_triggered(self.trigger, self.delta_type, self.threshold, current, baseline)
    }
}

/// Trigger predicate shared by the detection cache builder and direct
/// provider queries.
///
/// A missing current value never triggers. Delta triggers also need a
/// baseline; a zero baseline yields zero relative change.
pub fn sensor_triggered(
    trigger: Trigger,
    delta_type: DeltaType,
    threshold: f32,
    current: Option<f32>,
    baseline: Option<f32>,
) -> bool {
    let Some(current) = current else {
        return false;
    };
    if current.is_nan() {
        return false;
    }
    let change = match trigger {
        Trigger::AboveThreshold => return current >= threshold,
        Trigger::BelowThreshold => return current <= threshold,
        Trigger::RelativeChange => {
            let Some(baseline) = baseline else {
                return false;
            };
            if baseline == 0.0 {
                0.0
            } else {
                (current - baseline) / baseline
            }
        }
        Trigger::AbsoluteChange => {
            let Some(baseline) = baseline else {
                return false;
            };
            current - baseline
        }
    };
    match delta_type {
        DeltaType::Increase => change >= threshold,
        DeltaType::Decrease => change <= threshold,
        DeltaType::Both => change.abs() >= threshold,
    }
}

/// A placed sensor. Ordering is (type, node), which is the canonical order
/// of sensors inside a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sensor {
    pub sensor_type: String,
    pub node: NodeNumber,
}

impl Sensor {
    pub fn new(sensor_type: &str, node: NodeNumber) -> Self {
        Self {
            sensor_type: sensor_type.to_string(),
            node,
        }
    }
}
