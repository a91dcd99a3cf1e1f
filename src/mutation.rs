//! Mutation operators proposing a neighbouring configuration.
//!
//! A mutation either changes the configuration and returns `true`, or finds
//! no legal change and returns `false` leaving it untouched. Every placement
//! goes through [`ScenarioSet::valid_nodes`], so a mutated configuration
//! never exceeds the cost or well constraints.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::configuration::Configuration;
use crate::grid::NodeNumber;
use crate::prng::Pcg32;
use crate::scenario::ScenarioSet;
use crate::sensor::Sensor;

/// Chance that a move stays in the neighbourhood of the current position.
const NEIGHBOR_MOVE_PROB: f64 = 0.8;

pub trait MutationStrategy {
    fn mutate(&self, config: &mut Configuration, set: &ScenarioSet, rng: &mut Pcg32) -> bool;
}

/// Which well-level action the sensor menu favours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Prefer re-seating sensors inside their current well.
    #[default]
    AdjustWithinWell,
    /// Prefer moving a whole well elsewhere.
    RelocateWell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorAction {
    Add,
    MoveInBounds,
    Move,
    ShuffleWell,
    MoveWell,
    Remove,
}

const ACTIONS: [SensorAction; 6] = [
    SensorAction::Add,
    SensorAction::MoveInBounds,
    SensorAction::Move,
    SensorAction::ShuffleWell,
    SensorAction::MoveWell,
    SensorAction::Remove,
];

pub(crate) fn weighted_choice(rng: &mut Pcg32, weights: &[f64]) -> Option<usize> {
    // Index with probability proportional to weight; None if all are 0.
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let r = rng.next_float() * total;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if r < cumulative {
            return Some(i);
        }
    }
    Some(weights.len() - 1)
}

/// Single-sensor edits: add, move, re-seat in a well, move a well, remove.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorMutation {
    pub policy: PlacementPolicy,
}

impl SensorMutation {
    pub fn new(policy: PlacementPolicy) -> Self {
        Self { policy }
    }

    fn weights(&self) -> [f64; 6] {
        let (shuffle, move_well) = match self.policy {
            PlacementPolicy::AdjustWithinWell => (3.0, 1.0),
            PlacementPolicy::RelocateWell => (1.0, 3.0),
        };
        [7.0, 1.0, 1.0, shuffle, move_well, 1.0]
    }
}

impl MutationStrategy for SensorMutation {
    fn mutate(&self, config: &mut Configuration, set: &ScenarioSet, rng: &mut Pcg32) -> bool {
        let mut weights = self.weights();
        // Failed actions drop out of the menu until one succeeds.
        while let Some(idx) = weighted_choice(rng, &weights) {
            let action = ACTIONS[idx];
            let changed = match action {
                SensorAction::Add => add_sensor(config, set, rng),
                SensorAction::MoveInBounds => move_sensor_in_bounds(config, set, rng),
                SensorAction::Move => move_any_sensor(config, set, rng),
                SensorAction::ShuffleWell => shuffle_well(config, set, rng),
                SensorAction::MoveWell => move_any_well(config, set, rng),
                SensorAction::Remove => remove_sensor(config, rng),
            };
            if changed {
                debug!(action = ?action, sensors = config.len(), "sensor mutation");
                return true;
            }
            weights[idx] = 0.0;
        }
        false
    }
}

/// Relocate a whole well, keeping its sensor types and depths where possible.
#[derive(Debug, Clone, Copy, Default)]
pub struct WellMutation;

impl MutationStrategy for WellMutation {
    fn mutate(&self, config: &mut Configuration, set: &ScenarioSet, rng: &mut Pcg32) -> bool {
        if config.is_empty() {
            return add_sensor(config, set, rng);
        }
        let changed = move_any_well(config, set, rng);
        if changed {
            debug!(wells = config.wells(&set.node_structure).len(), "well mutation");
        }
        changed
    }
}

fn add_sensor(config: &mut Configuration, set: &ScenarioSet, rng: &mut Pcg32) -> bool {
    let options: Vec<(&String, Vec<NodeNumber>)> = set
        .sensor_types()
        .map(|t| (t, set.valid_nodes(t, config.sensors(), None)))
        .filter(|(_, nodes)| !nodes.is_empty())
        .collect();
    let Some((sensor_type, nodes)) = rng.choose(&options) else {
        return false;
    };
    let node = match set.add_point_node() {
        Some(p) if nodes.contains(&p) => p,
        _ => nodes[rng.next_index(nodes.len())],
    };
    config.add_sensor(Sensor::new(sensor_type, node))
}

fn remove_sensor(config: &mut Configuration, rng: &mut Pcg32) -> bool {
    if config.is_empty() {
        return false;
    }
    let idx = rng.next_index(config.len());
    config.remove_sensor(idx).is_some()
}

/// Try sensors in random order until one moves.
fn move_first_of(
    config: &mut Configuration,
    set: &ScenarioSet,
    rng: &mut Pcg32,
    mut candidates: Vec<Sensor>,
) -> bool {
    rng.shuffle(&mut candidates);
    for sensor in candidates {
        if move_sensor(config, set, rng, &sensor) {
            return true;
        }
    }
    false
}

fn move_any_sensor(config: &mut Configuration, set: &ScenarioSet, rng: &mut Pcg32) -> bool {
    let candidates = config.sensors().to_vec();
    move_first_of(config, set, rng, candidates)
}

fn move_sensor_in_bounds(config: &mut Configuration, set: &ScenarioSet, rng: &mut Pcg32) -> bool {
    let outside: Vec<Sensor> = config
        .sensors()
        .iter()
        .filter(|s| !set.in_cloud(s))
        .cloned()
        .collect();
    move_first_of(config, set, rng, outside)
}

/// Mostly step to a neighbouring node; otherwise (or if no neighbour is
/// legal) switch to an affordable type and jump anywhere valid.
fn move_sensor(
    config: &mut Configuration,
    set: &ScenarioSet,
    rng: &mut Pcg32,
    sensor: &Sensor,
) -> bool {
    let Some(idx) = config.sensors().iter().position(|s| s == sensor) else {
        return false;
    };
    let grid = &set.node_structure;

    if rng.chance(NEIGHBOR_MOVE_PROB) {
        let valid: BTreeSet<NodeNumber> = set
            .valid_nodes(&sensor.sensor_type, config.sensors(), Some(idx))
            .into_iter()
            .collect();
        let near: Vec<NodeNumber> = grid
            .neighbor_nodes(grid.ijk(sensor.node))
            .into_iter()
            .filter(|n| valid.contains(n))
            .collect();
        if let Some(&node) = rng.choose(&near) {
            return config.replace_sensor(idx, Sensor::new(&sensor.sensor_type, node));
        }
    }

    let types = set.affordable_switch_types(config.sensors(), idx);
    let Some(new_type) = rng.choose(&types) else {
        return false;
    };
    let nodes: Vec<NodeNumber> = set
        .valid_nodes(new_type, config.sensors(), Some(idx))
        .into_iter()
        .filter(|n| !(new_type == &sensor.sensor_type && *n == sensor.node))
        .collect();
    match rng.choose(&nodes) {
        Some(&node) => config.replace_sensor(idx, Sensor::new(new_type, node)),
        None => false,
    }
}

/// Re-seat one sensor of a random well at another depth in the same column.
fn shuffle_well(config: &mut Configuration, set: &ScenarioSet, rng: &mut Pcg32) -> bool {
    let grid = &set.node_structure;
    let mut wells: Vec<(u32, u32)> = config.wells(grid).into_iter().collect();
    rng.shuffle(&mut wells);
    for column in wells {
        let mut members = config.sensors_in_well(grid, column);
        rng.shuffle(&mut members);
        for idx in members {
            let sensor = config.sensors()[idx].clone();
            let options: Vec<NodeNumber> = set
                .valid_nodes(&sensor.sensor_type, config.sensors(), Some(idx))
                .into_iter()
                .filter(|n| *n != sensor.node && grid.ijk(*n).column() == column)
                .collect();
            if let Some(&node) = rng.choose(&options) {
                return config.replace_sensor(idx, Sensor::new(&sensor.sensor_type, node));
            }
        }
    }
    false
}

fn move_any_well(config: &mut Configuration, set: &ScenarioSet, rng: &mut Pcg32) -> bool {
    let mut wells: Vec<(u32, u32)> = config.wells(&set.node_structure).into_iter().collect();
    rng.shuffle(&mut wells);
    wells.into_iter().any(|column| relocate_well(config, set, rng, column))
}

/// Move every sensor in `column` to a free column.
pub(crate) fn relocate_well(
    config: &mut Configuration,
    set: &ScenarioSet,
    rng: &mut Pcg32,
    column: (u32, u32),
) -> bool {
    let grid = &set.node_structure;
    let members: Vec<Sensor> = config
        .sensors_in_well(grid, column)
        .into_iter()
        .map(|i| config.sensors()[i].clone())
        .collect();
    if members.is_empty() {
        return false;
    }
    let wells = config.wells(grid);
    let occupied = &wells;
    let dims = grid.dimensions;
    let all_columns = move || {
        (1..=dims.i)
            .flat_map(move |i| (1..=dims.j).map(move |j| (i, j)))
            .filter(move |c| !occupied.contains(c))
    };
    let mut near: Vec<(u32, u32)> = all_columns()
        .filter(|&(i, j)| i.abs_diff(column.0) <= 1 && j.abs_diff(column.1) <= 1)
        .collect();
    let mut far: Vec<(u32, u32)> = all_columns().collect();
    rng.shuffle(&mut near);
    rng.shuffle(&mut far);
    let targets = if rng.chance(NEIGHBOR_MOVE_PROB) {
        near.into_iter().chain(far).collect::<Vec<_>>()
    } else {
        far
    };

    for target in targets {
        if let Some(placed) = place_members(set, &members, target) {
            let mut moved: Vec<Sensor> = config
                .sensors()
                .iter()
                .filter(|s| !members.contains(*s))
                .cloned()
                .collect();
            moved.extend(placed);
            if !set.is_affordable(&moved) {
                continue;
            }
            *config = Configuration::from_sensors(moved);
            return true;
        }
    }
    false
}

/// Seat each member in `target`, same layer first, then any layer in the
/// type's cloud. None if some member has nowhere to go.
fn place_members(set: &ScenarioSet, members: &[Sensor], target: (u32, u32)) -> Option<Vec<Sensor>> {
    let grid = &set.node_structure;
    let column = grid.nodes_in_column(target.0, target.1);
    let mut placed: Vec<Sensor> = Vec::with_capacity(members.len());
    for member in members {
        let k = grid.ijk(member.node).k;
        let free = |node: &NodeNumber| {
            let candidate = Sensor::new(&member.sensor_type, *node);
            set.in_cloud(&candidate) && !placed.contains(&candidate)
        };
        let same_layer = column.iter().find(|n| grid.ijk(**n).k == k && free(*n));
        let node = same_layer.or_else(|| column.iter().find(|n| free(*n)))?;
        placed.push(Sensor::new(&member.sensor_type, *node));
    }
    Some(placed)
}
