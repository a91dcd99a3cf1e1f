//! Node grid and time axis shared by every scenario in a set.
//!
//! Nodes are numbered from 1 in i-fastest, then j, then k order:
//! `node = (k-1)*I*J + (j-1)*I + i`. Indices `i`, `j`, `k` are 1-based.

use serde::{Deserialize, Serialize};

pub type NodeNumber = u32;

/// Grid coordinates of a node (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ijk {
    pub i: u32,
    pub j: u32,
    pub k: u32,
}

impl Ijk {
    pub fn new(i: u32, j: u32, k: u32) -> Self {
        Self { i, j, k }
    }

    /// The (i, j) column this node sits in. Sensors sharing a column share a well.
    pub fn column(&self) -> (u32, u32) {
        (self.i, self.j)
    }
}

/// One simulated output time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeStep {
    /// Position in the simulator's output sequence.
    pub index: u32,
    #[serde(default)]
    pub simulated_time: f64,
    /// Elapsed time reported as time-to-detection.
    pub real_time: f64,
}

impl TimeStep {
    pub fn new(index: u32, simulated_time: f64, real_time: f64) -> Self {
        Self {
            index,
            simulated_time,
            real_time,
        }
    }
}

/// Immutable grid description, built once when a scenario set loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStructure {
    pub dimensions: Ijk,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub x: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub y: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub z: Vec<f32>,
    pub time_steps: Vec<TimeStep>,
    #[serde(default)]
    pub data_types: Vec<String>,
}

impl NodeStructure {
    /// Grid with unit spacing and the given time axis.
    pub fn new(dimensions: Ijk, time_steps: Vec<TimeStep>, data_types: Vec<String>) -> Self {
        let axis = |n: u32| (0..n).map(|v| v as f32).collect::<Vec<_>>();
        Self {
            x: axis(dimensions.i),
            y: axis(dimensions.j),
            z: axis(dimensions.k),
            dimensions,
            time_steps,
            data_types,
        }
    }

    pub fn total_nodes(&self) -> u32 {
        self.dimensions.i * self.dimensions.j * self.dimensions.k
    }

    pub fn contains(&self, ijk: Ijk) -> bool {
        let d = self.dimensions;
        (1..=d.i).contains(&ijk.i) && (1..=d.j).contains(&ijk.j) && (1..=d.k).contains(&ijk.k)
    }

    pub fn node_number(&self, ijk: Ijk) -> NodeNumber {
        let d = self.dimensions;
        (ijk.k - 1) * d.i * d.j + (ijk.j - 1) * d.i + ijk.i
    }

    pub fn ijk(&self, node: NodeNumber) -> Ijk {
        let d = self.dimensions;
        let per_layer = d.i * d.j;
        let start = node - 1;
        let layer = start / per_layer;
        let left_over = start - layer * per_layer;
        let row = left_over / d.i;
        Ijk {
            i: left_over - row * d.i + 1,
            j: row + 1,
            k: layer + 1,
        }
    }

    /// All nodes in the 3x3x3 neighbourhood of `ijk`, excluding `ijk` itself.
    pub fn neighbor_nodes(&self, ijk: Ijk) -> Vec<NodeNumber> {
        let mut out = Vec::with_capacity(26);
        for di in -1i64..=1 {
            for dj in -1i64..=1 {
                for dk in -1i64..=1 {
                    if di == 0 && dj == 0 && dk == 0 {
                        continue;
                    }
                    let (i, j, k) = (ijk.i as i64 + di, ijk.j as i64 + dj, ijk.k as i64 + dk);
                    if i < 1 || j < 1 || k < 1 {
                        continue;
                    }
                    let n = Ijk::new(i as u32, j as u32, k as u32);
                    if self.contains(n) {
                        out.push(self.node_number(n));
                    }
                }
            }
        }
        out
    }

    /// Every node in column (i, j), top layer first.
    pub fn nodes_in_column(&self, i: u32, j: u32) -> Vec<NodeNumber> {
        (1..=self.dimensions.k)
            .map(|k| self.node_number(Ijk::new(i, j, k)))
            .collect()
    }

    /// Cell-edge coordinate of a node, falling back to the grid index when
    /// coordinate arrays are absent.
    pub fn xyz(&self, ijk: Ijk) -> (f32, f32, f32) {
        let pick = |axis: &[f32], idx: u32| {
            axis.get(idx as usize - 1)
                .copied()
                .unwrap_or((idx - 1) as f32)
        };
        (pick(&self.x, ijk.i), pick(&self.y, ijk.j), pick(&self.z, ijk.k))
    }

    pub fn baseline_step(&self) -> Option<&TimeStep> {
        self.time_steps.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> NodeStructure {
        NodeStructure::new(
            Ijk::new(4, 3, 2),
            vec![TimeStep::new(0, 0.0, 0.0), TimeStep::new(1, 1.0, 5.0)],
            vec!["pressure".into()],
        )
    }

    #[test]
    fn node_numbers_are_one_based_and_i_fastest() {
        let g = grid();
        assert_eq!(g.node_number(Ijk::new(1, 1, 1)), 1);
        assert_eq!(g.node_number(Ijk::new(2, 1, 1)), 2);
        assert_eq!(g.node_number(Ijk::new(1, 2, 1)), 5);
        assert_eq!(g.node_number(Ijk::new(1, 1, 2)), 13);
        assert_eq!(g.node_number(Ijk::new(4, 3, 2)), g.total_nodes());
    }

    #[test]
    fn ijk_inverts_node_number() {
        let g = grid();
        for node in 1..=g.total_nodes() {
            assert_eq!(g.node_number(g.ijk(node)), node);
        }
    }

    #[test]
    fn neighbors_clip_to_grid() {
        let g = grid();
        // Corner of a 4x3x2 grid: 2*2*2 - 1 neighbours.
        assert_eq!(g.neighbor_nodes(Ijk::new(1, 1, 1)).len(), 7);
        // Interior in i/j, but only 2 layers.
        assert_eq!(g.neighbor_nodes(Ijk::new(2, 2, 1)).len(), 17);
    }

    #[test]
    fn column_has_one_node_per_layer() {
        let g = grid();
        let col = g.nodes_in_column(2, 3);
        assert_eq!(col.len(), 2);
        for node in col {
            assert_eq!(g.ijk(node).column(), (2, 3));
        }
    }
}
