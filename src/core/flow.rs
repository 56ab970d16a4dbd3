use crate::core::graph::{ArcId, GridGraph, NodeId};

/// Integer flow on every arc: the number of 2π cycles added to the arc's
/// wrapped gradient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    values: Vec<i32>,
}

impl Flow {
    pub fn zeros(arc_count: usize) -> Self {
        Self {
            values: vec![0; arc_count],
        }
    }

    pub fn from_values(values: Vec<i32>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn get(&self, arc: ArcId) -> i32 {
        self.values[arc.0]
    }

    #[inline]
    pub fn set(&mut self, arc: ArcId, value: i32) {
        self.values[arc.0] = value;
    }

    #[inline]
    pub fn add(&mut self, arc: ArcId, delta: i32) {
        self.values[arc.0] += delta;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.values
    }

    /// Signed flow sum around an elementary loop
    pub fn loop_flow(&self, graph: &GridGraph, cell: NodeId) -> i32 {
        graph
            .loop_arcs(cell)
            .iter()
            .map(|&(arc, sign)| sign * self.get(arc))
            .sum()
    }

    /// Net flow a dual node carries: positive contributions from arcs for
    /// which it is the positive endpoint, negative for the others
    pub fn net_flow(&self, graph: &GridGraph, node: NodeId) -> i32 {
        graph
            .incident_arcs(node)
            .map(|arc| {
                let mut net = 0;
                if graph.pos_node(arc) == node {
                    net += self.get(arc);
                }
                if graph.neg_node(arc) == node {
                    net -= self.get(arc);
                }
                net
            })
            .sum()
    }

    /// Residue still to be cancelled at a node
    #[inline]
    pub fn imbalance(&self, graph: &GridGraph, node: NodeId) -> i32 {
        graph.loop_residue(node) - self.net_flow(graph, node)
    }

    /// Elementary loops whose flow sum differs from their residue
    pub fn violations(&self, graph: &GridGraph) -> Vec<NodeId> {
        graph
            .cells()
            .filter(|&cell| self.loop_flow(graph, cell) != graph.loop_residue(cell))
            .collect()
    }

    /// Whether every elementary loop satisfies the cycle constraint
    pub fn is_conservative(&self, graph: &GridGraph) -> bool {
        graph
            .cells()
            .all(|cell| self.loop_flow(graph, cell) == graph.loop_residue(cell))
    }

    /// Number of arcs carrying nonzero flow
    pub fn nonzero_count(&self) -> usize {
        self.values.iter().filter(|&&v| v != 0).count()
    }
}
