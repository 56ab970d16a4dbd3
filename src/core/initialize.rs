//! Feasible starting flows
//!
//! Both initializers return a flow that satisfies the cycle constraint on
//! every elementary loop exactly. `Mst` integrates along a maximum-reliability
//! spanning tree and lets the complementary dual tree absorb all residues;
//! `Mcf` starts from each arc's individually optimal flow and routes the
//! remaining imbalances one unit at a time along cheapest paths.

use crate::core::bucket_queue::BucketQueue;
use crate::core::cost::{CostModel, INFINITE_COST};
use crate::core::flow::Flow;
use crate::core::graph::{ArcId, GridGraph, NodeId};
use crate::types::{Pixel, UnwrapError, UnwrapResult};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::str::FromStr;

const PRIORITY_BINS: usize = 256;

/// Initialization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMethod {
    /// Minimum spanning tree over pixels
    Mst,
    /// Minimum cost flow by successive shortest paths
    #[default]
    Mcf,
}

impl InitMethod {
    pub const ALL: [InitMethod; 2] = [InitMethod::Mst, InitMethod::Mcf];

    pub fn as_str(&self) -> &'static str {
        match self {
            InitMethod::Mst => "mst",
            InitMethod::Mcf => "mcf",
        }
    }
}

impl fmt::Display for InitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitMethod {
    type Err = UnwrapError;

    fn from_str(s: &str) -> UnwrapResult<Self> {
        InitMethod::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = InitMethod::ALL.iter().map(|m| m.as_str()).collect();
                UnwrapError::invalid_option("init method", &names, s)
            })
    }
}

/// Builds the initial flow handed to the optimizer
pub struct Initializer {
    method: InitMethod,
}

impl Initializer {
    pub fn new(method: InitMethod) -> Self {
        Self { method }
    }

    pub fn initialize(&self, graph: &GridGraph, costs: &CostModel) -> UnwrapResult<Flow> {
        log::info!(
            "Initializing flow ({}) on {}x{} grid with {} residues",
            self.method,
            graph.rows(),
            graph.cols(),
            graph.residue_count()
        );

        let flow = match self.method {
            InitMethod::Mst => spanning_tree_flow(graph, costs)?,
            InitMethod::Mcf => {
                let mut flow = baseline_flow(graph, costs);
                let routed = route_imbalances(graph, costs, &mut flow)?;
                log::debug!("Routed {} units of imbalance", routed);
                flow
            }
        };

        debug_assert!(flow.is_conservative(graph));
        log::debug!(
            "Initial flow: {} nonzero arcs, cost {}",
            flow.nonzero_count(),
            costs.total_cost(&flow)
        );
        Ok(flow)
    }
}

/// Every arc at its individually cheapest flow
pub fn baseline_flow(graph: &GridGraph, costs: &CostModel) -> Flow {
    let values = graph.arcs().map(|arc| costs.baseline_flow(arc)).collect();
    Flow::from_values(values)
}

/// Reliability of an arc mapped onto queue priorities; free arcs get the
/// lowest bin so the tree only crosses masked areas as a last resort
fn arc_priorities(graph: &GridGraph, costs: &CostModel, flow: &Flow) -> Vec<usize> {
    let reliability: Vec<i64> = graph
        .arcs()
        .map(|arc| {
            if costs.is_free(arc) {
                0
            } else {
                costs.reliability(arc, flow.get(arc)).clamp(0, INFINITE_COST)
            }
        })
        .collect();

    let max = reliability.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return graph
            .arcs()
            .map(|arc| usize::from(!costs.is_free(arc)))
            .collect();
    }

    let log_max = (1.0 + max as f64).ln();
    graph
        .arcs()
        .zip(reliability)
        .map(|(arc, r)| {
            if costs.is_free(arc) {
                0
            } else {
                let level = (PRIORITY_BINS - 2) as f64 * (1.0 + r as f64).ln() / log_max;
                1 + level.floor() as usize
            }
        })
        .collect()
}

/// Prim's algorithm over pixels, most reliable arcs first
fn spanning_tree(graph: &GridGraph, priorities: &[usize]) -> Vec<bool> {
    let (rows, cols) = (graph.rows(), graph.cols());
    let mut in_tree = vec![false; graph.arc_count()];
    if rows == 0 || cols == 0 {
        return in_tree;
    }

    let mut visited = vec![false; rows * cols];
    let mut queue: BucketQueue<(ArcId, Pixel)> = BucketQueue::new(PRIORITY_BINS);

    let visit = |pixel: Pixel, visited: &mut Vec<bool>, queue: &mut BucketQueue<(ArcId, Pixel)>| {
        visited[pixel.row * cols + pixel.col] = true;
        for (neighbor, arc) in graph.neighbors(pixel) {
            if !visited[neighbor.row * cols + neighbor.col] {
                queue.push(priorities[arc.0], (arc, neighbor));
            }
        }
    };

    visit(Pixel::new(0, 0), &mut visited, &mut queue);
    while let Some((arc, pixel)) = queue.pop() {
        if visited[pixel.row * cols + pixel.col] {
            continue;
        }
        in_tree[arc.0] = true;
        visit(pixel, &mut visited, &mut queue);
    }

    in_tree
}

fn spanning_tree_flow(graph: &GridGraph, costs: &CostModel) -> UnwrapResult<Flow> {
    let mut flow = baseline_flow(graph, costs);
    let priorities = arc_priorities(graph, costs, &flow);
    let in_tree = spanning_tree(graph, &priorities);

    // arcs outside the pixel tree form a spanning tree of the dual graph
    let node_count = graph.node_count();
    let mut parent: Vec<Option<ArcId>> = vec![None; node_count];
    let mut reached = vec![false; node_count];
    let mut order = Vec::with_capacity(node_count);
    let mut queue = VecDeque::new();

    let ground = graph.ground();
    reached[ground.0] = true;
    queue.push_back(ground);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for arc in graph.incident_arcs(node) {
            if in_tree[arc.0] {
                continue;
            }
            let pos = graph.pos_node(arc);
            let other = if pos == node { graph.neg_node(arc) } else { pos };
            if !reached[other.0] {
                reached[other.0] = true;
                parent[other.0] = Some(arc);
                queue.push_back(other);
            }
        }
    }

    if order.len() != node_count {
        return Err(UnwrapError::Processing(format!(
            "Dual tree reached {} of {} loops",
            order.len(),
            node_count
        )));
    }

    // leaves first: each loop fixes the arc to its parent
    for &node in order.iter().rev() {
        let Some(arc) = parent[node.0] else { continue };
        flow.set(arc, 0);
        let remaining = graph.loop_residue(node) - flow.net_flow(graph, node);
        let sign = if graph.pos_node(arc) == node { 1 } else { -1 };
        flow.set(arc, sign * remaining);
    }

    log::debug!(
        "Spanning tree: {} tree arcs, {} dual arcs",
        in_tree.iter().filter(|&&t| t).count(),
        node_count.saturating_sub(1)
    );
    Ok(flow)
}

/// Cancel every node imbalance of `flow` by successive shortest paths on
/// costs anchored at the flow as given. Returns the number of units
/// routed.
pub fn route_imbalances(
    graph: &GridGraph,
    costs: &CostModel,
    flow: &mut Flow,
) -> UnwrapResult<usize> {
    let mut router = ImbalanceRouter::new(graph, costs, flow);
    let mut routed = 0usize;
    for source in 0..graph.node_count() {
        while router.excess[source] > 0 {
            router.route_unit(NodeId(source), flow)?;
            routed += 1;
        }
    }
    debug_assert!(router.excess.iter().all(|&e| e == 0));
    Ok(routed)
}

/// Dijkstra with node potentials over convex arc costs
///
/// Steps away from the anchor flow cost their true increment, floored at
/// zero; steps back toward it refund the step they undo. From the baseline
/// flow the floor never applies and every routed unit follows a cheapest
/// path, so the result is optimal.
struct ImbalanceRouter<'a> {
    graph: &'a GridGraph,
    costs: &'a CostModel,
    anchor: Vec<i32>,
    excess: Vec<i32>,
    potential: Vec<i64>,
    dist: Vec<i64>,
    hops: Vec<u32>,
    pred: Vec<Option<(NodeId, ArcId, i32)>>,
    seen: Vec<u32>,
    settled: Vec<u32>,
    stamp: u32,
    heap: BinaryHeap<Reverse<(i64, u32, usize)>>,
    touched: Vec<usize>,
}

impl<'a> ImbalanceRouter<'a> {
    fn new(graph: &'a GridGraph, costs: &'a CostModel, flow: &Flow) -> Self {
        let anchor = flow.as_slice().to_vec();
        let node_count = graph.node_count();
        let excess = (0..node_count)
            .map(|n| flow.imbalance(graph, NodeId(n)))
            .collect();

        Self {
            graph,
            costs,
            anchor,
            excess,
            potential: vec![0; node_count],
            dist: vec![0; node_count],
            hops: vec![0; node_count],
            pred: vec![None; node_count],
            seen: vec![0; node_count],
            settled: vec![0; node_count],
            stamp: 0,
            heap: BinaryHeap::new(),
            touched: Vec::new(),
        }
    }

    #[inline]
    fn step_cost(&self, arc: ArcId, flow: &Flow, delta: i32) -> i64 {
        let k = flow.get(arc);
        let away = (k - self.anchor[arc.0]) * delta >= 0;
        if away {
            self.costs.increment(arc, k, delta).max(0)
        } else {
            -self.costs.increment(arc, k + delta, -delta).max(0)
        }
    }

    fn route_unit(&mut self, source: NodeId, flow: &mut Flow) -> UnwrapResult<()> {
        let graph = self.graph;
        self.stamp += 1;
        let stamp = self.stamp;
        self.heap.clear();
        self.touched.clear();

        self.dist[source.0] = 0;
        self.hops[source.0] = 0;
        self.pred[source.0] = None;
        self.seen[source.0] = stamp;
        self.heap.push(Reverse((0, 0, source.0)));

        let mut target = None;
        while let Some(Reverse((d, h, u))) = self.heap.pop() {
            if self.settled[u] == stamp || d > self.dist[u] {
                continue;
            }
            self.settled[u] = stamp;
            self.touched.push(u);
            if u != source.0 && self.excess[u] < 0 {
                target = Some(u);
                break;
            }

            for (arc, to, delta) in graph.moves(NodeId(u)) {
                let v = to.0;
                if self.settled[v] == stamp {
                    continue;
                }
                let reduced = self.step_cost(arc, flow, delta) + self.potential[u] - self.potential[v];
                let nd = d.saturating_add(reduced);
                let better = self.seen[v] != stamp
                    || nd < self.dist[v]
                    || (nd == self.dist[v] && h + 1 < self.hops[v]);
                if better {
                    self.seen[v] = stamp;
                    self.dist[v] = nd;
                    self.hops[v] = h + 1;
                    self.pred[v] = Some((NodeId(u), arc, delta));
                    self.heap.push(Reverse((nd, h + 1, v)));
                }
            }
        }

        let target = target.ok_or_else(|| {
            UnwrapError::Processing(format!("No deficit reachable from loop {}", source.0))
        })?;

        let reach = self.dist[target];
        for &v in &self.touched {
            self.potential[v] += self.dist[v] - reach;
        }

        let mut node = target;
        while let Some((prev, arc, delta)) = self.pred[node] {
            flow.add(arc, delta);
            node = prev.0;
        }
        self.excess[source.0] -= 1;
        self.excess[target] += 1;
        Ok(())
    }
}
