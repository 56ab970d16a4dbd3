use crate::core::cost::{CostModel, INFINITE_COST};
use crate::core::flow::Flow;
use crate::core::graph::{ArcId, GridGraph, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Optimizer budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverParams {
    /// Maximum number of cycles shifted before giving up
    pub max_cycles: usize,
    /// Wall-clock limit for one optimization; `None` runs to convergence
    pub max_time: Option<Duration>,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_cycles: 1_000_000,
            max_time: Some(Duration::from_secs(600)),
        }
    }
}

/// Outcome of one optimization run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeReport {
    pub cycles_canceled: usize,
    pub searches: usize,
    pub converged: bool,
    pub initial_cost: i64,
    pub final_cost: i64,
}

/// A negative cycle in the residual graph: unit flow changes, the loops it
/// passes through and its summed incremental cost at the flow it was found on
#[derive(Debug, Clone)]
struct Cycle {
    moves: Vec<(ArcId, i32)>,
    nodes: Vec<usize>,
    cost: i64,
}

/// Negative-cycle canceling on the dual graph
///
/// A label-correcting shortest-path search runs from a virtual source
/// joined to every node. Predecessors form a forest that is disassembled
/// below any node whose label drops, so relaxing a move into an ancestor
/// closes a cycle of negative cost at once. Cycles found within one batch
/// are node-disjoint and are shifted cheapest first (fewest arcs on ties).
/// Labels survive between batches and only the loops on shifted cycles are
/// rescanned; the search has converged when its queue runs dry. Every shift
/// is a circulation, so the cycle constraint of the incoming flow holds
/// throughout.
pub struct FlowOptimizer {
    params: SolverParams,
}

impl FlowOptimizer {
    pub fn new() -> Self {
        Self {
            params: SolverParams::default(),
        }
    }

    pub fn with_params(params: SolverParams) -> Self {
        Self { params }
    }

    /// Improve `flow` in place until no negative cycle remains or the budget
    /// runs out
    pub fn optimize(&self, graph: &GridGraph, costs: &CostModel, flow: &mut Flow) -> OptimizeReport {
        let start = Instant::now();
        let deadline = self.params.max_time.map(|limit| start + limit);
        let initial_cost = costs.total_cost(flow);
        let mut report = OptimizeReport {
            initial_cost,
            final_cost: initial_cost,
            ..OptimizeReport::default()
        };

        log::info!(
            "Optimizing flow over {} loops (initial cost {})",
            graph.node_count(),
            initial_cost
        );

        let mut search = CycleSearch::new(graph.node_count());
        report.converged = loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::warn!("Optimizer stopped at the time limit after {} cycles", report.cycles_canceled);
                break false;
            }
            report.searches += 1;
            let Some(mut cycles) = search.run(graph, costs, flow, deadline) else {
                log::warn!("Optimizer stopped at the time limit after {} cycles", report.cycles_canceled);
                break false;
            };
            if cycles.is_empty() {
                break true;
            }

            cycles.sort_by_key(|cycle| (cycle.cost, cycle.moves.len()));
            let budget = self.params.max_cycles - report.cycles_canceled;
            let shifted = cycles.len().min(budget);
            for cycle in &cycles[..shifted] {
                for &(arc, delta) in &cycle.moves {
                    flow.add(arc, delta);
                }
            }
            report.cycles_canceled += shifted;

            if shifted < cycles.len() {
                log::warn!("Optimizer hit the cycle budget ({})", self.params.max_cycles);
                break false;
            }
            search.release(&cycles);
            log::debug!("Batch {}: shifted {} cycles", report.searches, shifted);
        };

        report.final_cost = costs.total_cost(flow);
        log::info!(
            "Optimization {} after {} batches: {} cycles, cost {} -> {} ({:.2}s)",
            if report.converged { "converged" } else { "stopped" },
            report.searches,
            report.cycles_canceled,
            report.initial_cost,
            report.final_cost,
            start.elapsed().as_secs_f64()
        );
        report
    }
}

impl Default for FlowOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Relaxations allowed after the first cycle of a batch before it is shifted
const BATCH_WINDOW: usize = 4096;
/// Scans between wall-clock checks
const CLOCK_INTERVAL: usize = 1024;

/// Outcome of relaxing a move into one of the mover's ancestors
enum Closing {
    Cycle(Cycle),
    /// Passes through a loop already held by a pending cycle
    Blocked,
    /// Not cheaper; only possible where rounding breaks convexity
    Rejected,
}

/// Labels, predecessor forest and work queue, kept across batches
///
/// The forest is stored as a preorder thread (`next`/`prev`) with depths, so
/// the descendants of a node are the run that follows it with greater
/// depth. Index `node_count` is the virtual source at depth 0 and every
/// forest root hangs below it at depth 1.
struct CycleSearch {
    dist: Vec<i64>,
    pred: Vec<Option<(NodeId, ArcId, i32)>>,
    depth: Vec<u32>,
    next: Vec<usize>,
    prev: Vec<usize>,
    in_queue: Vec<bool>,
    locked: Vec<bool>,
    queue: VecDeque<usize>,
    deferred: Vec<usize>,
    block: Vec<usize>,
    relaxations: usize,
}

impl CycleSearch {
    fn new(node_count: usize) -> Self {
        let size = node_count + 1;
        let mut depth = vec![1; size];
        depth[node_count] = 0;
        Self {
            dist: vec![0; node_count],
            pred: vec![None; node_count],
            depth,
            next: (0..size).map(|i| (i + 1) % size).collect(),
            prev: (0..size).map(|i| (i + size - 1) % size).collect(),
            in_queue: vec![true; node_count],
            locked: vec![false; node_count],
            queue: (0..node_count).collect(),
            deferred: Vec::new(),
            block: Vec::new(),
            relaxations: 0,
        }
    }

    #[inline]
    fn source(&self) -> usize {
        self.pred.len()
    }

    /// Continue the search at the current flow. Returns the cycles of the
    /// next batch, empty once no node is left to scan, or `None` when the
    /// deadline passed first.
    fn run(
        &mut self,
        graph: &GridGraph,
        costs: &CostModel,
        flow: &Flow,
        deadline: Option<Instant>,
    ) -> Option<Vec<Cycle>> {
        let window = graph.node_count().clamp(1, BATCH_WINDOW);
        let mut cycles = Vec::new();
        let mut batch_start = 0usize;
        let mut scans = 0usize;

        while let Some(u) = self.queue.pop_front() {
            self.in_queue[u] = false;
            if self.locked[u] {
                continue;
            }
            scans += 1;
            if scans % CLOCK_INTERVAL == 0 && deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }

            let du = self.dist[u];
            let back = self.pred[u];
            for (arc, to, delta) in graph.moves(NodeId(u)) {
                let v = to.0;
                // undoing the move that labeled u
                if back == Some((to, arc, -delta)) {
                    continue;
                }
                let increment = costs.increment(arc, flow.get(arc), delta);
                if increment >= INFINITE_COST / 2 {
                    continue;
                }
                let candidate = du + increment;
                if candidate >= self.dist[v] {
                    continue;
                }
                if self.locked[v] {
                    self.deferred.push(u);
                    continue;
                }

                self.relaxations += 1;
                if self.collect_subtree(v, u) {
                    match self.close_cycle(u, v, arc, delta, costs, flow) {
                        Closing::Cycle(cycle) => {
                            for &node in &cycle.nodes {
                                self.locked[node] = true;
                            }
                            if cycles.is_empty() {
                                batch_start = self.relaxations;
                            }
                            cycles.push(cycle);
                            break;
                        }
                        Closing::Blocked => self.deferred.push(u),
                        Closing::Rejected => {
                            log::trace!("Skipping non-negative cycle through loop {}", v);
                        }
                    }
                    continue;
                }

                self.detach_block(v);
                self.unlink(v);
                self.dist[v] = candidate;
                self.pred[v] = Some((NodeId(u), arc, delta));
                self.depth[v] = self.depth[u] + 1;
                self.link_after(u, v);
                if !self.in_queue[v] {
                    self.in_queue[v] = true;
                    self.queue.push_back(v);
                }
            }

            if !cycles.is_empty() && self.relaxations - batch_start >= window {
                return Some(cycles);
            }
        }

        Some(cycles)
    }

    /// Reopen the loops of shifted cycles, whose moves changed cost, and
    /// every node held back while they were pending
    fn release(&mut self, cycles: &[Cycle]) {
        for cycle in cycles {
            for &node in &cycle.nodes {
                self.locked[node] = false;
                self.isolate(node);
                self.enqueue(node);
            }
        }
        while let Some(node) = self.deferred.pop() {
            self.enqueue(node);
        }
    }

    fn enqueue(&mut self, node: usize) {
        if !self.in_queue[node] {
            self.in_queue[node] = true;
            self.queue.push_back(node);
        }
    }

    /// Gather the descendants of `node` into `block`, stopping early with
    /// `true` if `target` is one of them
    fn collect_subtree(&mut self, node: usize, target: usize) -> bool {
        self.block.clear();
        let mut w = self.next[node];
        while self.depth[w] > self.depth[node] {
            if w == target {
                return true;
            }
            self.block.push(w);
            w = self.next[w];
        }
        false
    }

    /// Turn the gathered descendants of `node` into childless roots
    fn detach_block(&mut self, node: usize) {
        let Some(&last) = self.block.last() else {
            return;
        };
        let after = self.next[last];
        self.next[node] = after;
        self.prev[after] = node;

        let source = self.source();
        for i in 0..self.block.len() {
            let w = self.block[i];
            self.pred[w] = None;
            self.depth[w] = 1;
            self.link_after(source, w);
        }
    }

    /// Cut `node` and its descendants loose as childless roots
    fn isolate(&mut self, node: usize) {
        self.collect_subtree(node, usize::MAX);
        self.detach_block(node);
        if self.pred[node].take().is_some() {
            self.unlink(node);
            self.depth[node] = 1;
            let source = self.source();
            self.link_after(source, node);
        }
    }

    fn unlink(&mut self, node: usize) {
        let (before, after) = (self.prev[node], self.next[node]);
        self.next[before] = after;
        self.prev[after] = before;
    }

    fn link_after(&mut self, anchor: usize, node: usize) {
        let after = self.next[anchor];
        self.next[anchor] = node;
        self.prev[node] = anchor;
        self.next[node] = after;
        self.prev[after] = node;
    }

    /// The cycle made of the forest path from `top` down to `bottom` and the
    /// move `bottom -> top`
    fn close_cycle(
        &self,
        bottom: usize,
        top: usize,
        arc: ArcId,
        delta: i32,
        costs: &CostModel,
        flow: &Flow,
    ) -> Closing {
        let mut moves = vec![(arc, delta)];
        let mut nodes = vec![top];
        let mut cost = costs.increment(arc, flow.get(arc), delta);

        let mut node = bottom;
        while node != top {
            let Some((prev, tree_arc, tree_delta)) = self.pred[node] else {
                return Closing::Rejected;
            };
            if self.locked[node] {
                return Closing::Blocked;
            }
            moves.push((tree_arc, tree_delta));
            nodes.push(node);
            cost = cost.saturating_add(costs.increment(tree_arc, flow.get(tree_arc), tree_delta));
            node = prev.0;
        }

        if cost < 0 {
            Closing::Cycle(Cycle { moves, nodes, cost })
        } else {
            Closing::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cost::{CostMode, CostParams};
    use crate::core::graph::wrap_phase;
    use crate::core::initialize::{InitMethod, Initializer};
    use crate::types::{Direction, Pixel};
    use ndarray::Array2;

    fn ramp_graph(rows: usize, cols: usize) -> GridGraph {
        let phase = Array2::from_shape_fn((rows, cols), |(r, c)| wrap_phase(0.3 * r as f32 + 0.2 * c as f32));
        let corr = Array2::from_elem((rows, cols), 0.8f32);
        GridGraph::from_phase(&phase, &corr, None).unwrap()
    }

    /// Shift every arc around `pixel` by one cycle; a cut in the pixel graph
    /// is a cycle in the dual, so loop sums are unchanged
    fn perturb_around(graph: &GridGraph, flow: &mut Flow, pixel: Pixel) {
        let Pixel { row, col } = pixel;
        flow.add(graph.arc_id(Direction::Horizontal, row, col), 1);
        flow.add(graph.arc_id(Direction::Vertical, row, col), 1);
        flow.add(graph.arc_id(Direction::Horizontal, row, col - 1), -1);
        flow.add(graph.arc_id(Direction::Vertical, row - 1, col), -1);
    }

    #[test]
    fn test_repairs_perturbed_flow() {
        let graph = ramp_graph(8, 8);
        let costs = CostModel::new(&graph, CostMode::Smooth, 1.0, CostParams::default()).unwrap();
        let mut flow = Flow::zeros(graph.arc_count());
        perturb_around(&graph, &mut flow, Pixel::new(3, 4));
        assert!(flow.is_conservative(&graph));
        assert!(costs.total_cost(&flow) > 0);

        let report = FlowOptimizer::new().optimize(&graph, &costs, &mut flow);
        assert!(report.converged);
        assert!(report.cycles_canceled >= 1);
        assert_eq!(report.final_cost, 0);
        assert_eq!(flow.nonzero_count(), 0);
    }

    #[test]
    fn test_budget_exhaustion_reported() {
        let graph = ramp_graph(8, 8);
        let costs = CostModel::new(&graph, CostMode::Defo, 1.0, CostParams::default()).unwrap();
        let mut flow = Flow::zeros(graph.arc_count());
        perturb_around(&graph, &mut flow, Pixel::new(4, 4));
        let before = flow.clone();

        let optimizer = FlowOptimizer::with_params(SolverParams {
            max_cycles: 0,
            max_time: None,
        });
        let report = optimizer.optimize(&graph, &costs, &mut flow);
        assert!(!report.converged);
        assert_eq!(report.cycles_canceled, 0);
        assert_eq!(flow, before);
    }

    #[test]
    fn test_repairs_scattered_defects_in_one_run() {
        let graph = ramp_graph(24, 30);
        let costs = CostModel::new(&graph, CostMode::Smooth, 1.0, CostParams::default()).unwrap();
        let mut flow = Flow::zeros(graph.arc_count());
        for (row, col) in [(3, 4), (3, 20), (12, 12), (20, 5), (20, 26)] {
            perturb_around(&graph, &mut flow, Pixel::new(row, col));
        }
        perturb_around(&graph, &mut flow, Pixel::new(12, 12));

        let report = FlowOptimizer::new().optimize(&graph, &costs, &mut flow);
        assert!(report.converged);
        assert!(report.cycles_canceled > 0);
        assert_eq!(report.final_cost, 0);
        assert_eq!(flow.nonzero_count(), 0);
    }

    #[test]
    fn test_time_limit_leaves_flow_untouched() {
        let graph = ramp_graph(16, 16);
        let costs = CostModel::new(&graph, CostMode::Smooth, 1.0, CostParams::default()).unwrap();
        let mut flow = Flow::zeros(graph.arc_count());
        perturb_around(&graph, &mut flow, Pixel::new(8, 8));
        let before = flow.clone();

        let optimizer = FlowOptimizer::with_params(SolverParams {
            max_cycles: usize::MAX,
            max_time: Some(Duration::ZERO),
        });
        let report = optimizer.optimize(&graph, &costs, &mut flow);
        assert!(!report.converged);
        assert_eq!(report.cycles_canceled, 0);
        assert_eq!(report.final_cost, report.initial_cost);
        assert_eq!(flow, before);
        assert!(flow.is_conservative(&graph));
    }

    #[test]
    fn test_search_resumes_from_shifted_loops() {
        let graph = ramp_graph(10, 10);
        let costs = CostModel::new(&graph, CostMode::Defo, 1.0, CostParams::default()).unwrap();
        let mut flow = Flow::zeros(graph.arc_count());
        perturb_around(&graph, &mut flow, Pixel::new(5, 5));

        let mut search = CycleSearch::new(graph.node_count());
        let cycles = search.run(&graph, &costs, &flow, None).unwrap();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].cost < 0);
        for &(arc, delta) in &cycles[0].moves {
            flow.add(arc, delta);
        }
        search.release(&cycles);

        // the next batch starts from the loops of the shifted cycle
        for node in &cycles[0].nodes {
            assert!(search.queue.contains(node));
        }
        assert!(search.queue.len() < graph.node_count() / 4);
        assert!(search.run(&graph, &costs, &flow, None).unwrap().is_empty());
        assert_eq!(flow.nonzero_count(), 0);
        assert!(search.locked.iter().all(|&l| !l));
    }

    #[test]
    fn test_search_gives_up_at_expired_deadline() {
        let graph = ramp_graph(40, 40);
        assert!(graph.node_count() > CLOCK_INTERVAL);
        let costs = CostModel::new(&graph, CostMode::Smooth, 1.0, CostParams::default()).unwrap();
        let flow = Flow::zeros(graph.arc_count());

        let mut search = CycleSearch::new(graph.node_count());
        assert!(search.run(&graph, &costs, &flow, Some(Instant::now())).is_none());

        let mut search = CycleSearch::new(graph.node_count());
        assert!(search.run(&graph, &costs, &flow, None).unwrap().is_empty());
    }

    #[test]
    fn test_default_budget_has_time_limit() {
        let params = SolverParams::default();
        assert!(params.max_time.is_some());
        assert!(params.max_cycles > 0);
    }

    #[test]
    fn test_converged_flow_is_fixed_point() {
        let graph = ramp_graph(12, 9);
        let costs = CostModel::new(&graph, CostMode::Smooth, 2.0, CostParams::default()).unwrap();
        let mut flow = Initializer::new(InitMethod::Mst).initialize(&graph, &costs).unwrap();
        perturb_around(&graph, &mut flow, Pixel::new(5, 5));

        let optimizer = FlowOptimizer::new();
        let first = optimizer.optimize(&graph, &costs, &mut flow);
        assert!(first.converged);
        assert!(flow.is_conservative(&graph));

        let settled = flow.clone();
        let second = optimizer.optimize(&graph, &costs, &mut flow);
        assert!(second.converged);
        assert_eq!(second.cycles_canceled, 0);
        assert_eq!(second.searches, 1);
        assert_eq!(flow, settled);
    }
}
