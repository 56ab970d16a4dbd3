//! Statistical arc costs
//!
//! Each arc gets a closed-form penalty on the unwrapped gradient it implies,
//! `x = |gradient - expected + 2π·flow|`, scaled by the inverse phase variance
//! predicted from coherence and the number of looks. Costs are quantized to
//! integers so that cycle comparisons in the solvers are exact.

use crate::core::flow::Flow;
use crate::core::graph::{ArcId, GridGraph};
use crate::types::{Direction, UnwrapError, UnwrapResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

const TWO_PI: f64 = 2.0 * PI;

/// Cost of a flow beyond the allowed magnitude; small enough that sums of a
/// few of them do not overflow
pub const INFINITE_COST: i64 = i64::MAX / 4;

/// Variance of a uniformly distributed phase, the upper bound for σ²
const MAX_VARIANCE: f64 = PI * PI / 3.0;

/// Statistical cost family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    /// Gaussian penalty around a locally estimated gradient
    #[default]
    Smooth,
    /// Zero-mean penalty that tolerates sharp discontinuities
    Defo,
}

impl CostMode {
    pub const ALL: [CostMode; 2] = [CostMode::Smooth, CostMode::Defo];

    pub fn as_str(&self) -> &'static str {
        match self {
            CostMode::Smooth => "smooth",
            CostMode::Defo => "defo",
        }
    }
}

impl fmt::Display for CostMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostMode {
    type Err = UnwrapError;

    fn from_str(s: &str) -> UnwrapResult<Self> {
        CostMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = CostMode::ALL.iter().map(|m| m.as_str()).collect();
                UnwrapError::invalid_option("cost mode", &names, s)
            })
    }
}

/// Cost model parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostParams {
    /// Multiplier applied before quantizing to integers
    pub scale: f64,
    /// Coherence is clamped to [min_coherence, max_coherence]
    pub min_coherence: f32,
    pub max_coherence: f32,
    /// Added to every predicted phase variance (rad²)
    pub variance_floor: f64,
    /// Half-width of the window used to estimate the expected gradient
    pub gradient_window: usize,
    /// Defo costs turn linear beyond this many standard deviations
    pub defo_threshold: f64,
    /// Largest |flow| an arc may carry
    pub max_flow: i32,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            scale: 100.0,
            min_coherence: 0.01,
            max_coherence: 0.99,
            variance_floor: 1e-3,
            gradient_window: 2, // 5x5 arcs
            defo_threshold: 2.0,
            max_flow: 256,
        }
    }
}

/// Per-arc cost functions for one graph
#[derive(Debug, Clone)]
pub struct CostModel {
    mode: CostMode,
    params: CostParams,
    /// gradient - expected gradient
    offset: Vec<f64>,
    /// scale / (2σ²)
    weight: Vec<f64>,
    /// Huber knee for defo costs
    threshold: Vec<f64>,
    free: Vec<bool>,
}

impl CostModel {
    /// Build costs for every arc of `graph`
    pub fn new(
        graph: &GridGraph,
        mode: CostMode,
        nlooks: f64,
        params: CostParams,
    ) -> UnwrapResult<Self> {
        if !(nlooks >= 1.0) {
            return Err(UnwrapError::InvalidValue {
                name: "nlooks",
                constraint: ">= 1",
                value: format!("{}", nlooks),
            });
        }
        if !(params.scale > 0.0) || params.max_flow < 1 {
            return Err(UnwrapError::Processing(format!(
                "Invalid cost parameters: scale={} max_flow={}",
                params.scale, params.max_flow
            )));
        }
        if !(params.min_coherence <= params.max_coherence) {
            return Err(UnwrapError::Processing(format!(
                "Invalid coherence bounds: min_coherence={} exceeds max_coherence={}",
                params.min_coherence, params.max_coherence
            )));
        }

        log::debug!("Cost model: mode={} nlooks={} params={:?}", mode, nlooks, params);

        let expected = match mode {
            CostMode::Smooth => expected_gradients(graph, params.gradient_window),
            CostMode::Defo => vec![0.0; graph.arc_count()],
        };

        let arc_count = graph.arc_count();
        let mut offset = Vec::with_capacity(arc_count);
        let mut weight = Vec::with_capacity(arc_count);
        let mut threshold = Vec::with_capacity(arc_count);
        let mut free = Vec::with_capacity(arc_count);

        for arc in graph.arcs() {
            let valid = graph.is_valid_arc(arc);
            free.push(!valid);
            if !valid {
                offset.push(0.0);
                weight.push(0.0);
                threshold.push(0.0);
                continue;
            }

            let gamma = graph
                .arc_coherence(arc)
                .clamp(params.min_coherence, params.max_coherence) as f64;
            let variance = ((1.0 - gamma * gamma) / (2.0 * nlooks * gamma * gamma)
                + params.variance_floor)
                .min(MAX_VARIANCE);

            offset.push(graph.gradient(arc) - expected[arc.0]);
            weight.push(params.scale / (2.0 * variance));
            threshold.push((params.defo_threshold * variance.sqrt()).min(PI));
        }

        Ok(Self {
            mode,
            params,
            offset,
            weight,
            threshold,
            free,
        })
    }

    /// Costs for a window of the graph this model was built on, with arcs
    /// renumbered for `window` (the sub-graph over `rows` x `cols`)
    pub fn restrict(
        &self,
        graph: &GridGraph,
        window: &GridGraph,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> Self {
        debug_assert_eq!(window.rows(), rows.len());
        debug_assert_eq!(window.cols(), cols.len());

        let parent: Vec<usize> = window
            .arcs()
            .map(|arc| {
                let a = window.arc(arc);
                graph
                    .arc_id(a.direction, a.row + rows.start, a.col + cols.start)
                    .0
            })
            .collect();

        Self {
            mode: self.mode,
            params: self.params.clone(),
            offset: parent.iter().map(|&i| self.offset[i]).collect(),
            weight: parent.iter().map(|&i| self.weight[i]).collect(),
            threshold: parent.iter().map(|&i| self.threshold[i]).collect(),
            free: parent.iter().map(|&i| self.free[i]).collect(),
        }
    }

    /// Arcs touching an invalid pixel cost nothing at any flow
    #[inline]
    pub fn is_free(&self, arc: ArcId) -> bool {
        self.free[arc.0]
    }

    /// Cost of carrying `flow` cycles on `arc`
    #[inline]
    pub fn cost(&self, arc: ArcId, flow: i32) -> i64 {
        if self.free[arc.0] {
            return 0;
        }
        if flow.abs() > self.params.max_flow {
            return INFINITE_COST;
        }
        let x = (self.offset[arc.0] + TWO_PI * flow as f64).abs();
        let rho = match self.mode {
            CostMode::Smooth => x * x,
            CostMode::Defo => {
                let tau = self.threshold[arc.0];
                if x <= tau {
                    x * x
                } else {
                    tau * (2.0 * x - tau)
                }
            }
        };
        quantize(self.weight[arc.0] * rho)
    }

    /// Change in cost when the flow on `arc` moves from `flow` to `flow + delta`
    #[inline]
    pub fn increment(&self, arc: ArcId, flow: i32, delta: i32) -> i64 {
        self.cost(arc, flow + delta) - self.cost(arc, flow)
    }

    /// Flow minimizing this arc's cost in isolation
    pub fn baseline_flow(&self, arc: ArcId) -> i32 {
        if self.free[arc.0] {
            return 0;
        }
        let k = (-self.offset[arc.0] / TWO_PI).round() as i32;
        k.clamp(-self.params.max_flow, self.params.max_flow)
    }

    /// Price of moving one cycle either way away from `flow`
    pub fn reliability(&self, arc: ArcId, flow: i32) -> i64 {
        self.increment(arc, flow, 1).min(self.increment(arc, flow, -1))
    }

    /// Total cost of a flow over all arcs
    pub fn total_cost(&self, flow: &Flow) -> i64 {
        flow.as_slice()
            .iter()
            .enumerate()
            .fold(0i64, |acc, (i, &k)| acc.saturating_add(self.cost(ArcId(i), k)))
    }

    pub fn arc_count(&self) -> usize {
        self.free.len()
    }
}

#[inline]
fn quantize(value: f64) -> i64 {
    if value >= INFINITE_COST as f64 {
        INFINITE_COST
    } else {
        value.round() as i64
    }
}

/// Inclusive-exclusive 2D prefix sums
struct SummedArea {
    table: Array2<f64>,
}

impl SummedArea {
    fn new(rows: usize, cols: usize, value: impl Fn(usize, usize) -> f64) -> Self {
        let mut table = Array2::<f64>::zeros((rows + 1, cols + 1));
        for r in 0..rows {
            let mut row_sum = 0.0;
            for c in 0..cols {
                row_sum += value(r, c);
                table[[r + 1, c + 1]] = table[[r, c + 1]] + row_sum;
            }
        }
        Self { table }
    }

    fn sum(&self, rows: Range<usize>, cols: Range<usize>) -> f64 {
        self.table[[rows.end, cols.end]] - self.table[[rows.start, cols.end]]
            - self.table[[rows.end, cols.start]]
            + self.table[[rows.start, cols.start]]
    }
}

/// Circular mean of same-direction gradients over valid arcs in a
/// `(2·half + 1)²` window around each arc
fn expected_gradients(graph: &GridGraph, half: usize) -> Vec<f64> {
    let mut expected = vec![0.0; graph.arc_count()];
    let (rows, cols) = (graph.rows(), graph.cols());

    for (direction, height, width) in [
        (Direction::Horizontal, rows, cols.saturating_sub(1)),
        (Direction::Vertical, rows.saturating_sub(1), cols),
    ] {
        if height == 0 || width == 0 {
            continue;
        }
        let sample = |r: usize, c: usize| {
            let arc = graph.arc_id(direction, r, c);
            graph.is_valid_arc(arc).then(|| graph.gradient(arc))
        };
        let sin_sum = SummedArea::new(height, width, |r, c| sample(r, c).map_or(0.0, f64::sin));
        let cos_sum = SummedArea::new(height, width, |r, c| sample(r, c).map_or(0.0, f64::cos));

        for r in 0..height {
            let rows = r.saturating_sub(half)..(r + half + 1).min(height);
            for c in 0..width {
                let cols = c.saturating_sub(half)..(c + half + 1).min(width);
                let s = sin_sum.sum(rows.clone(), cols.clone());
                let k = cos_sum.sum(rows.clone(), cols);
                if s != 0.0 || k != 0.0 {
                    expected[graph.arc_id(direction, r, c).0] = s.atan2(k);
                }
            }
        }
    }

    expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::wrap_phase;
    use approx::assert_abs_diff_eq;

    fn ramp_graph(slope: f32, coherence: f32) -> GridGraph {
        let phase = Array2::from_shape_fn((6, 6), |(r, c)| wrap_phase(slope * (r + c) as f32));
        let corr = Array2::from_elem((6, 6), coherence);
        GridGraph::from_phase(&phase, &corr, None).unwrap()
    }

    #[test]
    fn test_parse_cost_mode() {
        assert_eq!("smooth".parse::<CostMode>().unwrap(), CostMode::Smooth);
        assert_eq!("defo".parse::<CostMode>().unwrap(), CostMode::Defo);
        let err = "asdf".parse::<CostMode>().unwrap_err();
        assert_eq!(err.to_string(), "cost mode must be in {'defo', 'smooth'}, instead got 'asdf'");
        assert_eq!(CostMode::default(), CostMode::Smooth);
    }

    #[test]
    fn test_nlooks_rejected() {
        let graph = ramp_graph(0.5, 0.8);
        let err = CostModel::new(&graph, CostMode::Smooth, 0.0, CostParams::default()).unwrap_err();
        assert_eq!(err.to_string(), "nlooks must be >= 1, instead got 0");
    }

    #[test]
    fn test_inverted_coherence_bounds_rejected() {
        let graph = ramp_graph(0.5, 0.8);
        let params = CostParams {
            min_coherence: 0.9,
            max_coherence: 0.2,
            ..CostParams::default()
        };
        let err = CostModel::new(&graph, CostMode::Defo, 1.0, params).unwrap_err();
        assert!(matches!(err, UnwrapError::Processing(_)));
        assert!(err.to_string().contains("min_coherence=0.9"));
    }

    #[test]
    fn test_smooth_increments_convex() {
        let graph = ramp_graph(1.7, 0.4);
        let model = CostModel::new(&graph, CostMode::Smooth, 1.0, CostParams::default()).unwrap();
        for arc in graph.arcs() {
            for k in -3..3 {
                assert!(model.increment(arc, k + 1, 1) > model.increment(arc, k, 1));
            }
        }
    }

    #[test]
    fn test_smooth_expected_gradient_tracks_ramp() {
        let graph = ramp_graph(0.5, 0.9);
        let model = CostModel::new(&graph, CostMode::Smooth, 1.0, CostParams::default()).unwrap();
        for arc in graph.arcs() {
            assert_eq!(model.baseline_flow(arc), 0);
            assert!(model.cost(arc, 0) <= 1);
            assert!(model.cost(arc, 1) > 1000);
        }
    }

    #[test]
    fn test_costs_monotone_away_from_baseline() {
        let graph = ramp_graph(2.5, 0.6);
        for mode in CostMode::ALL {
            let model = CostModel::new(&graph, mode, 4.0, CostParams::default()).unwrap();
            for arc in graph.arcs() {
                let k0 = model.baseline_flow(arc);
                for step in 0..4 {
                    assert!(model.cost(arc, k0 + step + 1) >= model.cost(arc, k0 + step));
                    assert!(model.cost(arc, k0 - step - 1) >= model.cost(arc, k0 - step));
                }
            }
        }
    }

    #[test]
    fn test_defo_cheaper_than_smooth_for_large_jumps() {
        let graph = ramp_graph(0.0, 0.9);
        let params = CostParams::default();
        let smooth = CostModel::new(&graph, CostMode::Smooth, 1.0, params.clone()).unwrap();
        let defo = CostModel::new(&graph, CostMode::Defo, 1.0, params).unwrap();
        let arc = ArcId(0);
        assert_eq!(smooth.cost(arc, 0), 0);
        assert_eq!(defo.cost(arc, 0), 0);
        assert!(defo.cost(arc, 3) < smooth.cost(arc, 3));
        assert!(defo.increment(arc, 3, 1) < smooth.increment(arc, 3, 1));
    }

    #[test]
    fn test_flow_beyond_limit_is_infinite() {
        let graph = ramp_graph(0.1, 0.9);
        let params = CostParams {
            max_flow: 2,
            ..CostParams::default()
        };
        let model = CostModel::new(&graph, CostMode::Smooth, 1.0, params).unwrap();
        assert!(model.cost(ArcId(0), 2) < INFINITE_COST);
        assert_eq!(model.cost(ArcId(0), 3), INFINITE_COST);
        assert_eq!(model.cost(ArcId(0), -3), INFINITE_COST);
    }

    #[test]
    fn test_masked_arcs_are_free() {
        let phase = Array2::from_shape_fn((4, 4), |(r, c)| 0.3 * (r * c) as f32);
        let corr = Array2::from_elem((4, 4), 0.9f32);
        let mut mask = Array2::from_elem((4, 4), true);
        mask[[1, 1]] = false;
        let graph = GridGraph::from_phase(&phase, &corr, Some(&mask)).unwrap();
        let model = CostModel::new(&graph, CostMode::Defo, 1.0, CostParams::default()).unwrap();

        let arc = graph.arc_id(Direction::Horizontal, 1, 0);
        assert!(model.is_free(arc));
        assert_eq!(model.cost(arc, 5), 0);
        assert_eq!(model.baseline_flow(arc), 0);
        assert!(!model.is_free(graph.arc_id(Direction::Horizontal, 0, 0)));
    }

    #[test]
    fn test_restrict_matches_parent_costs() {
        let graph = ramp_graph(1.3, 0.7);
        let model = CostModel::new(&graph, CostMode::Smooth, 2.0, CostParams::default()).unwrap();
        let window = graph.window(1..5, 2..6);
        let local = model.restrict(&graph, &window, 1..5, 2..6);

        assert_eq!(local.arc_count(), window.arc_count());
        for arc in window.arcs() {
            let a = window.arc(arc);
            let parent = graph.arc_id(a.direction, a.row + 1, a.col + 2);
            assert_eq!(local.cost(arc, 1), model.cost(parent, 1));
            assert_abs_diff_eq!(window.gradient(arc), graph.gradient(parent), epsilon = 1e-9);
        }
    }
}
