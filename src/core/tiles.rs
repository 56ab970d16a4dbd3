//! Tiled solving
//!
//! The raster is split into a grid of tiles whose cores partition the
//! pixels; each tile is solved on its core plus an overlap margin. A tile
//! owns every arc whose tail pixel lies in its core. After all tiles finish,
//! the owned flows are merged, the imbalance left along the seams is routed
//! away and the whole graph is optimized once more.

use crate::core::cost::CostModel;
use crate::core::flow::Flow;
use crate::core::graph::GridGraph;
use crate::core::initialize::{route_imbalances, InitMethod, Initializer};
use crate::core::optimize::{FlowOptimizer, OptimizeReport, SolverParams};
use crate::types::{Shape, UnwrapError, UnwrapResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Tiling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileParams {
    /// Number of tiles along (rows, cols)
    pub ntiles: (usize, usize),
    /// Pixels added around each tile core
    pub overlap: usize,
    /// Worker threads for tile solves
    pub nproc: usize,
}

impl Default for TileParams {
    fn default() -> Self {
        Self {
            ntiles: (1, 1),
            overlap: 8,
            nproc: 1,
        }
    }
}

impl TileParams {
    pub fn is_tiled(&self) -> bool {
        self.ntiles != (1, 1)
    }

    pub fn validate(&self, shape: Shape) -> UnwrapResult<()> {
        let (tile_rows, tile_cols) = self.ntiles;
        if tile_rows == 0 || tile_cols == 0 {
            return Err(UnwrapError::InvalidValue {
                name: "ntiles",
                constraint: "positive in both dimensions",
                value: format!("{:?}", self.ntiles),
            });
        }
        if tile_rows > shape.rows().max(1) || tile_cols > shape.cols().max(1) {
            return Err(UnwrapError::InvalidValue {
                name: "ntiles",
                constraint: "at most one tile per pixel",
                value: format!("{:?} for shape {}", self.ntiles, shape),
            });
        }
        if self.is_tiled() && self.overlap == 0 {
            return Err(UnwrapError::InvalidValue {
                name: "tile overlap",
                constraint: ">= 1",
                value: self.overlap.to_string(),
            });
        }
        if self.nproc == 0 {
            return Err(UnwrapError::InvalidValue {
                name: "nproc",
                constraint: ">= 1",
                value: self.nproc.to_string(),
            });
        }
        Ok(())
    }
}

/// One tile: the core it owns and the window it is solved on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub core_rows: Range<usize>,
    pub core_cols: Range<usize>,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl Tile {
    fn owns(&self, row: usize, col: usize) -> bool {
        self.core_rows.contains(&row) && self.core_cols.contains(&col)
    }
}

fn split(length: usize, parts: usize) -> Vec<Range<usize>> {
    (0..parts)
        .map(|i| (i * length / parts)..((i + 1) * length / parts))
        .collect()
}

/// Tile windows covering a raster of the given shape
pub fn tile_layout(shape: Shape, params: &TileParams) -> Vec<Tile> {
    let grow = |core: &Range<usize>, limit: usize| {
        core.start.saturating_sub(params.overlap)..(core.end + params.overlap).min(limit)
    };
    let row_cores = split(shape.rows(), params.ntiles.0);
    let col_cores = split(shape.cols(), params.ntiles.1);

    row_cores
        .iter()
        .flat_map(|core_rows| {
            col_cores.iter().map(move |core_cols| Tile {
                core_rows: core_rows.clone(),
                core_cols: core_cols.clone(),
                rows: grow(core_rows, shape.rows()),
                cols: grow(core_cols, shape.cols()),
            })
        })
        .collect()
}

/// Initialize and optimize one graph
pub fn solve_flow(
    graph: &GridGraph,
    costs: &CostModel,
    init: InitMethod,
    solver: &SolverParams,
) -> UnwrapResult<(Flow, OptimizeReport)> {
    let mut flow = Initializer::new(init).initialize(graph, costs)?;
    let report = FlowOptimizer::with_params(solver.clone()).optimize(graph, costs, &mut flow);
    Ok((flow, report))
}

struct TileSolution {
    tile: Tile,
    window: GridGraph,
    flow: Flow,
    report: OptimizeReport,
}

/// Solves tiles independently and stitches them into a global flow
pub struct TiledSolver {
    params: TileParams,
    init: InitMethod,
    solver: SolverParams,
}

impl TiledSolver {
    pub fn new(params: TileParams, init: InitMethod, solver: SolverParams) -> Self {
        Self {
            params,
            init,
            solver,
        }
    }

    pub fn solve(&self, graph: &GridGraph, costs: &CostModel) -> UnwrapResult<(Flow, OptimizeReport)> {
        self.params.validate(graph.shape())?;
        let tiles = tile_layout(graph.shape(), &self.params);
        log::info!(
            "Solving {} tiles ({}x{}, overlap {}) with {} workers",
            tiles.len(),
            self.params.ntiles.0,
            self.params.ntiles.1,
            self.params.overlap,
            self.params.nproc
        );

        let solutions = self.solve_tiles(graph, costs, &tiles)?;

        // single writer: owned arcs from every tile
        let mut flow = Flow::zeros(graph.arc_count());
        let mut tile_cycles = 0usize;
        let mut tile_searches = 0usize;
        for solution in &solutions {
            tile_cycles += solution.report.cycles_canceled;
            tile_searches += solution.report.searches;
            if !solution.report.converged {
                log::warn!("Tile {:?}x{:?} did not converge", solution.tile.core_rows, solution.tile.core_cols);
            }
            for arc in solution.window.arcs() {
                let a = solution.window.arc(arc);
                let row = a.row + solution.tile.rows.start;
                let col = a.col + solution.tile.cols.start;
                if solution.tile.owns(row, col) {
                    flow.set(graph.arc_id(a.direction, row, col), solution.flow.get(arc));
                }
            }
        }

        let seam_units = route_imbalances(graph, costs, &mut flow)?;
        log::debug!("Merged {} tiles, routed {} seam units", solutions.len(), seam_units);

        let mut report = FlowOptimizer::with_params(self.solver.clone()).optimize(graph, costs, &mut flow);
        report.cycles_canceled += tile_cycles;
        report.searches += tile_searches;
        Ok((flow, report))
    }

    fn solve_tile(&self, graph: &GridGraph, costs: &CostModel, tile: &Tile) -> UnwrapResult<TileSolution> {
        let window = graph.window(tile.rows.clone(), tile.cols.clone());
        let window_costs = costs.restrict(graph, &window, tile.rows.clone(), tile.cols.clone());
        let (flow, report) = solve_flow(&window, &window_costs, self.init, &self.solver)?;
        Ok(TileSolution {
            tile: tile.clone(),
            window,
            flow,
            report,
        })
    }

    #[cfg(feature = "parallel")]
    fn solve_tiles(&self, graph: &GridGraph, costs: &CostModel, tiles: &[Tile]) -> UnwrapResult<Vec<TileSolution>> {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.nproc)
            .build()
            .map_err(|e| UnwrapError::Processing(format!("Failed to start tile workers: {}", e)))?;
        pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| self.solve_tile(graph, costs, tile))
                .collect()
        })
    }

    #[cfg(not(feature = "parallel"))]
    fn solve_tiles(&self, graph: &GridGraph, costs: &CostModel, tiles: &[Tile]) -> UnwrapResult<Vec<TileSolution>> {
        tiles
            .iter()
            .map(|tile| self.solve_tile(graph, costs, tile))
            .collect()
    }
}
