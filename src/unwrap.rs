//! End-to-end unwrapping pipeline

use crate::core::{
    solve_flow, Component, ComponentLabeler, ConnCompParams, CostMode, CostModel, CostParams,
    GridGraph, InitMethod, ResultAssembler, SolverParams, TileParams, TiledSolver,
};
use crate::types::{Interferogram, LabelRaster, MaskRaster, RealRaster, UnwrapResult};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Full unwrapping configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnwrapConfig {
    pub cost: CostMode,
    pub init: InitMethod,
    pub cost_params: CostParams,
    pub solver: SolverParams,
    pub tiles: TileParams,
    pub conncomp: ConnCompParams,
}

impl UnwrapConfig {
    pub fn new(cost: CostMode, init: InitMethod) -> Self {
        Self {
            cost,
            init,
            ..Self::default()
        }
    }
}

/// Solver statistics reported alongside the result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    /// Loops with a nonzero residue
    pub residues: usize,
    pub initial_cost: i64,
    pub final_cost: i64,
    pub cycles_canceled: usize,
    pub searches: usize,
    pub tiles: usize,
}

/// Unwrapped phase, component labels and solver diagnostics
#[derive(Debug, Clone)]
pub struct UnwrapOutput {
    pub unwrapped: RealRaster,
    pub labels: LabelRaster,
    pub components: Vec<Component>,
    /// False when the optimizer budget ran out first
    pub converged: bool,
    pub stats: SolverStats,
}

/// Phase unwrapping processor
pub struct Unwrapper {
    config: UnwrapConfig,
}

impl Unwrapper {
    pub fn new(config: UnwrapConfig) -> Self {
        Self { config }
    }

    /// Unwrap an interferogram given its coherence, the number of looks and
    /// an optional validity mask (`true` = valid)
    pub fn run(
        &self,
        igram: &Interferogram,
        corr: &RealRaster,
        nlooks: f64,
        mask: Option<&MaskRaster>,
    ) -> UnwrapResult<UnwrapOutput> {
        let start = Instant::now();
        let (rows, cols) = igram.dim();
        log::info!(
            "Unwrapping {}x{} interferogram (cost={}, init={}, nlooks={})",
            rows,
            cols,
            self.config.cost,
            self.config.init,
            nlooks
        );

        let graph = GridGraph::new(igram, corr, mask)?;
        let costs = CostModel::new(&graph, self.config.cost, nlooks, self.config.cost_params.clone())?;
        self.config.tiles.validate(graph.shape())?;

        let (flow, report) = if self.config.tiles.is_tiled() {
            TiledSolver::new(self.config.tiles.clone(), self.config.init, self.config.solver.clone())
                .solve(&graph, &costs)?
        } else {
            solve_flow(&graph, &costs, self.config.init, &self.config.solver)?
        };

        if !report.converged {
            log::warn!(
                "Flow optimization did not converge; returning best flow found (cost {})",
                report.final_cost
            );
        }
        debug_assert!(flow.is_conservative(&graph));

        let components = ComponentLabeler::with_params(self.config.conncomp.clone()).label(&graph, &costs, &flow);
        let unwrapped = ResultAssembler::assemble(&graph, &flow);

        let stats = SolverStats {
            residues: graph.residue_count(),
            initial_cost: report.initial_cost,
            final_cost: report.final_cost,
            cycles_canceled: report.cycles_canceled,
            searches: report.searches,
            tiles: self.config.tiles.ntiles.0 * self.config.tiles.ntiles.1,
        };
        log::info!(
            "Unwrapping finished in {:.2}s: {} components, {} residues",
            start.elapsed().as_secs_f64(),
            components.count(),
            stats.residues
        );

        Ok(UnwrapOutput {
            unwrapped,
            labels: components.labels,
            components: components.components,
            converged: report.converged,
            stats,
        })
    }
}

/// Unwrap with default parameters for the chosen cost family and
/// initialization, returning the unwrapped phase and component labels
pub fn unwrap(
    igram: &Interferogram,
    corr: &RealRaster,
    nlooks: f64,
    mask: Option<&MaskRaster>,
    cost: CostMode,
    init: InitMethod,
) -> UnwrapResult<(RealRaster, LabelRaster)> {
    let output = Unwrapper::new(UnwrapConfig::new(cost, init)).run(igram, corr, nlooks, mask)?;
    Ok((output.unwrapped, output.labels))
}
