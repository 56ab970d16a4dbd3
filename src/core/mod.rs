//! Core phase unwrapping modules

pub mod assemble;
pub mod bucket_queue;
pub mod conncomp;
pub mod cost;
pub mod flow;
pub mod graph;
pub mod initialize;
pub mod mask;
pub mod optimize;
pub mod tiles;

// Re-export main types
pub use assemble::ResultAssembler;
pub use conncomp::{Component, ComponentLabeler, Components, ConnCompParams};
pub use cost::{CostMode, CostModel, CostParams, INFINITE_COST};
pub use flow::Flow;
pub use graph::{wrap_phase, Arc, ArcId, GridGraph, NodeId};
pub use initialize::{route_imbalances, InitMethod, Initializer};
pub use mask::ValidityMask;
pub use optimize::{FlowOptimizer, OptimizeReport, SolverParams};
pub use tiles::{solve_flow, tile_layout, Tile, TileParams, TiledSolver};
