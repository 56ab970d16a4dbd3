//! Pixel lattice as a planar graph
//!
//! Arcs join 4-adjacent pixels and are stored in a flat arena: horizontal
//! arcs first (row-major over `rows x (cols - 1)`), then vertical arcs
//! (row-major over `(rows - 1) x cols`). The dual graph has one node per
//! elementary 2x2 loop ("cell", row-major over `(rows - 1) x (cols - 1)`)
//! plus a single ground node for the exterior face. All adjacency is
//! computed arithmetically from the arc index.

use crate::core::mask::ValidityMask;
use crate::types::{Direction, IgramSample, Interferogram, MaskRaster, Pixel, RealRaster, Shape, UnwrapResult};
use ndarray::{s, Array2};
use num_traits::{Float, FloatConst};
use std::f64::consts::PI;
use std::ops::Range;

const TWO_PI: f64 = 2.0 * PI;

/// Wrap an angle to the principal interval (-π, π]
#[inline]
pub fn wrap_phase<T: Float + FloatConst>(angle: T) -> T {
    let two_pi = T::PI() + T::PI();
    let wrapped = angle - two_pi * (angle / two_pi).round();
    if wrapped <= -T::PI() {
        wrapped + two_pi
    } else {
        wrapped
    }
}

/// Index of an arc in the arc arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArcId(pub usize);

/// Index of a dual node (cell or ground)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Geometric description of an arc: its tail pixel and direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arc {
    pub direction: Direction,
    pub row: usize,
    pub col: usize,
}

impl Arc {
    pub fn tail(&self) -> Pixel {
        Pixel::new(self.row, self.col)
    }

    pub fn head(&self) -> Pixel {
        match self.direction {
            Direction::Horizontal => Pixel::new(self.row, self.col + 1),
            Direction::Vertical => Pixel::new(self.row + 1, self.col),
        }
    }
}

/// Arcs incident to a dual node
pub enum IncidentArcs<'a> {
    Cell { arcs: [ArcId; 4], next: usize },
    Ground(std::slice::Iter<'a, ArcId>),
}

impl<'a> Iterator for IncidentArcs<'a> {
    type Item = ArcId;

    fn next(&mut self) -> Option<ArcId> {
        match self {
            IncidentArcs::Cell { arcs, next } => {
                let arc = arcs.get(*next).copied();
                *next += 1;
                arc
            }
            IncidentArcs::Ground(iter) => iter.next().copied(),
        }
    }
}

/// Planar grid graph over the wrapped-phase raster
#[derive(Debug, Clone)]
pub struct GridGraph {
    rows: usize,
    cols: usize,
    /// Raw wrapped phase, kept for invalid pixels in the output
    wrapped: RealRaster,
    /// Wrapped phase with invalid samples replaced by zero
    phase: Array2<f64>,
    coherence: RealRaster,
    mask: ValidityMask,
    /// Principal-value phase difference along each arc
    gradients: Vec<f64>,
    /// Integer cycles removed by wrapping: gradient = head - tail - 2π·wrap
    wraps: Vec<i32>,
    /// Residue of every dual node, ground last
    residues: Vec<i32>,
    ground_arcs: Vec<ArcId>,
    horizontal_count: usize,
}

impl GridGraph {
    /// Build the graph from an interferogram, its coherence and an optional mask
    pub fn new(
        igram: &Interferogram,
        corr: &RealRaster,
        mask: Option<&MaskRaster>,
    ) -> UnwrapResult<Self> {
        let mask = ValidityMask::from_inputs(igram, corr, mask)?;
        let wrapped = igram.mapv(|sample| wrap_phase(sample.arg()));
        Ok(Self::from_parts(wrapped, corr.clone(), mask))
    }

    /// Build the graph from an already wrapped phase raster
    pub fn from_phase(
        phase: &RealRaster,
        corr: &RealRaster,
        mask: Option<&MaskRaster>,
    ) -> UnwrapResult<Self> {
        let igram = phase.mapv(|p| IgramSample::from_polar(1.0, p));
        let mask = ValidityMask::from_inputs(&igram, corr, mask)?;
        let wrapped = phase.mapv(wrap_phase::<f32>);
        Ok(Self::from_parts(wrapped, corr.clone(), mask))
    }

    fn from_parts(wrapped: RealRaster, coherence: RealRaster, mask: ValidityMask) -> Self {
        let (rows, cols) = wrapped.dim();

        let mut phase = Array2::<f64>::zeros((rows, cols));
        let mut clean_coherence = Array2::<f32>::zeros((rows, cols));
        for ((r, c), &p) in wrapped.indexed_iter() {
            if mask.is_valid(Pixel::new(r, c)) {
                phase[[r, c]] = p as f64;
                clean_coherence[[r, c]] = coherence[[r, c]];
            }
        }

        let horizontal_count = rows * cols.saturating_sub(1);
        let vertical_count = rows.saturating_sub(1) * cols;
        let arc_count = horizontal_count + vertical_count;

        let mut graph = Self {
            rows,
            cols,
            wrapped,
            phase,
            coherence: clean_coherence,
            mask,
            gradients: Vec::with_capacity(arc_count),
            wraps: Vec::with_capacity(arc_count),
            residues: Vec::new(),
            ground_arcs: Vec::new(),
            horizontal_count,
        };

        for index in 0..arc_count {
            let arc = graph.arc(ArcId(index));
            let tail = arc.tail();
            let head = arc.head();
            let diff = graph.phase[[head.row, head.col]] - graph.phase[[tail.row, tail.col]];
            let wrap = (diff / TWO_PI).round();
            graph.gradients.push(diff - TWO_PI * wrap);
            graph.wraps.push(wrap as i32);
        }

        graph.ground_arcs = (0..arc_count)
            .map(ArcId)
            .filter(|&a| graph.pos_node(a) == graph.ground() || graph.neg_node(a) == graph.ground())
            .collect();

        let mut residues = vec![0i32; graph.node_count()];
        let mut total = 0i32;
        let mut charged = 0usize;
        for cell in graph.cells() {
            let residue: i32 = graph
                .loop_arcs(cell)
                .iter()
                .map(|&(arc, sign)| sign * graph.wraps[arc.0])
                .sum();
            if residue != 0 {
                charged += 1;
            }
            residues[cell.0] = residue;
            total += residue;
        }
        residues[graph.ground().0] = -total;
        graph.residues = residues;

        log::debug!(
            "Grid graph {}x{}: {} arcs, {} loops, {} residues",
            rows,
            cols,
            arc_count,
            graph.cell_count(),
            charged
        );

        graph
    }

    /// Sub-graph over a window of pixels, sharing phase, coherence and mask
    pub fn window(&self, rows: Range<usize>, cols: Range<usize>) -> Self {
        let wrapped = self.wrapped.slice(s![rows.clone(), cols.clone()]).to_owned();
        let coherence = self.coherence.slice(s![rows.clone(), cols.clone()]).to_owned();
        let mask = self.mask.window(rows, cols);
        Self::from_parts(wrapped, coherence, mask)
    }

    pub fn shape(&self) -> Shape {
        Shape(self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn mask(&self) -> &ValidityMask {
        &self.mask
    }

    pub fn arc_count(&self) -> usize {
        self.gradients.len()
    }

    pub fn arcs(&self) -> impl Iterator<Item = ArcId> {
        (0..self.arc_count()).map(ArcId)
    }

    /// Decode an arc index into its tail pixel and direction
    #[inline]
    pub fn arc(&self, id: ArcId) -> Arc {
        if id.0 < self.horizontal_count {
            let width = self.cols - 1;
            Arc {
                direction: Direction::Horizontal,
                row: id.0 / width,
                col: id.0 % width,
            }
        } else {
            let index = id.0 - self.horizontal_count;
            Arc {
                direction: Direction::Vertical,
                row: index / self.cols,
                col: index % self.cols,
            }
        }
    }

    /// Encode a tail pixel and direction into an arc index
    #[inline]
    pub fn arc_id(&self, direction: Direction, row: usize, col: usize) -> ArcId {
        match direction {
            Direction::Horizontal => ArcId(row * (self.cols - 1) + col),
            Direction::Vertical => ArcId(self.horizontal_count + row * self.cols + col),
        }
    }

    /// Wrapped phase gradient from tail to head
    #[inline]
    pub fn gradient(&self, arc: ArcId) -> f64 {
        self.gradients[arc.0]
    }

    /// Cycles removed when wrapping the raw difference of the endpoint phases
    #[inline]
    pub fn wrap_count(&self, arc: ArcId) -> i32 {
        self.wraps[arc.0]
    }

    /// Whether the arc joins two valid pixels
    #[inline]
    pub fn is_valid_arc(&self, arc: ArcId) -> bool {
        let a = self.arc(arc);
        self.mask.is_valid_pair(a.tail(), a.head())
    }

    /// Mean coherence of the arc endpoints
    #[inline]
    pub fn arc_coherence(&self, arc: ArcId) -> f32 {
        let a = self.arc(arc);
        let (t, h) = (a.tail(), a.head());
        0.5 * (self.coherence[[t.row, t.col]] + self.coherence[[h.row, h.col]])
    }

    /// Sanitized wrapped phase (0 at invalid pixels)
    pub fn phase(&self, pixel: Pixel) -> f64 {
        self.phase[[pixel.row, pixel.col]]
    }

    /// Raw wrapped phase as observed
    pub fn wrapped(&self) -> &RealRaster {
        &self.wrapped
    }

    /// 4-neighbours of a pixel together with the connecting arc
    pub fn neighbors(&self, pixel: Pixel) -> impl Iterator<Item = (Pixel, ArcId)> + '_ {
        let Pixel { row, col } = pixel;
        let left = (col > 0).then(|| (Pixel::new(row, col - 1), self.arc_id(Direction::Horizontal, row, col - 1)));
        let right = (col + 1 < self.cols).then(|| (Pixel::new(row, col + 1), self.arc_id(Direction::Horizontal, row, col)));
        let up = (row > 0).then(|| (Pixel::new(row - 1, col), self.arc_id(Direction::Vertical, row - 1, col)));
        let down = (row + 1 < self.rows).then(|| (Pixel::new(row + 1, col), self.arc_id(Direction::Vertical, row, col)));
        [left, right, up, down].into_iter().flatten()
    }

    // ---- dual graph ----

    pub fn cell_count(&self) -> usize {
        self.rows.saturating_sub(1) * self.cols.saturating_sub(1)
    }

    pub fn node_count(&self) -> usize {
        self.cell_count() + 1
    }

    #[inline]
    pub fn ground(&self) -> NodeId {
        NodeId(self.cell_count())
    }

    #[inline]
    pub fn cell(&self, row: usize, col: usize) -> NodeId {
        NodeId(row * (self.cols - 1) + col)
    }

    /// Elementary loops, one per cell
    pub fn cells(&self) -> impl Iterator<Item = NodeId> {
        (0..self.cell_count()).map(NodeId)
    }

    /// Upper-left pixel of a cell
    pub fn cell_origin(&self, cell: NodeId) -> Pixel {
        let width = self.cols - 1;
        Pixel::new(cell.0 / width, cell.0 % width)
    }

    /// Arcs of an elementary loop with their orientation along a clockwise
    /// traversal (top, right, bottom, left)
    pub fn loop_arcs(&self, cell: NodeId) -> [(ArcId, i32); 4] {
        let Pixel { row, col } = self.cell_origin(cell);
        [
            (self.arc_id(Direction::Horizontal, row, col), 1),
            (self.arc_id(Direction::Vertical, row, col + 1), 1),
            (self.arc_id(Direction::Horizontal, row + 1, col), -1),
            (self.arc_id(Direction::Vertical, row, col), -1),
        ]
    }

    /// Required signed flow sum around a node: loops must carry exactly
    /// their residue for the unwrapped gradients to be curl-free
    #[inline]
    pub fn loop_residue(&self, node: NodeId) -> i32 {
        self.residues[node.0]
    }

    /// Number of loops with a nonzero residue
    pub fn residue_count(&self) -> usize {
        self.residues[..self.cell_count()].iter().filter(|&&r| r != 0).count()
    }

    /// Dual node on which the arc counts positively
    #[inline]
    pub fn pos_node(&self, arc: ArcId) -> NodeId {
        let a = self.arc(arc);
        match a.direction {
            Direction::Horizontal if a.row + 1 < self.rows => self.cell(a.row, a.col),
            Direction::Vertical if a.col > 0 => self.cell(a.row, a.col - 1),
            _ => self.ground(),
        }
    }

    /// Dual node on which the arc counts negatively
    #[inline]
    pub fn neg_node(&self, arc: ArcId) -> NodeId {
        let a = self.arc(arc);
        match a.direction {
            Direction::Horizontal if a.row > 0 => self.cell(a.row - 1, a.col),
            Direction::Vertical if a.col + 1 < self.cols => self.cell(a.row, a.col),
            _ => self.ground(),
        }
    }

    /// Arcs bounding a dual node
    pub fn incident_arcs(&self, node: NodeId) -> IncidentArcs<'_> {
        if node == self.ground() {
            IncidentArcs::Ground(self.ground_arcs.iter())
        } else {
            let arcs = self.loop_arcs(node);
            IncidentArcs::Cell {
                arcs: [arcs[0].0, arcs[1].0, arcs[2].0, arcs[3].0],
                next: 0,
            }
        }
    }

    /// Unit flow changes that carry one unit of imbalance out of `node`:
    /// `+1` on arcs where it is the positive endpoint (towards the negative
    /// one) and `-1` on arcs where it is the negative endpoint. Yields
    /// `(arc, destination, delta)`.
    pub fn moves(&self, node: NodeId) -> impl Iterator<Item = (ArcId, NodeId, i32)> + '_ {
        self.incident_arcs(node).flat_map(move |arc| {
            let pos = self.pos_node(arc);
            let neg = self.neg_node(arc);
            let forward = (pos == node).then_some((arc, neg, 1));
            let backward = (neg == node).then_some((arc, pos, -1));
            forward.into_iter().chain(backward)
        })
    }
}
