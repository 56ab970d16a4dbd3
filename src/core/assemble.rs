use crate::core::flow::Flow;
use crate::core::graph::GridGraph;
use crate::types::{Pixel, RealRaster};
use ndarray::Array2;
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Turns a conservative flow into absolute phase by path integration
pub struct ResultAssembler;

impl ResultAssembler {
    /// Integrate cycle counts from the first pixel (raster order) of every
    /// region of valid pixels. Each step across an arc adds `flow - wrap`
    /// cycles, which does not depend on the path taken because every loop
    /// carries its residue. Invalid pixels keep their observed wrapped phase.
    pub fn assemble(graph: &GridGraph, flow: &Flow) -> RealRaster {
        let (rows, cols) = (graph.rows(), graph.cols());
        let mask = graph.mask();
        let wrapped = graph.wrapped();

        let mut cycles: Array2<i64> = Array2::zeros((rows, cols));
        let mut visited = Array2::from_elem((rows, cols), false);
        let mut queue = VecDeque::new();
        let mut regions = 0usize;

        for row in 0..rows {
            for col in 0..cols {
                let seed = Pixel::new(row, col);
                if visited[[row, col]] || !mask.is_valid(seed) {
                    continue;
                }
                regions += 1;
                visited[[row, col]] = true;
                queue.push_back(seed);

                while let Some(pixel) = queue.pop_front() {
                    let here = cycles[[pixel.row, pixel.col]];
                    for (neighbor, arc) in graph.neighbors(pixel) {
                        if visited[[neighbor.row, neighbor.col]] || !mask.is_valid(neighbor) {
                            continue;
                        }
                        let step = (flow.get(arc) - graph.wrap_count(arc)) as i64;
                        let forward = graph.arc(arc).tail() == pixel;
                        cycles[[neighbor.row, neighbor.col]] = if forward { here + step } else { here - step };
                        visited[[neighbor.row, neighbor.col]] = true;
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        log::debug!("Integrated {} regions", regions);

        let mut unwrapped = wrapped.clone();
        for ((row, col), value) in unwrapped.indexed_iter_mut() {
            if visited[[row, col]] {
                *value = (*value as f64 + 2.0 * PI * cycles[[row, col]] as f64) as f32;
            }
        }
        unwrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::wrap_phase;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_zero_flow_integrates_wrapped_ramp() {
        let truth = Array2::from_shape_fn((6, 10), |(r, c)| 0.9 * c as f32 - 0.4 * r as f32);
        let phase = truth.mapv(wrap_phase);
        let corr = Array2::from_elem((6, 10), 1.0f32);
        let graph = GridGraph::from_phase(&phase, &corr, None).unwrap();

        let unwrapped = ResultAssembler::assemble(&graph, &Flow::zeros(graph.arc_count()));
        let offset = unwrapped[[0, 0]] - truth[[0, 0]];
        for ((r, c), &value) in unwrapped.indexed_iter() {
            assert_abs_diff_eq!(value - offset, truth[[r, c]], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_invalid_pixels_keep_wrapped_phase() {
        let phase = Array2::from_shape_fn((4, 4), |(r, c)| wrap_phase(1.7 * (r + c) as f32));
        let corr = Array2::from_elem((4, 4), 1.0f32);
        let mut mask = Array2::from_elem((4, 4), true);
        mask[[2, 3]] = false;
        let graph = GridGraph::from_phase(&phase, &corr, Some(&mask)).unwrap();

        let unwrapped = ResultAssembler::assemble(&graph, &Flow::zeros(graph.arc_count()));
        assert_eq!(unwrapped[[2, 3]], phase[[2, 3]]);
        assert_abs_diff_eq!(unwrapped[[3, 3]] - unwrapped[[0, 0]], 1.7 * 6.0, epsilon = 1e-4);
    }
}
