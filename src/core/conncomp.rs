use crate::core::cost::CostModel;
use crate::core::flow::Flow;
use crate::core::graph::GridGraph;
use crate::types::{LabelRaster, Pixel};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Connected-component labeling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnCompParams {
    /// Arcs whose price of one more cycle is below this do not join
    /// pixels; 0 disables the test
    pub cost_threshold: i64,
    /// Components smaller than this fraction of the valid pixels become
    /// background
    pub min_size_fraction: f64,
    /// Keep at most this many of the largest components
    pub max_components: Option<usize>,
}

impl Default for ConnCompParams {
    fn default() -> Self {
        Self {
            cost_threshold: 0,
            min_size_fraction: 0.0,
            max_components: None,
        }
    }
}

/// One labeled region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub label: u32,
    /// First pixel of the region in raster order
    pub reference: Pixel,
    pub size: usize,
}

/// Labels plus per-component summaries
#[derive(Debug, Clone)]
pub struct Components {
    pub labels: LabelRaster,
    pub components: Vec<Component>,
}

impl Components {
    pub fn count(&self) -> usize {
        self.components.len()
    }
}

/// 4-connected labeling over valid pixels
pub struct ComponentLabeler {
    params: ConnCompParams,
}

impl ComponentLabeler {
    pub fn new() -> Self {
        Self {
            params: ConnCompParams::default(),
        }
    }

    pub fn with_params(params: ConnCompParams) -> Self {
        Self { params }
    }

    pub fn label(&self, graph: &GridGraph, costs: &CostModel, flow: &Flow) -> Components {
        let (rows, cols) = (graph.rows(), graph.cols());
        let mask = graph.mask();
        let mut labels: LabelRaster = Array2::zeros((rows, cols));
        let mut found: Vec<Component> = Vec::new();
        let mut queue = VecDeque::new();

        for row in 0..rows {
            for col in 0..cols {
                let seed = Pixel::new(row, col);
                if !mask.is_valid(seed) || labels[[row, col]] != 0 {
                    continue;
                }

                let label = found.len() as u32 + 1;
                labels[[row, col]] = label;
                queue.push_back(seed);
                let mut size = 0usize;

                while let Some(pixel) = queue.pop_front() {
                    size += 1;
                    for (neighbor, arc) in graph.neighbors(pixel) {
                        if labels[[neighbor.row, neighbor.col]] != 0 || !mask.is_valid(neighbor) {
                            continue;
                        }
                        if self.params.cost_threshold > 0
                            && costs.reliability(arc, flow.get(arc)) < self.params.cost_threshold
                        {
                            continue;
                        }
                        labels[[neighbor.row, neighbor.col]] = label;
                        queue.push_back(neighbor);
                    }
                }

                found.push(Component {
                    label,
                    reference: seed,
                    size,
                });
            }
        }

        let kept = self.select(&found, mask.valid_count());
        let dropped = kept.iter().filter(|&&k| !k).count();
        if dropped > 0 {
            log::debug!("Dropping {} of {} components", dropped, found.len());
        }

        // renumber survivors in discovery order
        let mut remap = vec![0u32; found.len() + 1];
        let mut components = Vec::with_capacity(kept.len());
        for (index, component) in found.iter().enumerate() {
            if kept[index] {
                let label = components.len() as u32 + 1;
                remap[component.label as usize] = label;
                components.push(Component {
                    label,
                    ..component.clone()
                });
            }
        }
        labels.mapv_inplace(|label| remap[label as usize]);

        log::info!("Labeled {} connected components", components.len());
        Components { labels, components }
    }

    /// Which discovered components survive the size and count limits
    fn select(&self, found: &[Component], valid_count: usize) -> Vec<bool> {
        let min_size = (self.params.min_size_fraction * valid_count as f64).ceil() as usize;
        let mut kept: Vec<bool> = found.iter().map(|c| c.size >= min_size).collect();

        if let Some(limit) = self.params.max_components {
            let mut by_size: Vec<usize> = (0..found.len()).filter(|&i| kept[i]).collect();
            // stable: equal sizes keep discovery order
            by_size.sort_by(|&a, &b| found[b].size.cmp(&found[a].size));
            for &index in by_size.iter().skip(limit) {
                kept[index] = false;
            }
        }
        kept
    }
}

impl Default for ComponentLabeler {
    fn default() -> Self {
        Self::new()
    }
}
