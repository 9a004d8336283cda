use crate::types::{ChangeMask, SimilarityField};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fused similarity below which a pixel counts as changed
pub const SIMILARITY_THRESHOLD: f32 = 0.94;
/// Changed 8-neighbours a flagged pixel needs to survive despeckling
pub const MIN_CHANGED_NEIGHBORS: usize = 1;

const FOUR_NEIGHBORS: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Thresholding and despeckle parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskParams {
    pub similarity_threshold: f32,
    pub min_neighbors: usize,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            similarity_threshold: SIMILARITY_THRESHOLD,
            min_neighbors: MIN_CHANGED_NEIGHBORS,
        }
    }
}

/// Turns a fused similarity field into a binary change mask.
///
/// The sequence is threshold, despeckle, fill holes. No erosion or opening is
/// applied so thin linear features survive.
#[derive(Debug, Clone, Default)]
pub struct MaskRefiner {
    params: MaskParams,
}

impl MaskRefiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: MaskParams) -> Self {
        Self { params }
    }

    pub fn refine(&self, fused: &SimilarityField) -> ChangeMask {
        let threshold = self.params.similarity_threshold;
        let raw = fused.mapv(|v| u8::from(v < threshold));
        log::debug!(
            "Threshold {:.2} flagged {} pixels",
            threshold,
            count_changed(&raw)
        );

        let despeckled = remove_isolated(&raw, self.params.min_neighbors);
        let filled = fill_holes(&despeckled);

        log::info!(
            "Refined change mask: {} changed of {} pixels",
            count_changed(&filled),
            filled.len()
        );
        filled
    }
}

pub fn count_changed(mask: &ChangeMask) -> usize {
    mask.iter().filter(|&&v| v != 0).count()
}

/// Drop changed pixels with fewer than `min_neighbors` changed 8-neighbours
pub fn remove_isolated(mask: &ChangeMask, min_neighbors: usize) -> ChangeMask {
    let (h, w) = mask.dim();
    Array2::from_shape_fn((h, w), |(i, j)| {
        if mask[[i, j]] == 0 {
            return 0;
        }
        let mut neighbors = 0usize;
        for di in -1isize..=1 {
            for dj in -1isize..=1 {
                if di == 0 && dj == 0 {
                    continue;
                }
                let (ni, nj) = (i as isize + di, j as isize + dj);
                if ni >= 0
                    && nj >= 0
                    && (ni as usize) < h
                    && (nj as usize) < w
                    && mask[[ni as usize, nj as usize]] != 0
                {
                    neighbors += 1;
                }
            }
        }
        u8::from(neighbors >= min_neighbors)
    })
}

/// Fill background regions not 4-connected to the raster border
pub fn fill_holes(mask: &ChangeMask) -> ChangeMask {
    let (h, w) = mask.dim();
    let mut outside = Array2::<bool>::from_elem((h, w), false);
    let mut queue = VecDeque::new();

    let seed = |i: usize, j: usize, outside: &mut Array2<bool>, queue: &mut VecDeque<(usize, usize)>| {
        if mask[[i, j]] == 0 && !outside[[i, j]] {
            outside[[i, j]] = true;
            queue.push_back((i, j));
        }
    };

    for i in 0..h {
        seed(i, 0, &mut outside, &mut queue);
        if w > 1 {
            seed(i, w - 1, &mut outside, &mut queue);
        }
    }
    for j in 0..w {
        seed(0, j, &mut outside, &mut queue);
        if h > 1 {
            seed(h - 1, j, &mut outside, &mut queue);
        }
    }

    while let Some((i, j)) = queue.pop_front() {
        for (di, dj) in FOUR_NEIGHBORS {
            let (ni, nj) = (i as isize + di, j as isize + dj);
            if ni < 0 || nj < 0 || ni as usize >= h || nj as usize >= w {
                continue;
            }
            let (ni, nj) = (ni as usize, nj as usize);
            if mask[[ni, nj]] == 0 && !outside[[ni, nj]] {
                outside[[ni, nj]] = true;
                queue.push_back((ni, nj));
            }
        }
    }

    outside.mapv(|reached| u8::from(!reached))
}

/// Label 4-connected components of non-zero pixels.
///
/// Returns the label raster (0 = background, components numbered from 1 in
/// raster scan order) and the component count.
pub fn label_components(mask: &ChangeMask) -> (Array2<u32>, usize) {
    let (h, w) = mask.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    let mut count = 0usize;
    let mut queue = VecDeque::new();

    for i in 0..h {
        for j in 0..w {
            if mask[[i, j]] == 0 || labels[[i, j]] != 0 {
                continue;
            }
            count += 1;
            let label = count as u32;
            labels[[i, j]] = label;
            queue.push_back((i, j));

            while let Some((ci, cj)) = queue.pop_front() {
                for (di, dj) in FOUR_NEIGHBORS {
                    let (ni, nj) = (ci as isize + di, cj as isize + dj);
                    if ni < 0 || nj < 0 || ni as usize >= h || nj as usize >= w {
                        continue;
                    }
                    let (ni, nj) = (ni as usize, nj as usize);
                    if mask[[ni, nj]] != 0 && labels[[ni, nj]] == 0 {
                        labels[[ni, nj]] = label;
                        queue.push_back((ni, nj));
                    }
                }
            }
        }
    }

    (labels, count)
}
