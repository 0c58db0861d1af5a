//! Patch label generation: candidate selection, NMS, anchor sampling, neighbour
//! connectivity and the rotation-consistent point transform.

use crate::common::{LabelError, Result, NMS_SCORE_RANGE, POINT_NOISE_SCALE};
use crate::config::SampleConfig;
use crate::index::GraphIndex;
use crate::reachability::bfs_with_conditions;
use crate::spatial::{nms_points, PointIndex};
use log;
use rand::distr::weighted::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashSet;

/// Axis-aligned query rectangle in tile pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patch {
    min: [f64; 2],
    max: [f64; 2],
}

impl Patch {
    /// Builds a patch from two opposite corners given in any order.
    pub fn from_corners(a: [f64; 2], b: [f64; 2]) -> Self {
        Self {
            min: [a[0].min(b[0]), a[1].min(b[1])],
            max: [a[0].max(b[0]), a[1].max(b[1])],
        }
    }

    #[inline]
    pub fn min(&self) -> [f64; 2] {
        self.min
    }

    #[inline]
    pub fn max(&self) -> [f64; 2] {
        self.max
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }
}

/// Connectivity row for one anchor.
///
/// All three vectors have one entry per neighbour slot. Pairs index into
/// [`LabelSample::points`]. Slots with `valid == false` are padding and their
/// `shall_connect` value carries no meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct TopoSample {
    pub pairs: Vec<(usize, usize)>,
    pub shall_connect: Vec<bool>,
    pub valid: Vec<bool>,
}

impl TopoSample {
    fn with_capacity(slots: usize) -> Self {
        Self {
            pairs: Vec::with_capacity(slots),
            shall_connect: Vec::with_capacity(slots),
            valid: Vec::with_capacity(slots),
        }
    }

    fn padding(anchor: usize, slots: usize) -> Self {
        let mut sample = Self::with_capacity(slots);
        sample.pad_to(anchor, slots);
        sample
    }

    fn push(&mut self, pair: (usize, usize), shall_connect: bool) {
        self.pairs.push(pair);
        self.shall_connect.push(shall_connect);
        self.valid.push(true);
    }

    fn pad_to(&mut self, anchor: usize, slots: usize) {
        while self.pairs.len() < slots {
            self.pairs.push((anchor, anchor));
            self.shall_connect.push(false);
            self.valid.push(false);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }
}

/// Labels for one patch.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSample {
    /// Kept points in patch-local, rotated, jittered `(x, y)` pixel coordinates.
    pub points: Vec<[f64; 2]>,
    /// One row per anchor, `topo_sample_num` rows in total.
    pub samples: Vec<TopoSample>,
}

impl LabelSample {
    /// Placeholder for patches without usable graph points: one dummy point at the origin
    /// and rows made entirely of invalid padding.
    pub fn degenerate(config: &SampleConfig) -> Self {
        Self {
            points: vec![[0.0, 0.0]],
            samples: vec![
                TopoSample::padding(0, config.max_neighbor_queries);
                config.topo_sample_num
            ],
        }
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

/// Maps tile points into patch-local coordinates rotated by `rot_index` quarter turns
/// about the patch centre.
///
/// One quarter turn is counter-clockwise in image `(x, y)` convention and matches a
/// counter-clockwise `rot90` of the patch pixels: `(x, y) -> (y, patch_size - x)`.
pub fn transform_points(
    points: &[[f64; 2]],
    origin: [f64; 2],
    patch_size: f64,
    rot_index: usize,
) -> Vec<[f64; 2]> {
    let half = 0.5 * patch_size;
    points
        .iter()
        .map(|point| {
            let mut x = point[0] - origin[0] - half;
            let mut y = point[1] - origin[1] - half;
            for _ in 0..rot_index % 4 {
                (x, y) = (y, -x);
            }
            [x + half, y + half]
        })
        .collect()
}

impl GraphIndex {
    /// Generates point and connectivity labels for one patch.
    ///
    /// All randomness (NMS scores, anchor draws, coordinate jitter) comes from `rng`, so a
    /// seeded generator reproduces the same labels.
    pub fn sample_patch<R: Rng>(
        &self,
        patch: &Patch,
        rot_index: usize,
        config: &SampleConfig,
        rng: &mut R,
    ) -> Result<LabelSample> {
        config.validate()?;
        let candidates: Vec<usize> = self
            .point_index()
            .query_box(patch.min(), patch.max())
            .into_iter()
            .filter(|&idx| !self.is_excluded(idx))
            .collect();
        if candidates.is_empty() {
            log::debug!(
                "No graph points in patch {:?}-{:?}; returning placeholder labels.",
                patch.min(),
                patch.max()
            );
            return Ok(LabelSample::degenerate(config));
        }

        // random scores share a similar spacing; junction overrides always win
        let points = self.points();
        let nms_override = self.nms_overrides();
        let (score_lo, score_hi) = NMS_SCORE_RANGE;
        let candidate_points: Vec<[f64; 2]> = candidates.iter().map(|&idx| points[idx]).collect();
        let nms_scores: Vec<f32> = candidates
            .iter()
            .map(|&idx| rng.random_range(score_lo..score_hi).max(nms_override[idx]))
            .collect();
        let kept = nms_points(&candidate_points, &nms_scores, config.road_nms_radius)?;
        if kept.is_empty() {
            return Err(LabelError::Internal(format!(
                "NMS kept no points out of {} candidates.",
                candidates.len()
            )));
        }
        // indices into the subdivided graph, in kept order
        let kept_nodes: Vec<usize> = kept.iter().map(|&k| candidates[k]).collect();
        let kept_points: Vec<[f64; 2]> = kept_nodes.iter().map(|&idx| points[idx]).collect();

        let sample_weights = self.sample_weights();
        let weights: Vec<f32> = kept_nodes.iter().map(|&idx| sample_weights[idx]).collect();
        let anchor_dist = WeightedIndex::new(&weights).map_err(|e| {
            LabelError::Internal(format!("Invalid anchor sampling weights: {}", e))
        })?;
        // indices into the kept points, drawn with replacement
        let anchors: Vec<usize> = (0..config.topo_sample_num)
            .map(|_| anchor_dist.sample(rng))
            .collect();

        let kept_index = PointIndex::new(&kept_points);
        let hop_budget = self.hop_budget(config.neighbor_radius);
        let max_nbr_queries = config.max_neighbor_queries;
        let mut samples = Vec::with_capacity(anchors.len());
        for &anchor in anchors.iter() {
            // k + 1 because the nearest hit is the anchor itself
            let nbrs: Vec<usize> = kept_index
                .nearest_within(
                    kept_points[anchor],
                    max_nbr_queries.saturating_add(1),
                    config.neighbor_radius,
                )
                .into_iter()
                .map(|(idx, _)| idx)
                .filter(|&idx| idx != anchor)
                .take(max_nbr_queries)
                .collect();
            let target_nodes: HashSet<usize> = nbrs.iter().map(|&idx| kept_nodes[idx]).collect();
            let reached =
                bfs_with_conditions(self.graph(), kept_nodes[anchor], &target_nodes, hop_budget)?;

            let mut sample = TopoSample::with_capacity(max_nbr_queries);
            for &nbr in nbrs.iter() {
                sample.push((anchor, nbr), reached.contains(&kept_nodes[nbr]));
            }
            sample.pad_to(anchor, max_nbr_queries);
            samples.push(sample);
        }

        let mut out_points =
            transform_points(&kept_points, patch.min(), config.patch_size, rot_index);
        let noise = Normal::new(0.0, POINT_NOISE_SCALE)
            .map_err(|e| LabelError::Internal(format!("Invalid noise distribution: {}", e)))?;
        for point in out_points.iter_mut() {
            point[0] += noise.sample(rng);
            point[1] += noise.sample(rng);
        }

        Ok(LabelSample {
            points: out_points,
            samples,
        })
    }
}
