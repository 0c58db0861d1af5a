//! R-tree point index and greedy non-maximum suppression.

use crate::common::{LabelError, Result};
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};

// (point, index into the indexed point array)
type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Read-only spatial index over a fixed point array.
///
/// Indices returned by every query refer to positions in the array the index was built
/// from and stay valid for the lifetime of the index.
#[derive(Debug, Clone)]
pub struct PointIndex {
    rtree: RTree<IndexedPoint>,
}

impl PointIndex {
    pub fn new(points: &[[f64; 2]]) -> Self {
        let items: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .map(|(idx, point)| GeomWithData::new(*point, idx))
            .collect();
        Self {
            rtree: RTree::bulk_load(items),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rtree.size() == 0
    }

    /// Indices of all points inside the axis-aligned box (bounds inclusive), ascending.
    pub fn query_box(&self, min: [f64; 2], max: [f64; 2]) -> Vec<usize> {
        let envelope = AABB::from_corners(min, max);
        let mut indices: Vec<usize> = self
            .rtree
            .locate_in_envelope(&envelope)
            .map(|item| item.data)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Indices of all points with distance `<= radius` from `center`, ascending.
    pub fn within_radius(&self, center: [f64; 2], radius: f64) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .rtree
            .locate_within_distance(center, radius * radius)
            .map(|item| item.data)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Up to `k` nearest points strictly closer than `radius`, as `(index, distance)`
    /// pairs ordered by increasing distance.
    pub fn nearest_within(&self, center: [f64; 2], k: usize, radius: f64) -> Vec<(usize, f64)> {
        let max_dist_2 = radius * radius;
        self.rtree
            .nearest_neighbor_iter_with_distance_2(&center)
            .take_while(|(_, dist_2)| *dist_2 < max_dist_2)
            .take(k)
            .map(|(item, dist_2)| (item.data, dist_2.sqrt()))
            .collect()
    }
}

/// Greedy NMS over `points`.
///
/// Points are visited by descending score (ties keep input order) and kept when they lie
/// further than `radius` from every point kept so far. Returns the kept positions in
/// visit order.
pub fn nms_points(points: &[[f64; 2]], scores: &[f32], radius: f64) -> Result<Vec<usize>> {
    if points.len() != scores.len() {
        return Err(LabelError::Internal(format!(
            "NMS received {} points but {} scores.",
            points.len(),
            scores.len()
        )));
    }
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let radius_2 = radius * radius;
    let mut kept_tree: RTree<IndexedPoint> = RTree::new();
    let mut kept = Vec::new();
    for idx in order {
        let point = points[idx];
        if kept_tree
            .locate_within_distance(point, radius_2)
            .next()
            .is_some()
        {
            continue;
        }
        kept_tree.insert(GeomWithData::new(point, idx));
        kept.push(idx);
    }
    Ok(kept)
}
