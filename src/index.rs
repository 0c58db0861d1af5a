//! Per-tile label index: subdivided road graph, point R-tree and per-point metadata.

use crate::common::{
    coord_to_array, Result, DEFAULT_SAMPLE_WEIGHT, INTERESTING_SAMPLE_WEIGHT, ITSC_NMS_SCORE,
};
use crate::config::IndexConfig;
use crate::graph::{GraphDescription, RoadGraph};
use crate::spatial::PointIndex;
use log;

/// Immutable index over one tile's ground-truth road graph.
///
/// Built once per tile and shared read-only by any number of concurrent
/// [`GraphIndex::sample_patch`] calls.
#[derive(Debug, Clone)]
pub struct GraphIndex {
    config: IndexConfig,
    graph: RoadGraph,
    points: Vec<[f64; 2]>,
    crossover_points: Vec<[f64; 2]>,
    point_index: PointIndex,
    excluded: Vec<bool>,
    nms_override: Vec<f32>,
    sample_weights: Vec<f32>,
}

impl GraphIndex {
    pub fn build(description: &GraphDescription, config: IndexConfig) -> Result<Self> {
        let graph = RoadGraph::from_description(description)?;
        Self::from_graph(&graph, config)
    }

    pub fn from_graph(source_graph: &RoadGraph, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        // crossovers are found on the original geometry, before subdivision
        let crossover_points: Vec<[f64; 2]> = source_graph
            .find_crossover_points()
            .into_iter()
            .map(coord_to_array)
            .collect();
        let graph = source_graph.subdivide(config.subdivide_resolution)?;
        let points = graph.points();
        let point_index = PointIndex::new(&points);
        let point_num = points.len();

        let mut excluded = vec![false; point_num];
        for crossover in crossover_points.iter() {
            for idx in point_index.within_radius(*crossover, config.crossover_exclude_radius) {
                excluded[idx] = true;
            }
        }

        // junctions and dead-ends always survive NMS
        let itsc_indices: Vec<usize> = (0..point_num).filter(|&i| graph.degree(i) != 2).collect();
        let mut nms_override = vec![0.0; point_num];
        for &idx in itsc_indices.iter() {
            nms_override[idx] = ITSC_NMS_SCORE;
        }

        let mut sample_weights = vec![DEFAULT_SAMPLE_WEIGHT; point_num];
        let interesting_centers = itsc_indices
            .iter()
            .map(|&idx| points[idx])
            .chain(crossover_points.iter().copied());
        for center in interesting_centers {
            for idx in point_index.within_radius(center, config.interesting_radius) {
                sample_weights[idx] = INTERESTING_SAMPLE_WEIGHT;
            }
        }

        log::info!(
            "Graph index built: {} nodes / {} edges subdivided into {} points; {} crossovers, {} excluded, {} junction or end points.",
            source_graph.node_count(),
            source_graph.edge_count(),
            point_num,
            crossover_points.len(),
            excluded.iter().filter(|&&e| e).count(),
            itsc_indices.len()
        );

        Ok(Self {
            config,
            graph,
            points,
            crossover_points,
            point_index,
            excluded,
            nms_override,
            sample_weights,
        })
    }

    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The subdivided graph.
    #[inline]
    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Subdivided point coordinates, indexed like the subdivided graph's nodes.
    #[inline]
    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    #[inline]
    pub fn crossover_points(&self) -> &[[f64; 2]] {
        &self.crossover_points
    }

    #[inline]
    pub fn point_index(&self) -> &PointIndex {
        &self.point_index
    }

    pub fn is_excluded(&self, point_idx: usize) -> bool {
        self.excluded.get(point_idx).copied().unwrap_or(false)
    }

    pub fn excluded_indices(&self) -> Vec<usize> {
        (0..self.point_count()).filter(|&i| self.excluded[i]).collect()
    }

    /// Indices of points whose degree is not 2 (junctions and dead-ends).
    pub fn itsc_indices(&self) -> Vec<usize> {
        (0..self.point_count())
            .filter(|&i| self.graph.degree(i) != 2)
            .collect()
    }

    #[inline]
    pub fn nms_overrides(&self) -> &[f32] {
        &self.nms_override
    }

    #[inline]
    pub fn sample_weights(&self) -> &[f32] {
        &self.sample_weights
    }

    pub fn degree(&self, point_idx: usize) -> usize {
        self.graph.degree(point_idx)
    }

    /// Graph hop budget for the connectivity search: `floor(neighbor_radius / resolution)`.
    #[inline]
    pub fn hop_budget(&self, neighbor_radius: f64) -> usize {
        (neighbor_radius / self.config.subdivide_resolution).floor() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{dist_2, LabelError};

    // two roads crossing at (100, 100) without a junction, one of them bending at (300, 100)
    fn crossing_roads() -> GraphDescription {
        let mut description = GraphDescription::new();
        description.add_node(0, 0.0, 100.0);
        description.add_node(1, 200.0, 100.0);
        description.add_node(2, 100.0, 0.0);
        description.add_node(3, 100.0, 200.0);
        description.add_node(4, 300.0, 100.0);
        description.add_node(5, 300.0, 0.0);
        description.add_edge(0, 1);
        description.add_edge(2, 3);
        description.add_edge(1, 4);
        description.add_edge(4, 5);
        description
    }

    #[test]
    fn test_build_metadata() {
        let index = GraphIndex::build(&crossing_roads(), IndexConfig::default()).unwrap();
        let crossovers = index.crossover_points();
        assert_eq!(crossovers.len(), 1);
        assert!(dist_2(crossovers[0], [100.0, 100.0]) < 1e-12);
        assert_eq!(index.point_count(), index.graph().node_count());

        // 0, 2, 3, 5 are dead-ends; 1 and 4 are degree 2 in the original graph
        let itsc = index.itsc_indices();
        assert_eq!(itsc, vec![0, 2, 3, 5]);
        for idx in 0..index.point_count() {
            let expected = if itsc.contains(&idx) { 2.0 } else { 0.0 };
            assert_eq!(index.nms_overrides()[idx], expected);
        }

        // excluded points all lie within 4 px of the crossover
        let excluded = index.excluded_indices();
        assert!(!excluded.is_empty());
        for idx in excluded {
            assert!(dist_2(index.points()[idx], [100.0, 100.0]) <= 16.0 + 1e-9);
        }
        assert!(!index.is_excluded(0));
        assert!(!index.is_excluded(usize::MAX));
    }

    #[test]
    fn test_sample_weights() {
        let index = GraphIndex::build(&crossing_roads(), IndexConfig::default()).unwrap();
        let weights = index.sample_weights();
        for (idx, p) in index.points().iter().enumerate() {
            let near_crossover = dist_2(*p, index.crossover_points()[0]) <= 32.0 * 32.0;
            let near_itsc = index
                .itsc_indices()
                .iter()
                .any(|&i| dist_2(*p, index.points()[i]) <= 32.0 * 32.0);
            let expected = if near_crossover || near_itsc { 0.9 } else { 0.1 };
            assert_eq!(weights[idx], expected, "point {:?}", p);
        }
        // (160, 100) is far from every junction, end and crossover
        let far = index
            .points()
            .iter()
            .position(|p| (p[0] - 160.0).abs() < 1e-9 && (p[1] - 100.0).abs() < 1e-9)
            .unwrap();
        assert_eq!(weights[far], 0.1);
    }

    #[test]
    fn test_hop_budget_floor() {
        let index = GraphIndex::build(&crossing_roads(), IndexConfig::default()).unwrap();
        assert_eq!(index.hop_budget(64.0), 16);
        assert_eq!(index.hop_budget(66.0), 16);
        assert_eq!(index.hop_budget(3.0), 0);
    }

    #[test]
    fn test_invalid_inputs() {
        let config = IndexConfig {
            interesting_radius: -1.0,
            ..IndexConfig::default()
        };
        assert!(matches!(
            GraphIndex::build(&crossing_roads(), config),
            Err(LabelError::InvalidConfig(_))
        ));
        let mut description = crossing_roads();
        description.add_edge(0, 42);
        assert!(matches!(
            GraphIndex::build(&description, IndexConfig::default()),
            Err(LabelError::InvalidGraph(_))
        ));
    }

    #[test]
    fn test_index_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GraphIndex>();
    }
}
