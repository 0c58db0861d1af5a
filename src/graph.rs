use crate::common::{check_positive, coord_to_array, LabelError, Result};
use crate::spatial::PointIndex;
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::geometry::{Coord, Line};
use log;
use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::collections::{HashMap, HashSet};

// (edge index) keyed by the edge's bounding rectangle
type EdgeRtreeItem = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Intersections closer than this to an existing node are treated as that node.
static NODE_SNAP_TOLERANCE: f64 = 1e-6;

/// Unvalidated graph input: keyed nodes with pixel coordinates and undirected edges.
#[derive(Debug, Clone, Default)]
pub struct GraphDescription {
    nodes: Vec<(u64, Coord<f64>)>,
    edges: Vec<(u64, u64)>,
}

impl GraphDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node_key: u64, x: f64, y: f64) {
        self.nodes.push((node_key, Coord { x, y }));
    }

    pub fn add_edge(&mut self, start_nd_key: u64, end_nd_key: u64) {
        self.edges.push((start_nd_key, end_nd_key));
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Reads a sat2graph adjacency map: each key is a `(row, col)` point and maps to the
    /// `(row, col)` points it connects to. Coordinates are converted to image `(x, y)`.
    ///
    /// Every neighbour must also appear as a key and must list the key back.
    pub fn from_sat2graph(adjacency: &[([f64; 2], Vec<[f64; 2]>)]) -> Result<Self> {
        let mut description = Self::new();
        let mut keys: HashMap<(u64, u64), u64> = HashMap::with_capacity(adjacency.len());
        for (node_key, (rc, _)) in adjacency.iter().enumerate() {
            let node_key = node_key as u64;
            if keys.insert(point_key(*rc), node_key).is_some() {
                return Err(LabelError::InvalidGraph(format!(
                    "Adjacency lists point ({}, {}) more than once.",
                    rc[0], rc[1]
                )));
            }
            description.add_node(node_key, rc[1], rc[0]);
        }
        let mut directed: HashSet<(u64, u64)> = HashSet::new();
        for (rc, nbrs) in adjacency.iter() {
            let start = keys[&point_key(*rc)];
            for nbr in nbrs.iter() {
                let end = keys.get(&point_key(*nbr)).copied().ok_or_else(|| {
                    LabelError::InvalidGraph(format!(
                        "Point ({}, {}) references unknown neighbour ({}, {}).",
                        rc[0], rc[1], nbr[0], nbr[1]
                    ))
                })?;
                directed.insert((start, end));
            }
        }
        let mut pairs: Vec<(u64, u64)> = directed.iter().copied().collect();
        pairs.sort_unstable();
        for (start, end) in pairs {
            if !directed.contains(&(end, start)) {
                let (a, b) = (adjacency[start as usize].0, adjacency[end as usize].0);
                return Err(LabelError::InvalidGraph(format!(
                    "Adjacency is not symmetric: ({}, {}) lists ({}, {}) but not the reverse.",
                    a[0], a[1], b[0], b[1]
                )));
            }
            if start <= end {
                description.add_edge(start, end);
            }
        }
        Ok(description)
    }
}

#[inline]
fn point_key(point: [f64; 2]) -> (u64, u64) {
    // +0.0 folds -0.0 into 0.0 so both spellings hash alike
    ((point[0] + 0.0).to_bits(), (point[1] + 0.0).to_bits())
}

/// Validated, immutable undirected road graph.
///
/// Node payloads are pixel coordinates; node indices are dense `0..node_count()`.
#[derive(Debug, Clone, Default)]
pub struct RoadGraph {
    graph: UnGraph<Coord<f64>, ()>,
}

impl RoadGraph {
    pub fn from_description(description: &GraphDescription) -> Result<Self> {
        let mut graph =
            UnGraph::with_capacity(description.node_count(), description.edge_count());
        let mut node_lookup: HashMap<u64, NodeIndex> =
            HashMap::with_capacity(description.node_count());
        for (node_key, coord) in description.nodes.iter() {
            if !coord.x.is_finite() || !coord.y.is_finite() {
                return Err(LabelError::InvalidGraph(format!(
                    "Node {} has non-finite coordinates ({}, {}).",
                    node_key, coord.x, coord.y
                )));
            }
            if node_lookup.contains_key(node_key) {
                return Err(LabelError::InvalidGraph(format!(
                    "Duplicate node key {}.",
                    node_key
                )));
            }
            node_lookup.insert(*node_key, graph.add_node(*coord));
        }
        let mut skipped_dupes = 0;
        for (start_nd_key, end_nd_key) in description.edges.iter() {
            if start_nd_key == end_nd_key {
                return Err(LabelError::InvalidGraph(format!(
                    "Self-loop on node {}.",
                    start_nd_key
                )));
            }
            let lookup = |key: &u64| {
                node_lookup.get(key).copied().ok_or_else(|| {
                    LabelError::InvalidGraph(format!(
                        "Edge {}-{} references unknown node {}.",
                        start_nd_key, end_nd_key, key
                    ))
                })
            };
            let node_a = lookup(start_nd_key)?;
            let node_b = lookup(end_nd_key)?;
            if graph.find_edge(node_a, node_b).is_some() {
                skipped_dupes += 1;
                continue;
            }
            graph.add_edge(node_a, node_b, ());
        }
        if skipped_dupes > 0 {
            log::debug!("Skipped {} duplicate edges.", skipped_dupes);
        }
        if graph.edge_count() == 0 {
            log::warn!("Road graph has no edges.");
        }
        Ok(Self { graph })
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn coord(&self, node_idx: usize) -> Option<Coord<f64>> {
        self.graph.node_weight(NodeIndex::new(node_idx)).copied()
    }

    /// Number of incident edges; zero for unknown indices.
    pub fn degree(&self, node_idx: usize) -> usize {
        if node_idx >= self.node_count() {
            return 0;
        }
        self.graph.neighbors(NodeIndex::new(node_idx)).count()
    }

    /// Neighbouring node indices. `node_idx` must be below `node_count()`.
    pub fn neighbors(&self, node_idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors(NodeIndex::new(node_idx))
            .map(|node| node.index())
    }

    /// Node coordinates as `[x, y]`, in node index order.
    pub fn points(&self) -> Vec<[f64; 2]> {
        self.graph
            .node_indices()
            .map(|node| coord_to_array(self.graph[node]))
            .collect()
    }

    fn build_edge_rtree(&self) -> RTree<EdgeRtreeItem> {
        let items: Vec<EdgeRtreeItem> = self
            .graph
            .edge_references()
            .map(|edge_ref| {
                let start = coord_to_array(self.graph[edge_ref.source()]);
                let end = coord_to_array(self.graph[edge_ref.target()]);
                GeomWithData::new(Rectangle::from_corners(start, end), edge_ref.id().index())
            })
            .collect();
        RTree::bulk_load(items)
    }

    /// Locations where two edges cross without a node, e.g. a bridge over another road.
    ///
    /// Only proper intersections count: the crossing must be interior to both segments,
    /// edges sharing an endpoint are never tested, and crossings that land on an existing
    /// node are ignored. Identical crossings are reported once.
    pub fn find_crossover_points(&self) -> Vec<Coord<f64>> {
        let edge_rtree = self.build_edge_rtree();
        let node_index = PointIndex::new(&self.points());
        let mut seen: HashSet<(u64, u64)> = HashSet::new();
        let mut crossovers = Vec::new();
        for edge_ref in self.graph.edge_references() {
            let edge_idx = edge_ref.id().index();
            let (a, b) = (edge_ref.source(), edge_ref.target());
            let line = Line::new(self.graph[a], self.graph[b]);
            let envelope = AABB::from_corners(coord_to_array(line.start), coord_to_array(line.end));
            for other in edge_rtree.locate_in_envelope_intersecting(&envelope) {
                let other_idx = other.data;
                if other_idx <= edge_idx {
                    continue;
                }
                let Some((c, d)) = self.graph.edge_endpoints(EdgeIndex::new(other_idx)) else {
                    continue;
                };
                if a == c || a == d || b == c || b == d {
                    continue;
                }
                let other_line = Line::new(self.graph[c], self.graph[d]);
                if let Some(LineIntersection::SinglePoint {
                    intersection,
                    is_proper: true,
                }) = line_intersection(line, other_line)
                {
                    let point = coord_to_array(intersection);
                    if !node_index
                        .within_radius(point, NODE_SNAP_TOLERANCE)
                        .is_empty()
                    {
                        continue;
                    }
                    if seen.insert(point_key(point)) {
                        crossovers.push(intersection);
                    }
                }
            }
        }
        crossovers
    }

    /// Refines every edge into a path of evenly spaced points no more than `resolution`
    /// apart. Original nodes keep their indices and degree; interior points are appended.
    pub fn subdivide(&self, resolution: f64) -> Result<RoadGraph> {
        check_positive("subdivide_resolution", resolution)?;
        let mut graph = UnGraph::with_capacity(self.node_count(), self.edge_count());
        for node in self.graph.node_indices() {
            graph.add_node(self.graph[node]);
        }
        for edge_ref in self.graph.edge_references() {
            let (src, tgt) = (edge_ref.source(), edge_ref.target());
            let start = self.graph[src];
            let end = self.graph[tgt];
            let delta = end - start;
            let length = delta.x.hypot(delta.y);
            // tolerance keeps exact multiples of the resolution from gaining a segment
            let steps = ((length / resolution) - 1e-9).ceil().max(1.0) as usize;
            let mut prev = src;
            for step in 1..steps {
                let t = step as f64 / steps as f64;
                let node = graph.add_node(start + delta * t);
                graph.add_edge(prev, node, ());
                prev = node;
            }
            graph.add_edge(prev, tgt, ());
        }
        Ok(RoadGraph { graph })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_edge() -> RoadGraph {
        let mut description = GraphDescription::new();
        description.add_node(0, 0.0, 0.0);
        description.add_node(1, 100.0, 0.0);
        description.add_edge(0, 1);
        RoadGraph::from_description(&description).unwrap()
    }

    fn two_segments(a: [f64; 4], b: [f64; 4]) -> RoadGraph {
        let mut description = GraphDescription::new();
        description.add_node(0, a[0], a[1]);
        description.add_node(1, a[2], a[3]);
        description.add_node(2, b[0], b[1]);
        description.add_node(3, b[2], b[3]);
        description.add_edge(0, 1);
        description.add_edge(2, 3);
        RoadGraph::from_description(&description).unwrap()
    }

    #[test]
    fn test_rejects_malformed_descriptions() {
        let mut self_loop = GraphDescription::new();
        self_loop.add_node(0, 0.0, 0.0);
        self_loop.add_edge(0, 0);
        assert!(matches!(
            RoadGraph::from_description(&self_loop),
            Err(LabelError::InvalidGraph(_))
        ));

        let mut dangling = GraphDescription::new();
        dangling.add_node(0, 0.0, 0.0);
        dangling.add_edge(0, 7);
        let err = RoadGraph::from_description(&dangling).unwrap_err();
        assert!(err.to_string().contains("unknown node 7"));

        let mut duplicate = GraphDescription::new();
        duplicate.add_node(3, 0.0, 0.0);
        duplicate.add_node(3, 1.0, 0.0);
        assert!(RoadGraph::from_description(&duplicate).is_err());

        let mut non_finite = GraphDescription::new();
        non_finite.add_node(0, f64::NAN, 0.0);
        assert!(RoadGraph::from_description(&non_finite).is_err());
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut description = GraphDescription::new();
        description.add_node(0, 0.0, 0.0);
        description.add_node(1, 10.0, 0.0);
        description.add_edge(0, 1);
        description.add_edge(1, 0);
        description.add_edge(0, 1);
        let graph = RoadGraph::from_description(&description).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.degree(0), 1);
        assert_eq!(graph.degree(1), 1);
    }

    #[test]
    fn test_sat2graph_conversion() {
        // (row, col) keys; a vertical road in image space
        let adjacency = vec![
            ([0.0, 5.0], vec![[10.0, 5.0]]),
            ([10.0, 5.0], vec![[0.0, 5.0], [20.0, 5.0]]),
            ([20.0, 5.0], vec![[10.0, 5.0]]),
        ];
        let description = GraphDescription::from_sat2graph(&adjacency).unwrap();
        let graph = RoadGraph::from_description(&description).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.coord(1), Some(Coord { x: 5.0, y: 10.0 }));
        assert_eq!(graph.degree(1), 2);
    }

    #[test]
    fn test_sat2graph_rejects_asymmetric_and_dangling() {
        let asymmetric = vec![([0.0, 0.0], vec![[0.0, 4.0]]), ([0.0, 4.0], vec![])];
        let err = GraphDescription::from_sat2graph(&asymmetric).unwrap_err();
        assert!(err.to_string().contains("not symmetric"));

        let dangling = vec![([0.0, 0.0], vec![[9.0, 9.0]])];
        assert!(matches!(
            GraphDescription::from_sat2graph(&dangling),
            Err(LabelError::InvalidGraph(_))
        ));

        let self_loop = vec![([1.0, 1.0], vec![[1.0, 1.0]])];
        let description = GraphDescription::from_sat2graph(&self_loop).unwrap();
        assert!(RoadGraph::from_description(&description).is_err());
    }

    #[test]
    fn test_subdivide_straight_edge() {
        let graph = straight_edge().subdivide(4.0).unwrap();
        assert_eq!(graph.node_count(), 26);
        assert_eq!(graph.edge_count(), 25);
        assert_eq!(graph.degree(0), 1);
        assert_eq!(graph.degree(1), 1);
        for node_idx in 2..graph.node_count() {
            assert_eq!(graph.degree(node_idx), 2);
        }
        let mut xs: Vec<f64> = graph.points().iter().map(|p| p[0]).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        for (i, x) in xs.iter().enumerate() {
            assert!((x - 4.0 * i as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn test_subdivide_uneven_length() {
        // 10 units at resolution 4 -> 3 segments of 3.33
        let mut description = GraphDescription::new();
        description.add_node(0, 0.0, 0.0);
        description.add_node(1, 0.0, 10.0);
        description.add_edge(0, 1);
        let graph = RoadGraph::from_description(&description)
            .unwrap()
            .subdivide(4.0)
            .unwrap();
        assert_eq!(graph.node_count(), 4);
        let coord = graph.coord(2).unwrap();
        assert!((coord.y - 10.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_subdivide_short_edge_kept() {
        let mut description = GraphDescription::new();
        description.add_node(0, 0.0, 0.0);
        description.add_node(1, 1.0, 1.0);
        description.add_edge(0, 1);
        let graph = RoadGraph::from_description(&description)
            .unwrap()
            .subdivide(4.0)
            .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_subdivide_keeps_junction_degree() {
        let mut description = GraphDescription::new();
        description.add_node(0, 50.0, 50.0);
        description.add_node(1, 0.0, 50.0);
        description.add_node(2, 100.0, 50.0);
        description.add_node(3, 50.0, 0.0);
        description.add_edge(0, 1);
        description.add_edge(0, 2);
        description.add_edge(0, 3);
        let graph = RoadGraph::from_description(&description)
            .unwrap()
            .subdivide(4.0)
            .unwrap();
        assert_eq!(graph.degree(0), 3);
        assert_eq!(graph.coord(0), Some(Coord { x: 50.0, y: 50.0 }));
    }

    #[test]
    fn test_crossover_x_shape() {
        let graph = two_segments([0.0, 0.0, 10.0, 10.0], [0.0, 10.0, 10.0, 0.0]);
        let crossovers = graph.find_crossover_points();
        assert_eq!(crossovers.len(), 1);
        assert!((crossovers[0].x - 5.0).abs() < 1e-9);
        assert!((crossovers[0].y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossover_shared_endpoint() {
        let mut description = GraphDescription::new();
        description.add_node(0, 0.0, 0.0);
        description.add_node(1, 10.0, 10.0);
        description.add_node(2, 10.0, 0.0);
        description.add_edge(0, 1);
        description.add_edge(0, 2);
        let graph = RoadGraph::from_description(&description).unwrap();
        assert!(graph.find_crossover_points().is_empty());
    }

    #[test]
    fn test_crossover_disjoint_and_touching() {
        let parallel = two_segments([0.0, 0.0, 10.0, 0.0], [0.0, 5.0, 10.0, 5.0]);
        assert!(parallel.find_crossover_points().is_empty());
        // T without a shared node: one segment ends on the other
        let touching = two_segments([0.0, 0.0, 10.0, 0.0], [5.0, 0.0, 5.0, 10.0]);
        assert!(touching.find_crossover_points().is_empty());
    }
}
