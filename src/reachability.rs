use crate::common::{LabelError, Result};
use crate::graph::RoadGraph;
use std::collections::{HashSet, VecDeque};

/// Breadth-first search from `source` limited to `max_hops` edges.
///
/// Returns the members of `targets` reached within the budget. A reached target is not
/// expanded further, so a target only counts when some path to it avoids every other
/// target. The search stops as soon as all targets are found.
pub fn bfs_with_conditions(
    graph: &RoadGraph,
    source: usize,
    targets: &HashSet<usize>,
    max_hops: usize,
) -> Result<HashSet<usize>> {
    if source >= graph.node_count() {
        return Err(LabelError::Internal(format!(
            "BFS source {} is out of range for a graph with {} nodes.",
            source,
            graph.node_count()
        )));
    }
    let mut reached = HashSet::new();
    if targets.contains(&source) {
        reached.insert(source);
    }
    let mut visited: HashSet<usize> = HashSet::from([source]);
    let mut active: VecDeque<(usize, usize)> = VecDeque::from([(source, 0)]);
    while let Some((node_idx, depth)) = active.pop_front() {
        if reached.len() == targets.len() {
            break;
        }
        if depth >= max_hops {
            continue;
        }
        for nb_nd_idx in graph.neighbors(node_idx) {
            if !visited.insert(nb_nd_idx) {
                continue;
            }
            if targets.contains(&nb_nd_idx) {
                reached.insert(nb_nd_idx);
                continue;
            }
            active.push_back((nb_nd_idx, depth + 1));
        }
    }
    Ok(reached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphDescription;

    //  0 - 1 - 2 - 3 - 4
    //          |
    //          5 - 6
    fn branching_path() -> RoadGraph {
        let mut description = GraphDescription::new();
        for (key, (x, y)) in [
            (0.0, 0.0),
            (4.0, 0.0),
            (8.0, 0.0),
            (12.0, 0.0),
            (16.0, 0.0),
            (8.0, 4.0),
            (12.0, 4.0),
        ]
        .into_iter()
        .enumerate()
        {
            description.add_node(key as u64, x, y);
        }
        for (a, b) in [(0, 1), (1, 2), (2, 3), (3, 4), (2, 5), (5, 6)] {
            description.add_edge(a, b);
        }
        RoadGraph::from_description(&description).unwrap()
    }

    #[test]
    fn test_hop_budget() {
        let graph = branching_path();
        let targets = HashSet::from([4, 6]);
        assert!(bfs_with_conditions(&graph, 0, &targets, 3)
            .unwrap()
            .is_empty());
        assert_eq!(
            bfs_with_conditions(&graph, 0, &targets, 4).unwrap(),
            HashSet::from([4, 6])
        );
    }

    #[test]
    fn test_targets_block_expansion() {
        let graph = branching_path();
        // 3 sits between 0 and 4; 4 only counts when reached around 3, which it cannot be
        let targets = HashSet::from([3, 4]);
        let reached = bfs_with_conditions(&graph, 0, &targets, 10).unwrap();
        assert_eq!(reached, HashSet::from([3]));
    }

    #[test]
    fn test_zero_budget() {
        let graph = branching_path();
        let reached = bfs_with_conditions(&graph, 2, &HashSet::from([1, 3]), 0).unwrap();
        assert!(reached.is_empty());
        let reached = bfs_with_conditions(&graph, 2, &HashSet::from([2]), 0).unwrap();
        assert_eq!(reached, HashSet::from([2]));
    }

    #[test]
    fn test_monotonic_in_budget() {
        let graph = branching_path();
        let targets: HashSet<usize> = HashSet::from([0, 3, 4, 6]);
        let mut previous: HashSet<usize> = HashSet::new();
        for budget in 0..8 {
            let reached = bfs_with_conditions(&graph, 5, &targets, budget).unwrap();
            assert!(previous.is_subset(&reached), "budget {} shrank the set", budget);
            previous = reached;
        }
        assert_eq!(previous, HashSet::from([0, 3, 6]));
    }

    #[test]
    fn test_disconnected_component() {
        let mut description = GraphDescription::new();
        description.add_node(0, 0.0, 0.0);
        description.add_node(1, 4.0, 0.0);
        description.add_node(2, 50.0, 0.0);
        description.add_node(3, 54.0, 0.0);
        description.add_edge(0, 1);
        description.add_edge(2, 3);
        let graph = RoadGraph::from_description(&description).unwrap();
        let reached = bfs_with_conditions(&graph, 0, &HashSet::from([1, 2]), 100).unwrap();
        assert_eq!(reached, HashSet::from([1]));
    }

    #[test]
    fn test_source_out_of_range() {
        let graph = branching_path();
        let result = bfs_with_conditions(&graph, 99, &HashSet::new(), 3);
        assert!(matches!(result, Err(LabelError::Internal(_))));
    }
}
