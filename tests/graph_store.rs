//! Tests for the graph store

mod common;

use common::*;
use parkcover::graph_store::*;

#[test]
fn test_edges_for_way() {
    let graph = park_graph();

    let ids: Vec<u64> = graph.edges_for_way(LOOP_WAY).iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![E1, E2, E3]);
    assert!(graph.edges_for_way(999).is_empty());
    assert!(graph.contains_way(ISLAND_WAY));
    assert_eq!(graph.way_count(), 4);
}

#[test]
fn test_adjacency_through_shared_nodes() {
    let graph = park_graph();

    assert!(graph.are_adjacent(E1, E3));
    assert!(graph.are_adjacent(E1, E4));
    assert!(graph.are_adjacent(E2, E3));
    assert!(graph.are_adjacent(E1, E5));
    assert!(graph.are_adjacent(E6, E6));
    assert!(!graph.are_adjacent(E1, E2));
    assert!(!graph.are_adjacent(E4, E6));
    assert_eq!(graph.neighbors(E1), vec![E3, E4, E5]);
    assert!(graph.neighbors(E6).is_empty());

    let shared = graph.edge(E1).unwrap().end_node;
    assert_eq!(graph.edge(E3).unwrap().start_node, shared);
    assert_eq!(graph.node(shared).unwrap().coord, at(0.0, 100.0));
    assert!(graph.node(99).is_none());
}

#[test]
fn test_nearest_edges_sorted_by_distance() {
    let graph = park_graph();
    let nearest = graph.nearest_edges(point(0, 3.0, 50.0).point(), 2);

    assert_eq!(nearest.len(), 2);
    assert_eq!(nearest[0].0.id, E1);
    assert_eq!(nearest[1].0.id, E2);
    assert!((nearest[0].1 - 3.0).abs() < 0.05);
    assert!((nearest[1].1 - 7.0).abs() < 0.05);
    assert!(graph.nearest_edges(point(0, 3.0, 50.0).point(), 0).is_empty());
}

#[test]
fn test_distance_to_polyline_uses_closest_segment() {
    let edge = Edge {
        id: 1,
        way_id: 1,
        start_node: 1,
        end_node: 2,
        geometry: vec![at(0.0, 0.0), at(0.0, 50.0), at(50.0, 50.0)],
        length: 100.0,
        highway_type: "footway".to_string(),
        name: None,
    };

    // Beside the second segment, far from the first
    let d = edge.distance_to(point(0, 30.0, 54.0).point());
    assert!((d - 4.0).abs() < 0.05, "distance {}", d);
    // Beyond the end of the polyline
    let d = edge.distance_to(point(0, 0.0, -10.0).point());
    assert!((d - 10.0).abs() < 0.05, "distance {}", d);
}

#[test]
fn test_blacklist_excluded_from_total_length() {
    let graph = park_graph();

    let all: f64 = graph.edges().iter().map(|e| e.length).sum();
    let service = graph.edge(E5).unwrap().length;
    assert!(graph.is_edge_blacklisted(graph.edge(E5).unwrap()));
    assert!(!graph.is_blacklisted("footway"));
    assert!((graph.total_length() - (all - service)).abs() < 1e-6);
    assert!((service - 100.0).abs() < 0.1);
}

#[test]
fn test_rejects_inconsistent_graphs() {
    let graph = park_graph();
    let data = graph.to_data();

    let mut duplicate = data.clone();
    duplicate.edges.push(duplicate.edges[0].clone());
    assert!(GraphStore::from_data(duplicate, ["service"]).is_err());

    let mut dangling = data.clone();
    dangling.nodes.retain(|n| n.id != 8);
    assert!(GraphStore::from_data(dangling, ["service"]).is_err());

    let mut degenerate = data;
    degenerate.edges[0].geometry.truncate(1);
    assert!(GraphStore::from_data(degenerate, ["service"]).is_err());
}

#[test]
fn test_graph_data_survives_save_and_load() {
    let graph = park_graph();
    let dir = std::env::temp_dir().join(format!("parkcover-graph-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("graph.bin");

    graph.to_data().save(&path).unwrap();
    let loaded = GraphStore::from_data(GraphData::load(&path).unwrap(), ["service"]).unwrap();

    assert_eq!(loaded.edge_count(), graph.edge_count());
    assert_eq!(loaded.node_count(), graph.node_count());
    assert_eq!(loaded.edge(E3), graph.edge(E3));
    std::fs::remove_dir_all(&dir).unwrap();
}
