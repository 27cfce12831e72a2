//! Tests for coverage accumulation

mod common;

use common::*;
use parkcover::coverage::CoverageAccumulator;
use parkcover::edge_disambiguator::{EdgeAssignment, MatchOutcome, PointMatch};
use parkcover::route_assembler::{AssemblerConfig, RouteAssembler, TraversedRoute};

fn route_over(graph: &parkcover::graph_store::GraphStore, edges: &[u64]) -> TraversedRoute {
    let matches: Vec<PointMatch> = edges
        .iter()
        .enumerate()
        .map(|(i, edge_id)| PointMatch {
            point_index: i,
            outcome: MatchOutcome::Assigned(EdgeAssignment {
                point_index: i,
                edge_id: *edge_id,
                distance_to_edge: 0.5,
            }),
        })
        .collect();
    RouteAssembler::new(graph, AssemblerConfig::default()).assemble(&matches)
}

#[test]
fn test_empty_route_is_not_a_run() {
    let graph = park_graph();
    let mut coverage = CoverageAccumulator::new(&graph);

    assert!(!coverage.fold(Some("Elsewhere".to_string()), None, &TraversedRoute::default()));
    let stats = coverage.stats();
    assert_eq!(stats.number_of_runs, 0);
    assert_eq!(stats.covered_edges, 0);
    assert_eq!(stats.covered_percentage, 0.0);
    assert_eq!(stats.remaining_percentage, 100.0);
}

#[test]
fn test_runs_union_their_edges() {
    let graph = park_graph();
    let mut coverage = CoverageAccumulator::new(&graph);

    assert!(coverage.fold(Some("First".to_string()), None, &route_over(&graph, &[E1, E3])));
    assert!(coverage.fold(Some("Second".to_string()), None, &route_over(&graph, &[E3, E4])));

    let e1 = graph.edge(E1).unwrap().length;
    let e3 = graph.edge(E3).unwrap().length;
    let e4 = graph.edge(E4).unwrap().length;

    let runs = coverage.runs();
    assert_eq!(runs.len(), 2);
    assert!((runs[0].new_length_meters - (e1 + e3)).abs() < 1e-6);
    assert!((runs[1].length_meters - (e3 + e4)).abs() < 1e-6);
    assert!((runs[1].new_length_meters - e4).abs() < 1e-6);

    let stats = coverage.stats();
    assert_eq!(stats.number_of_runs, 2);
    assert_eq!(stats.covered_edges, 3);
    assert!((stats.covered_length_meters - (e1 + e3 + e4)).abs() < 1e-6);
    assert!((stats.covered_percentage + stats.remaining_percentage - 100.0).abs() < 1e-9);
    assert!(
        (stats.remaining_length_meters - (stats.total_length_meters - stats.covered_length_meters))
            .abs()
            < 1e-9
    );

    let remaining: Vec<u64> = coverage.remaining_edges().map(|e| e.id).collect();
    assert_eq!(remaining, vec![E2, E6]);
    assert!(coverage.is_covered(E3));
}

#[test]
fn test_blacklisted_edges_do_not_count() {
    let graph = park_graph();
    let mut coverage = CoverageAccumulator::new(&graph);

    let total: f64 = graph
        .edges()
        .iter()
        .filter(|e| e.id != E5)
        .map(|e| e.length)
        .sum();
    let stats = coverage.stats();
    assert!((stats.total_length_meters - total).abs() < 1e-6);

    // Every countable edge
    coverage.fold(None, None, &route_over(&graph, &[E1, E2, E3, E4, E6]));
    let stats = coverage.stats();
    assert!((stats.covered_percentage - 100.0).abs() < 1e-9);
    assert_eq!(coverage.remaining_edges().count(), 0);
}
