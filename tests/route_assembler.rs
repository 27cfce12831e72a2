//! Tests for route assembly

mod common;

use common::*;
use parkcover::edge_disambiguator::{EdgeAssignment, MatchOutcome, PointMatch};
use parkcover::route_assembler::*;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

fn assigned(point_index: usize, edge_id: u64) -> PointMatch {
    PointMatch {
        point_index,
        outcome: MatchOutcome::Assigned(EdgeAssignment {
            point_index,
            edge_id,
            distance_to_edge: 1.0,
        }),
    }
}

fn unresolved(point_index: usize) -> PointMatch {
    PointMatch {
        point_index,
        outcome: MatchOutcome::Unresolved,
    }
}

#[test]
fn test_repeated_edge_appears_once() {
    let graph = park_graph();
    let assembler = RouteAssembler::new(&graph, AssemblerConfig::default());

    let matches: Vec<PointMatch> = (0..100).map(|i| assigned(i, E3)).collect();
    let route = assembler.assemble(&matches);

    assert_eq!(route.edges(), &[E3]);
    assert_eq!(route.diagnostics.total_points, 100);
    assert_eq!(route.diagnostics.matched_points, 100);
    assert_eq!(route.diagnostics.unmatched_ratio(), 0.0);
}

#[test]
fn test_all_unmatched_gives_empty_route() {
    let graph = park_graph();
    let assembler = RouteAssembler::new(&graph, AssemblerConfig::default());

    let matches: Vec<PointMatch> = (0..40).map(unresolved).collect();
    let route = assembler.assemble(&matches);

    assert!(route.is_empty());
    assert_eq!(route.diagnostics.unresolved_points, 40);
    assert_eq!(route.diagnostics.unmatched_ratio(), 1.0);
}

#[test]
fn test_first_occurrence_order() {
    let graph = park_graph();
    let assembler = RouteAssembler::new(&graph, AssemblerConfig::default());

    let matches = vec![
        assigned(0, E1),
        assigned(1, E1),
        assigned(2, E3),
        unresolved(3),
        assigned(4, E2),
        assigned(5, E3),
        assigned(6, E1),
    ];
    let route = assembler.assemble(&matches);

    assert_eq!(route.edges(), &[E1, E3, E2]);
    assert_eq!(route.diagnostics.matched_points, 6);
    assert_eq!(route.diagnostics.unmatched_points(), 1);
}

#[test]
fn test_diagnostics_count_each_outcome() {
    let graph = park_graph();
    let assembler = RouteAssembler::new(&graph, AssemblerConfig::default());

    let matches = vec![
        assigned(0, E1),
        unresolved(1),
        PointMatch {
            point_index: 2,
            outcome: MatchOutcome::UnknownWay { way_id: 999 },
        },
        PointMatch {
            point_index: 3,
            outcome: MatchOutcome::ExcessDeviation {
                way_id: LOOP_WAY,
                distance: 40.0,
            },
        },
        PointMatch {
            point_index: 4,
            outcome: MatchOutcome::Blacklisted {
                way_id: SERVICE_WAY,
            },
        },
        // a blacklisted edge that slipped through is dropped
        assigned(5, E5),
    ];
    let d = assembler.assemble(&matches).diagnostics;

    assert_eq!(d.total_points, 6);
    assert_eq!(d.matched_points, 1);
    assert_eq!(d.unresolved_points, 1);
    assert_eq!(d.unknown_way_points, 1);
    assert_eq!(d.excess_deviation_points, 1);
    assert_eq!(d.blacklisted_points, 2);
    assert_eq!(d.unmatched_points(), 3);
}

#[test]
fn test_blacklisted_points_are_not_unmatched() {
    let graph = park_graph();
    let assembler = RouteAssembler::new(&graph, AssemblerConfig::default());

    let matches: Vec<PointMatch> = (0..10)
        .map(|i| PointMatch {
            point_index: i,
            outcome: MatchOutcome::Blacklisted {
                way_id: SERVICE_WAY,
            },
        })
        .collect();
    let route = assembler.assemble(&matches);

    assert!(route.is_empty());
    assert_eq!(route.diagnostics.blacklisted_points, 10);
    assert_eq!(route.diagnostics.unmatched_points(), 0);
    assert_eq!(route.diagnostics.unmatched_ratio(), 0.0);
}

#[test]
fn test_assembly_is_idempotent_and_order_independent() {
    let graph = park_graph();
    let assembler = RouteAssembler::new(&graph, AssemblerConfig::default());

    let mut matches = Vec::new();
    for i in 0..30 {
        let edge = match i / 10 {
            0 => E1,
            1 => E3,
            _ => E4,
        };
        matches.push(if i % 7 == 3 { unresolved(i) } else { assigned(i, edge) });
    }

    let expected = assembler.assemble(&matches);
    assert_eq!(expected.edges(), &[E1, E3, E4]);
    assert_eq!(assembler.assemble(&matches), expected);

    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..10 {
        let mut shuffled = matches.clone();
        shuffled.shuffle(&mut rng);
        assert_eq!(assembler.assemble(&shuffled), expected);
    }
}

#[test]
fn test_disconnected_transitions_are_flagged_not_bridged() {
    let graph = park_graph();
    let matches = vec![assigned(0, E1), assigned(1, E4), assigned(2, E6), assigned(3, E6)];

    let checked = RouteAssembler::new(
        &graph,
        AssemblerConfig {
            check_connectivity: true,
        },
    )
    .assemble(&matches);
    assert_eq!(checked.edges(), &[E1, E4, E6]);
    assert_eq!(
        checked.diagnostics.disconnected_transitions,
        vec![Transition {
            from_edge: E4,
            to_edge: E6,
            point_index: 2,
        }]
    );

    let unchecked = RouteAssembler::new(&graph, AssemblerConfig::default()).assemble(&matches);
    assert_eq!(unchecked.edges(), checked.edges());
    assert!(unchecked.diagnostics.disconnected_transitions.is_empty());
}
