use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::edge_disambiguator::{MatchOutcome, PointMatch};
use crate::graph_store::{EdgeId, GraphStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Record consecutive edges that do not share a node
    pub check_connectivity: bool,
}

/// A step between two consecutive distinct edges that are not adjacent
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from_edge: EdgeId,
    pub to_edge: EdgeId,
    /// First point assigned to `to_edge`
    pub point_index: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RouteDiagnostics {
    pub total_points: usize,
    pub matched_points: usize,
    pub unresolved_points: usize,
    pub unknown_way_points: usize,
    pub excess_deviation_points: usize,
    pub blacklisted_points: usize,
    pub disconnected_transitions: Vec<Transition>,
}

impl RouteDiagnostics {
    /// Points that failed to match. Blacklisted points are excluded on purpose
    /// and not counted here.
    pub fn unmatched_points(&self) -> usize {
        self.unresolved_points + self.unknown_way_points + self.excess_deviation_points
    }

    /// Share of points that failed to match, 0.0 for an empty track
    pub fn unmatched_ratio(&self) -> f64 {
        if self.total_points == 0 {
            0.0
        } else {
            self.unmatched_points() as f64 / self.total_points as f64
        }
    }
}

/// The distinct edges one track traversed, in the order first reached
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TraversedRoute {
    edges: Vec<EdgeId>,
    pub diagnostics: RouteDiagnostics,
}

impl TraversedRoute {
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn edge_set(&self) -> BTreeSet<EdgeId> {
        self.edges.iter().copied().collect()
    }

    pub fn contains(&self, edge_id: EdgeId) -> bool {
        self.edges.contains(&edge_id)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Folds per-point matches of one track into a `TraversedRoute`
pub struct RouteAssembler<'g> {
    graph: &'g GraphStore,
    config: AssemblerConfig,
}

impl<'g> RouteAssembler<'g> {
    pub fn new(graph: &'g GraphStore, config: AssemblerConfig) -> Self {
        Self { graph, config }
    }

    /// Builds the route from the assigned points. Input order does not
    /// matter; matches are read by point index and a repeated index counts once.
    pub fn assemble(&self, matches: &[PointMatch]) -> TraversedRoute {
        let mut ordered: Vec<&PointMatch> = matches.iter().collect();
        ordered.sort_by_key(|m| m.point_index);
        ordered.dedup_by_key(|m| m.point_index);

        let mut diagnostics = RouteDiagnostics {
            total_points: ordered.len(),
            ..Default::default()
        };
        let mut edges = Vec::new();
        let mut seen = HashSet::new();
        let mut last: Option<EdgeId> = None;

        for point_match in ordered {
            let edge_id = match &point_match.outcome {
                MatchOutcome::Assigned(assignment) => assignment.edge_id,
                MatchOutcome::Unresolved => {
                    diagnostics.unresolved_points += 1;
                    continue;
                }
                MatchOutcome::UnknownWay { .. } => {
                    diagnostics.unknown_way_points += 1;
                    continue;
                }
                MatchOutcome::ExcessDeviation { .. } => {
                    diagnostics.excess_deviation_points += 1;
                    continue;
                }
                MatchOutcome::Blacklisted { .. } => {
                    diagnostics.blacklisted_points += 1;
                    continue;
                }
            };

            match self.graph.edge(edge_id) {
                Some(edge) if self.graph.is_edge_blacklisted(edge) => {
                    diagnostics.blacklisted_points += 1;
                    continue;
                }
                Some(_) => {}
                None => {
                    debug!("Point {} assigned to unknown edge {}", point_match.point_index, edge_id);
                    diagnostics.unknown_way_points += 1;
                    continue;
                }
            }

            diagnostics.matched_points += 1;
            if last == Some(edge_id) {
                continue;
            }

            if let Some(previous) = last {
                if self.config.check_connectivity && !self.graph.are_adjacent(previous, edge_id) {
                    warn!(
                        "Edges {} and {} are not connected (point {})",
                        previous, edge_id, point_match.point_index
                    );
                    diagnostics.disconnected_transitions.push(Transition {
                        from_edge: previous,
                        to_edge: edge_id,
                        point_index: point_match.point_index,
                    });
                }
            }

            if seen.insert(edge_id) {
                edges.push(edge_id);
            }
            last = Some(edge_id);
        }

        debug!(
            "Assembled route with {} edges from {} points ({:.1}% unmatched)",
            edges.len(),
            diagnostics.total_points,
            diagnostics.unmatched_ratio() * 100.0
        );

        TraversedRoute { edges, diagnostics }
    }
}
