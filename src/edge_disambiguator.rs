use log::{debug, warn};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::graph_store::{EdgeId, GraphStore, WayId};
use crate::track::TrackPoint;
use crate::way_resolver::WayMatch;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisambiguatorConfig {
    /// Points farther than this (meters) from every candidate edge stay unmatched
    pub max_deviation: f64,
    /// Resolve near-ties towards the edge continuing the previous assignment
    pub continuity_tie_break: bool,
    /// Candidates within this many meters of the closest one count as tied
    pub tie_tolerance: f64,
}

impl Default for DisambiguatorConfig {
    fn default() -> Self {
        Self {
            max_deviation: 20.0,
            continuity_tie_break: true,
            tie_tolerance: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EdgeAssignment {
    pub point_index: usize,
    pub edge_id: EdgeId,
    /// Meters
    pub distance_to_edge: f64,
}

/// What happened to one point on its way from a `WayMatch` to an edge
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Assigned(EdgeAssignment),
    /// The resolver had no way for the point
    Unresolved,
    /// The resolved way has no edges in the graph
    UnknownWay { way_id: WayId },
    ExcessDeviation { way_id: WayId, distance: f64 },
    /// Every edge of the resolved way is blacklisted
    Blacklisted { way_id: WayId },
}

impl MatchOutcome {
    pub fn assignment(&self) -> Option<&EdgeAssignment> {
        match self {
            MatchOutcome::Assigned(assignment) => Some(assignment),
            _ => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.assignment().is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PointMatch {
    pub point_index: usize,
    pub outcome: MatchOutcome,
}

/// Distances of one point to every selectable edge of its way
enum Measured {
    Unresolved,
    UnknownWay(WayId),
    Blacklisted(WayId),
    /// Sorted by distance, then edge id
    Candidates(WayId, Vec<(EdgeId, f64)>),
}

/// Picks the edge of a resolved way that a point actually lies on
pub struct EdgeDisambiguator<'g> {
    graph: &'g GraphStore,
    config: DisambiguatorConfig,
}

impl<'g> EdgeDisambiguator<'g> {
    pub fn new(graph: &'g GraphStore, config: DisambiguatorConfig) -> Self {
        Self { graph, config }
    }

    pub fn config(&self) -> &DisambiguatorConfig {
        &self.config
    }

    /// Assigns a single point. `previous` is the last assignment in the same
    /// track and only matters for the continuity tie-break.
    pub fn disambiguate(
        &self,
        point: &TrackPoint,
        way_match: &WayMatch,
        previous: Option<&EdgeAssignment>,
    ) -> MatchOutcome {
        let measured = self.measure(point, Some(way_match));
        self.select(point.index, measured, previous)
    }

    /// Assigns every point of a track, returning one `PointMatch` per point
    /// ordered by point index. Matches are paired with points by index; points
    /// without a match are unresolved.
    pub fn disambiguate_track(&self, points: &[TrackPoint], matches: &[WayMatch]) -> Vec<PointMatch> {
        let mut by_index: HashMap<usize, &WayMatch> = HashMap::with_capacity(matches.len());
        for way_match in matches {
            by_index.entry(way_match.point_index).or_insert(way_match);
        }

        let mut ordered: Vec<&TrackPoint> = points.iter().collect();
        ordered.sort_by_key(|p| p.index);
        ordered.dedup_by_key(|p| p.index);

        let stray = by_index
            .keys()
            .filter(|index| ordered.binary_search_by_key(*index, |p| p.index).is_err())
            .count();
        if stray > 0 {
            warn!("Ignoring {} way matches for points not in the track", stray);
        }

        let measured: Vec<Measured> = ordered
            .par_iter()
            .map(|point| self.measure(point, by_index.get(&point.index).copied()))
            .collect();

        let mut warned_ways = HashSet::new();
        let mut previous: Option<EdgeAssignment> = None;
        let mut results = Vec::with_capacity(ordered.len());

        for (point, measured) in ordered.iter().zip(measured) {
            if let Measured::UnknownWay(way_id) = measured {
                if warned_ways.insert(way_id) {
                    warn!("Way {} is not part of the graph", way_id);
                }
            }
            let outcome = self.select(point.index, measured, previous.as_ref());
            if let MatchOutcome::Assigned(assignment) = &outcome {
                previous = Some(assignment.clone());
            }
            results.push(PointMatch {
                point_index: point.index,
                outcome,
            });
        }

        debug!(
            "Assigned {} of {} points to edges",
            results.iter().filter(|m| m.outcome.is_assigned()).count(),
            results.len()
        );
        results
    }

    fn measure(&self, point: &TrackPoint, way_match: Option<&WayMatch>) -> Measured {
        let Some(way_id) = way_match.and_then(|m| m.way_id) else {
            return Measured::Unresolved;
        };

        let edges = self.graph.edges_for_way(way_id);
        if edges.is_empty() {
            return Measured::UnknownWay(way_id);
        }

        let mut candidates: Vec<(EdgeId, f64)> = edges
            .iter()
            .filter(|edge| !self.graph.is_edge_blacklisted(edge))
            .map(|edge| (edge.id, edge.distance_to(point.point())))
            .filter(|(_, distance)| distance.is_finite())
            .collect();
        if candidates.is_empty() {
            return Measured::Blacklisted(way_id);
        }

        candidates.sort_by_key(|(id, distance)| (OrderedFloat(*distance), *id));
        Measured::Candidates(way_id, candidates)
    }

    fn select(
        &self,
        point_index: usize,
        measured: Measured,
        previous: Option<&EdgeAssignment>,
    ) -> MatchOutcome {
        let (way_id, candidates) = match measured {
            Measured::Unresolved => return MatchOutcome::Unresolved,
            Measured::UnknownWay(way_id) => return MatchOutcome::UnknownWay { way_id },
            Measured::Blacklisted(way_id) => return MatchOutcome::Blacklisted { way_id },
            Measured::Candidates(way_id, candidates) => (way_id, candidates),
        };

        let closest = candidates[0].1;
        if closest > self.config.max_deviation {
            return MatchOutcome::ExcessDeviation {
                way_id,
                distance: closest,
            };
        }

        let tied: Vec<(EdgeId, f64)> = candidates
            .into_iter()
            .take_while(|(_, d)| d - closest <= self.config.tie_tolerance)
            .filter(|(_, d)| *d <= self.config.max_deviation)
            .collect();

        let previous_edge = previous
            .filter(|_| self.config.continuity_tie_break && tied.len() > 1)
            .and_then(|p| self.graph.edge(p.edge_id));

        let chosen = match previous_edge {
            Some(previous_edge) => tied.iter().min_by_key(|(id, _)| {
                let continuity = self
                    .graph
                    .edge(*id)
                    .map(|edge| edge.endpoint_distance_to(previous_edge))
                    .unwrap_or(f64::INFINITY);
                (OrderedFloat(continuity), *id)
            }),
            None => tied.iter().min_by_key(|(id, _)| *id),
        };

        match chosen {
            Some((edge_id, distance)) => MatchOutcome::Assigned(EdgeAssignment {
                point_index,
                edge_id: *edge_id,
                distance_to_edge: *distance,
            }),
            None => MatchOutcome::ExcessDeviation {
                way_id,
                distance: closest,
            },
        }
    }
}
