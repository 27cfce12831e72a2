use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::graph_store::{Edge, EdgeId, GraphStore};
use crate::route_assembler::TraversedRoute;

/// Summary of one folded run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunRecord {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub edge_count: usize,
    pub length_meters: f64,
    /// Length of edges no earlier run had covered
    pub new_length_meters: f64,
}

/// Written as `stats.json`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CoverageStats {
    pub total_length_meters: f64,
    pub covered_length_meters: f64,
    pub remaining_length_meters: f64,
    pub covered_percentage: f64,
    pub remaining_percentage: f64,
    pub number_of_runs: usize,
    pub covered_edges: usize,
    pub runs: Vec<RunRecord>,
}

/// Union of traversed edges over all runs. Blacklisted edges never count.
pub struct CoverageAccumulator<'g> {
    graph: &'g GraphStore,
    covered: BTreeSet<EdgeId>,
    runs: Vec<RunRecord>,
}

impl<'g> CoverageAccumulator<'g> {
    pub fn new(graph: &'g GraphStore) -> Self {
        Self {
            graph,
            covered: BTreeSet::new(),
            runs: Vec::new(),
        }
    }

    fn counted_length(&self, edge_id: EdgeId) -> f64 {
        match self.graph.edge(edge_id) {
            Some(edge) if !self.graph.is_edge_blacklisted(edge) => edge.length,
            _ => 0.0,
        }
    }

    /// Adds a completed route. Returns false, recording nothing, when the
    /// route has no edges (the run was outside the area).
    pub fn fold(
        &mut self,
        name: Option<String>,
        date: Option<DateTime<Utc>>,
        route: &TraversedRoute,
    ) -> bool {
        if route.is_empty() {
            info!(
                "Run {} not in {} edge area, ignoring",
                name.as_deref().unwrap_or("<unnamed>"),
                self.graph.edge_count()
            );
            return false;
        }

        let mut length_meters = 0.0;
        let mut new_length_meters = 0.0;
        for &edge_id in route.edges() {
            let length = self.counted_length(edge_id);
            length_meters += length;
            if self.covered.insert(edge_id) {
                new_length_meters += length;
            }
        }

        self.runs.push(RunRecord {
            name,
            date,
            edge_count: route.len(),
            length_meters,
            new_length_meters,
        });
        true
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn is_covered(&self, edge_id: EdgeId) -> bool {
        self.covered.contains(&edge_id)
    }

    pub fn covered_edges(&self) -> impl Iterator<Item = &'g Edge> + '_ {
        self.graph
            .edges()
            .iter()
            .filter(|e| self.covered.contains(&e.id) && !self.graph.is_edge_blacklisted(e))
    }

    /// Edges still to run, excluding blacklisted ones
    pub fn remaining_edges(&self) -> impl Iterator<Item = &'g Edge> + '_ {
        self.graph
            .edges()
            .iter()
            .filter(|e| !self.covered.contains(&e.id) && !self.graph.is_edge_blacklisted(e))
    }

    pub fn stats(&self) -> CoverageStats {
        let total_length_meters = self.graph.total_length();
        let covered_length_meters: f64 = self.covered.iter().map(|id| self.counted_length(*id)).sum();
        let covered_percentage = if total_length_meters > 0.0 {
            covered_length_meters / total_length_meters * 100.0
        } else {
            0.0
        };

        CoverageStats {
            total_length_meters,
            covered_length_meters,
            remaining_length_meters: total_length_meters - covered_length_meters,
            covered_percentage,
            remaining_percentage: 100.0 - covered_percentage,
            number_of_runs: self.runs.len(),
            covered_edges: self.covered_edges().count(),
            runs: self.runs.clone(),
        }
    }
}
