use geo::Coord;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::graph_store::{GraphStore, WayId};
use crate::track::TrackPoint;

/// Most likely OSM way for one track point
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WayMatch {
    pub point_index: usize,
    /// `None` when no confident match was found
    pub way_id: Option<WayId>,
    pub confidence: Option<f64>,
    /// Position the service placed the point on its own network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_coord: Option<Coord<f64>>,
}

impl WayMatch {
    pub fn matched(point_index: usize, way_id: WayId, confidence: Option<f64>) -> Self {
        Self {
            point_index,
            way_id: Some(way_id),
            confidence,
            matched_coord: None,
        }
    }

    pub fn unmatched(point_index: usize) -> Self {
        Self {
            point_index,
            way_id: None,
            confidence: None,
            matched_coord: None,
        }
    }

    pub fn with_matched_coord(mut self, coord: Option<Coord<f64>>) -> Self {
        self.matched_coord = coord;
        self
    }

    pub fn is_matched(&self) -> bool {
        self.way_id.is_some()
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("routing service unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected routing service response: {0}")]
    InvalidResponse(String),
}

impl ResolveError {
    /// Transient failures are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::Unavailable(_))
    }
}

/// Point to way resolution, usually backed by an external map-matching service.
///
/// Absence of a match is a normal answer (`WayMatch::way_id == None`); errors
/// are reserved for the service itself failing.
#[allow(async_fn_in_trait)]
pub trait WayResolver {
    async fn resolve(&self, point: &TrackPoint) -> Result<WayMatch, ResolveError>;

    /// Resolves all points of one track, one `WayMatch` per input point.
    /// Trajectory-aware services override this to send the whole shape at once.
    /// A point whose resolution fails is left unmatched.
    async fn resolve_track(&self, points: &[TrackPoint]) -> Result<Vec<WayMatch>, ResolveError> {
        Ok(resolve_each(self, points).await)
    }

    /// True when `resolve_track` answers for the track as a whole rather
    /// than point by point
    fn resolves_whole_track(&self) -> bool {
        false
    }
}

async fn resolve_each<R>(resolver: &R, points: &[TrackPoint]) -> Vec<WayMatch>
where
    R: WayResolver + ?Sized,
{
    let mut matches = Vec::with_capacity(points.len());
    for point in points {
        let way_match = match resolver.resolve(point).await {
            Ok(way_match) => way_match,
            Err(e) => {
                warn!("Point {} left unmatched: {}", point.index, e);
                WayMatch::unmatched(point.index)
            }
        };
        matches.push(way_match);
    }
    matches
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 1000,
            max_backoff_ms: 16_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based): 1s, 2s, 4s, ... capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Retries transient failures of the wrapped resolver with exponential backoff
pub struct RetryingResolver<R> {
    inner: R,
    config: RetryConfig,
}

impl<R: WayResolver> RetryingResolver<R> {
    pub fn new(inner: R, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn with_retries<T, F, Fut>(&self, mut call: F) -> Result<T, ResolveError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ResolveError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let backoff = self.config.backoff(attempt);
                    warn!(
                        "Way resolution failed ({}), retry {} after {:?}",
                        e, attempt, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("Giving up way resolution after {} attempts", attempt);
                    return Err(e);
                }
            }
        }
    }
}

impl<R: WayResolver> WayResolver for RetryingResolver<R> {
    async fn resolve(&self, point: &TrackPoint) -> Result<WayMatch, ResolveError> {
        self.with_retries(move || self.inner.resolve(point)).await
    }

    async fn resolve_track(&self, points: &[TrackPoint]) -> Result<Vec<WayMatch>, ResolveError> {
        if self.inner.resolves_whole_track() {
            self.with_retries(move || self.inner.resolve_track(points)).await
        } else {
            // Retried one point at a time
            Ok(resolve_each(self, points).await)
        }
    }

    fn resolves_whole_track(&self) -> bool {
        self.inner.resolves_whole_track()
    }
}

/// Offline fallback: the way of the nearest local edge within `max_distance` meters.
///
/// Misclassifies near junctions far more often than a routing service, so
/// it is meant for when no service is reachable.
pub struct NearestEdgeResolver<'g> {
    graph: &'g GraphStore,
    max_distance: f64,
}

impl<'g> NearestEdgeResolver<'g> {
    pub fn new(graph: &'g GraphStore, max_distance: f64) -> Self {
        Self {
            graph,
            max_distance,
        }
    }
}

impl WayResolver for NearestEdgeResolver<'_> {
    async fn resolve(&self, point: &TrackPoint) -> Result<WayMatch, ResolveError> {
        let nearest = self.graph.nearest_edges(point.point(), 1);
        Ok(match nearest.first() {
            Some((edge, distance)) if *distance <= self.max_distance => {
                WayMatch::matched(point.index, edge.way_id, None)
            }
            _ => WayMatch::unmatched(point.index),
        })
    }
}
