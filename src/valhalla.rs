use anyhow::{Result, bail};
use geo::Coord;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use crate::cache::RequestCache;
use crate::track::TrackPoint;
use crate::way_resolver::{ResolveError, WayMatch, WayResolver};

pub const VALHALLA_URL_ENV: &str = "VALHALLA_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValhallaConfig {
    /// Base of the Valhalla API, e.g. `http://localhost:8002`. Falls back to `VALHALLA_URL`.
    pub url: Option<String>,
    /// Valhalla costing model
    pub costing: String,
    /// JSON file caching responses across runs
    pub request_cache: Option<String>,
    pub timeout_secs: u64,
    /// Traces whose `confidence_score` falls below this are treated as unmatched
    pub min_confidence: Option<f64>,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            url: None,
            costing: "pedestrian".to_string(),
            request_cache: None,
            timeout_secs: 60,
            min_confidence: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ShapePoint {
    lat: f64,
    lon: f64,
}

impl From<&TrackPoint> for ShapePoint {
    fn from(point: &TrackPoint) -> Self {
        Self {
            lat: point.latitude(),
            lon: point.longitude(),
        }
    }
}

// Field order is part of the request cache key
#[derive(Debug, Serialize)]
struct TraceAttributesRequest<'a> {
    shape: Vec<ShapePoint>,
    costing: &'a str,
    shape_match: &'a str,
}

#[derive(Debug, Serialize)]
struct LocateRequest<'a> {
    locations: Vec<ShapePoint>,
    costing: &'a str,
}

#[derive(Debug, Deserialize)]
struct TraceAttributesResponse {
    #[serde(default)]
    edges: Vec<TraceEdge>,
    #[serde(default)]
    matched_points: Vec<MatchedPoint>,
    confidence_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TraceEdge {
    way_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MatchedPoint {
    #[serde(rename = "type")]
    kind: String,
    edge_index: Option<usize>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl MatchedPoint {
    fn coord(&self) -> Option<Coord<f64>> {
        match (self.kind.as_str(), self.lat, self.lon) {
            ("matched", Some(lat), Some(lon)) => Some(Coord { x: lon, y: lat }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LocateResult {
    edges: Option<Vec<TraceEdge>>,
}

/// Parses a `trace_attributes` response into one `WayMatch` per input point
fn parse_trace_attributes(
    points: &[TrackPoint],
    body: &str,
    min_confidence: Option<f64>,
) -> Result<Vec<WayMatch>, ResolveError> {
    let response: TraceAttributesResponse = serde_json::from_str(body)
        .map_err(|e| ResolveError::InvalidResponse(format!("trace_attributes: {}", e)))?;

    if response.matched_points.len() != points.len() {
        warn!(
            "Valhalla returned {} matched points for {} input points",
            response.matched_points.len(),
            points.len()
        );
    }

    if let (Some(min), Some(score)) = (min_confidence, response.confidence_score) {
        if score < min {
            info!(
                "Trace confidence {:.3} below minimum {:.3}, treating all points as unmatched",
                score, min
            );
            return Ok(points.iter().map(|p| WayMatch::unmatched(p.index)).collect());
        }
    }

    let mut out_of_range = 0;
    let matches = points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let Some(matched) = response.matched_points.get(i) else {
                return WayMatch::unmatched(point.index);
            };
            if matched.kind != "matched" {
                return WayMatch::unmatched(point.index);
            }
            let Some(edge_index) = matched.edge_index else {
                return WayMatch::unmatched(point.index);
            };
            let way_match = match response.edges.get(edge_index) {
                Some(TraceEdge {
                    way_id: Some(way_id),
                }) => WayMatch::matched(point.index, *way_id, response.confidence_score),
                Some(_) => WayMatch::unmatched(point.index),
                None => {
                    out_of_range += 1;
                    WayMatch::unmatched(point.index)
                }
            };
            way_match.with_matched_coord(matched.coord())
        })
        .collect();

    if out_of_range > 0 {
        warn!(
            "Encountered {} edge indices higher than the {} returned edges",
            out_of_range,
            response.edges.len()
        );
    }

    Ok(matches)
}

fn parse_locate(point: &TrackPoint, body: &str) -> Result<WayMatch, ResolveError> {
    let results: Vec<LocateResult> = serde_json::from_str(body)
        .map_err(|e| ResolveError::InvalidResponse(format!("locate: {}", e)))?;

    let way_id = results
        .first()
        .and_then(|r| r.edges.as_ref())
        .and_then(|edges| edges.iter().find_map(|e| e.way_id));

    Ok(match way_id {
        Some(way_id) => WayMatch::matched(point.index, way_id, None),
        None => WayMatch::unmatched(point.index),
    })
}

/// Valhalla map-matching client
pub struct ValhallaClient {
    client: Client,
    base_url: String,
    config: ValhallaConfig,
    cache: Option<Mutex<RequestCache>>,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Result<Self> {
        let base_url = match config.url.clone().or_else(|| std::env::var(VALHALLA_URL_ENV).ok()) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => bail!(
                "Valhalla URL missing: set it in the configuration or the {} environment variable",
                VALHALLA_URL_ENV
            ),
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let cache = match &config.request_cache {
            Some(path) => Some(Mutex::new(RequestCache::open(path)?)),
            None => None,
        };

        info!("Using Valhalla at {}", base_url);
        Ok(Self {
            client,
            base_url,
            config,
            cache,
        })
    }

    fn cached(&self, key: &str) -> Option<String> {
        self.cache.as_ref().and_then(|cache| {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .map(str::to_string)
        })
    }

    fn store(&self, key: String, response: &str) {
        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, response.to_string());
        }
    }

    async fn post(&self, endpoint: &str, body: String) -> Result<String, ResolveError> {
        let key = RequestCache::key_for(&body);
        if let Some(response) = self.cached(&key) {
            debug!("Valhalla {} answered from request cache", endpoint);
            return Ok(response);
        }

        info!("Sending request to Valhalla /{}", endpoint);
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, endpoint))
            .header("Content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ResolveError::Unavailable(format!("HTTP {}: {}", status, text)));
        }
        if !status.is_success() {
            warn!("Unexpected Valhalla HTTP return value {}: {}", status, text);
            return Err(ResolveError::InvalidResponse(format!("HTTP {}: {}", status, text)));
        }

        self.store(key, &text);
        Ok(text)
    }

    fn encode<T: Serialize>(request: &T) -> Result<String, ResolveError> {
        serde_json::to_string(request).map_err(|e| ResolveError::InvalidResponse(e.to_string()))
    }
}

impl WayResolver for ValhallaClient {
    async fn resolve(&self, point: &TrackPoint) -> Result<WayMatch, ResolveError> {
        let request = LocateRequest {
            locations: vec![ShapePoint::from(point)],
            costing: &self.config.costing,
        };
        let body = self.post("locate", Self::encode(&request)?).await?;
        parse_locate(point, &body)
    }

    async fn resolve_track(&self, points: &[TrackPoint]) -> Result<Vec<WayMatch>, ResolveError> {
        match points {
            [] => return Ok(Vec::new()),
            // trace_attributes needs at least two shape points
            [single] => return Ok(vec![self.resolve(single).await?]),
            _ => {}
        }

        let request = TraceAttributesRequest {
            shape: points.iter().map(ShapePoint::from).collect(),
            costing: &self.config.costing,
            shape_match: "map_snap",
        };
        let body = self.post("trace_attributes", Self::encode(&request)?).await?;
        parse_trace_attributes(points, &body, self.config.min_confidence)
    }

    fn resolves_whole_track(&self) -> bool {
        true
    }
}
