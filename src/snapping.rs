use anyhow::{Result, bail};
use geo::Coord;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::track::TrackPoint;
use crate::way_resolver::ResolveError;

pub const MAPBOX_TOKEN_ENV: &str = "MAPBOX_TOKEN";
const MAPBOX_MATCHING_URL: &str = "https://api.mapbox.com/matching/v5/mapbox/walking";
/// Largest number of coordinates the matching API accepts per request
const MAX_CHUNK: usize = 100;

/// Moves raw GPS points onto the path network before way resolution.
///
/// Implementations keep the number of points and their indices.
#[allow(async_fn_in_trait)]
pub trait PointSnapper {
    async fn snap_track(&self, points: &[TrackPoint]) -> Result<Vec<TrackPoint>, ResolveError>;
}

/// Leaves every point where it was recorded
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySnapper;

impl PointSnapper for IdentitySnapper {
    async fn snap_track(&self, points: &[TrackPoint]) -> Result<Vec<TrackPoint>, ResolveError> {
        Ok(points.to_vec())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapboxConfig {
    /// Access token, falls back to `MAPBOX_TOKEN`
    pub token: Option<String>,
    pub base_url: String,
    /// Pause between consecutive chunk requests
    pub chunk_pause_ms: u64,
}

impl Default for MapboxConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: MAPBOX_MATCHING_URL.to_string(),
            chunk_pause_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MatchingResponse {
    code: String,
    #[serde(default)]
    tracepoints: Vec<Option<Tracepoint>>,
}

#[derive(Debug, Deserialize)]
struct Tracepoint {
    /// `[lon, lat]`
    location: [f64; 2],
}

/// Replaces each point of `chunk` with its returned tracepoint. Points the
/// service dropped (null tracepoints) keep their raw coordinate.
fn parse_matching(chunk: &[TrackPoint], body: &str) -> Result<Vec<TrackPoint>, ResolveError> {
    let response: MatchingResponse = serde_json::from_str(body)
        .map_err(|e| ResolveError::InvalidResponse(format!("matching: {}", e)))?;

    if response.code != "Ok" {
        warn!("Mapbox matching returned {}, keeping raw points", response.code);
        return Ok(chunk.to_vec());
    }

    let snapped = chunk
        .iter()
        .enumerate()
        .map(|(i, point)| match response.tracepoints.get(i) {
            Some(Some(tracepoint)) => point.with_coord(Coord {
                x: tracepoint.location[0],
                y: tracepoint.location[1],
            }),
            _ => point.clone(),
        })
        .collect();
    Ok(snapped)
}

/// Snaps points with the Mapbox map matching API (walking profile)
pub struct MapboxSnapper {
    client: Client,
    token: String,
    config: MapboxConfig,
}

impl MapboxSnapper {
    pub fn new(config: MapboxConfig) -> Result<Self> {
        let token = match config
            .token
            .clone()
            .or_else(|| std::env::var(MAPBOX_TOKEN_ENV).ok())
        {
            Some(token) => token,
            None => bail!(
                "Mapbox token missing: set it in the configuration or the {} environment variable",
                MAPBOX_TOKEN_ENV
            ),
        };
        Ok(Self {
            client: Client::new(),
            token,
            config,
        })
    }

    fn chunk_url(&self, chunk: &[TrackPoint]) -> String {
        let coordinates: Vec<String> = chunk
            .iter()
            .map(|p| format!("{},{}", p.longitude(), p.latitude()))
            .collect();
        let mut url = format!(
            "{}/{}?access_token={}&geometries=geojson&tidy=false",
            self.config.base_url,
            coordinates.join(";"),
            self.token
        );

        let timestamps: Option<Vec<String>> = chunk
            .iter()
            .map(|p| p.timestamp.map(|t| t.timestamp().to_string()))
            .collect();
        if let Some(timestamps) = timestamps {
            url.push_str("&timestamps=");
            url.push_str(&timestamps.join(";"));
        }
        url
    }

    async fn snap_chunk(&self, chunk: &[TrackPoint]) -> Result<Vec<TrackPoint>, ResolveError> {
        if chunk.len() < 2 {
            return Ok(chunk.to_vec());
        }

        let response = self
            .client
            .get(self.chunk_url(chunk))
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
            return Err(ResolveError::InvalidResponse(format!("HTTP {}: {}", status, text)));
        }
        parse_matching(chunk, &text)
    }
}

impl PointSnapper for MapboxSnapper {
    async fn snap_track(&self, points: &[TrackPoint]) -> Result<Vec<TrackPoint>, ResolveError> {
        info!("Snapping {} points with Mapbox", points.len());
        let mut snapped = Vec::with_capacity(points.len());
        for (i, chunk) in points.chunks(MAX_CHUNK).enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.chunk_pause_ms)).await;
            }
            debug!("Snapping chunk {} ({} points)", i, chunk.len());
            snapped.extend(self.snap_chunk(chunk).await?);
        }
        Ok(snapped)
    }
}
