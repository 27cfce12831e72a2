use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

use crate::edge_disambiguator::{DisambiguatorConfig, EdgeDisambiguator, PointMatch};
use crate::graph_store::GraphStore;
use crate::osm_preprocessing::{AreaConfig, DEFAULT_HIGHWAY_BLACKLIST};
use crate::route_assembler::{AssemblerConfig, RouteAssembler, TraversedRoute};
use crate::snapping::{IdentitySnapper, MapboxConfig, MapboxSnapper, PointSnapper};
use crate::track::{Track, TrackPoint};
use crate::valhalla::{ValhallaClient, ValhallaConfig};
use crate::way_resolver::{
    NearestEdgeResolver, ResolveError, RetryConfig, RetryingResolver, WayMatch, WayResolver,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    #[default]
    Valhalla,
    /// Local nearest-edge lookup, no service needed
    NearestEdge,
}

/// Core map matching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapMatcherConfig {
    pub area: AreaConfig,
    /// Highway types that are never counted as covered
    pub highway_blacklist: Vec<String>,
    #[serde(flatten)]
    pub disambiguator: DisambiguatorConfig,
    #[serde(flatten)]
    pub assembler: AssemblerConfig,
    /// Move points onto the path network with Mapbox before resolving ways
    pub snap_points: bool,
    pub resolver: ResolverKind,
    /// Search radius for the nearest-edge resolver (meters)
    pub nearest_edge_radius: f64,
    pub valhalla: ValhallaConfig,
    pub mapbox: MapboxConfig,
    pub retry: RetryConfig,
}

impl Default for MapMatcherConfig {
    fn default() -> Self {
        Self {
            area: AreaConfig::default(),
            highway_blacklist: DEFAULT_HIGHWAY_BLACKLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            disambiguator: DisambiguatorConfig::default(),
            assembler: AssemblerConfig::default(),
            snap_points: false,
            resolver: ResolverKind::default(),
            nearest_edge_radius: 25.0,
            valhalla: ValhallaConfig::default(),
            mapbox: MapboxConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl MapMatcherConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open config {:?}", path))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid config {:?}", path))
    }
}

/// The resolver selected by `MapMatcherConfig::resolver`
pub enum ConfiguredResolver<'g> {
    Valhalla(RetryingResolver<ValhallaClient>),
    NearestEdge(NearestEdgeResolver<'g>),
}

impl<'g> ConfiguredResolver<'g> {
    pub fn from_config(config: &MapMatcherConfig, graph: &'g GraphStore) -> Result<Self> {
        Ok(match config.resolver {
            ResolverKind::Valhalla => ConfiguredResolver::Valhalla(RetryingResolver::new(
                ValhallaClient::new(config.valhalla.clone())?,
                config.retry.clone(),
            )),
            ResolverKind::NearestEdge => {
                info!(
                    "Resolving ways locally within {} m of the graph",
                    config.nearest_edge_radius
                );
                ConfiguredResolver::NearestEdge(NearestEdgeResolver::new(
                    graph,
                    config.nearest_edge_radius,
                ))
            }
        })
    }
}

impl WayResolver for ConfiguredResolver<'_> {
    async fn resolve(&self, point: &TrackPoint) -> Result<WayMatch, ResolveError> {
        match self {
            ConfiguredResolver::Valhalla(resolver) => resolver.resolve(point).await,
            ConfiguredResolver::NearestEdge(resolver) => resolver.resolve(point).await,
        }
    }

    async fn resolve_track(&self, points: &[TrackPoint]) -> Result<Vec<WayMatch>, ResolveError> {
        match self {
            ConfiguredResolver::Valhalla(resolver) => resolver.resolve_track(points).await,
            ConfiguredResolver::NearestEdge(resolver) => resolver.resolve_track(points).await,
        }
    }

    fn resolves_whole_track(&self) -> bool {
        match self {
            ConfiguredResolver::Valhalla(resolver) => resolver.resolves_whole_track(),
            ConfiguredResolver::NearestEdge(resolver) => resolver.resolves_whole_track(),
        }
    }
}

/// The snapper selected by `MapMatcherConfig::snap_points`
pub enum ConfiguredSnapper {
    Identity(IdentitySnapper),
    Mapbox(MapboxSnapper),
}

impl ConfiguredSnapper {
    pub fn from_config(config: &MapMatcherConfig) -> Result<Self> {
        if config.snap_points {
            Ok(ConfiguredSnapper::Mapbox(MapboxSnapper::new(config.mapbox.clone())?))
        } else {
            Ok(ConfiguredSnapper::Identity(IdentitySnapper))
        }
    }
}

impl PointSnapper for ConfiguredSnapper {
    async fn snap_track(&self, points: &[TrackPoint]) -> Result<Vec<TrackPoint>, ResolveError> {
        match self {
            ConfiguredSnapper::Identity(snapper) => snapper.snap_track(points).await,
            ConfiguredSnapper::Mapbox(snapper) => snapper.snap_track(points).await,
        }
    }
}

/// Everything computed for one track
#[derive(Clone, Debug)]
pub struct TrackMatch {
    /// Points as resolved, i.e. after snapping
    pub points: Vec<TrackPoint>,
    /// Resolver answers for `points`
    pub way_matches: Vec<WayMatch>,
    pub matches: Vec<PointMatch>,
    pub route: TraversedRoute,
}

/// Map matcher turning tracks into traversed edges of the graph
pub struct MapMatcher<'g, R, S = IdentitySnapper> {
    resolver: R,
    snapper: S,
    disambiguator: EdgeDisambiguator<'g>,
    assembler: RouteAssembler<'g>,
}

impl<'g, R: WayResolver> MapMatcher<'g, R, IdentitySnapper> {
    pub fn new(graph: &'g GraphStore, resolver: R, config: &MapMatcherConfig) -> Self {
        Self {
            resolver,
            snapper: IdentitySnapper,
            disambiguator: EdgeDisambiguator::new(graph, config.disambiguator.clone()),
            assembler: RouteAssembler::new(graph, config.assembler.clone()),
        }
    }
}

impl<'g, R: WayResolver, S: PointSnapper> MapMatcher<'g, R, S> {
    pub fn with_snapper<T: PointSnapper>(self, snapper: T) -> MapMatcher<'g, R, T> {
        MapMatcher {
            resolver: self.resolver,
            snapper,
            disambiguator: self.disambiguator,
            assembler: self.assembler,
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Matches a track to its traversed route. Never fails: service errors
    /// leave the affected points unmatched.
    pub async fn match_track(&self, track: &Track) -> TraversedRoute {
        self.match_track_detailed(track).await.route
    }

    pub async fn match_track_detailed(&self, track: &Track) -> TrackMatch {
        let label = track.label();
        let raw = track.points();

        let points = if raw.is_empty() {
            Vec::new()
        } else {
            match self.snapper.snap_track(raw).await {
                Ok(snapped) if snapped.len() == raw.len() => snapped,
                Ok(snapped) => {
                    warn!(
                        "Snapping {} returned {} of {} points, using raw points",
                        label,
                        snapped.len(),
                        raw.len()
                    );
                    raw.to_vec()
                }
                Err(e) => {
                    warn!("Snapping {} failed ({}), using raw points", label, e);
                    raw.to_vec()
                }
            }
        };

        let way_matches = if points.is_empty() {
            Vec::new()
        } else {
            match self.resolver.resolve_track(&points).await {
                Ok(way_matches) => way_matches,
                Err(e) => {
                    warn!("Way resolution for {} failed: {}", label, e);
                    Vec::new()
                }
            }
        };
        debug!(
            "{}: {} of {} points resolved to a way",
            label,
            way_matches.iter().filter(|m| m.is_matched()).count(),
            points.len()
        );

        let matches = self.disambiguator.disambiguate_track(&points, &way_matches);
        let route = self.assembler.assemble(&matches);
        info!(
            "{}: {} edges, {:.1}% of {} points unmatched",
            label,
            route.len(),
            route.diagnostics.unmatched_ratio() * 100.0,
            route.diagnostics.total_points
        );

        TrackMatch {
            points,
            way_matches,
            matches,
            route,
        }
    }
}
