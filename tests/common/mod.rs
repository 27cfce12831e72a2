//! Shared fixtures: a small park graph and scripted resolvers
#![allow(dead_code)]

use geo::Coord;
use parkcover::graph_store::{Edge, GraphStore, Node, WayId, geometry_length};
use parkcover::track::{Track, TrackPoint};
use parkcover::way_resolver::{ResolveError, WayMatch, WayResolver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const BASE_LAT: f64 = 48.16;
pub const BASE_LON: f64 = 11.60;

pub const LOOP_WAY: WayId = 100;
pub const EAST_WAY: WayId = 200;
pub const SERVICE_WAY: WayId = 300;
pub const ISLAND_WAY: WayId = 400;

/// South side of the loop, along `north = 0`
pub const E1: u64 = 1;
/// North side of the loop, along `north = 10`
pub const E2: u64 = 2;
/// East side of the loop, joining E1 and E2
pub const E3: u64 = 3;
pub const E4: u64 = 4;
/// Blacklisted service road
pub const E5: u64 = 5;
/// Not connected to anything
pub const E6: u64 = 6;

const METERS_PER_DEGREE: f64 = 6_371_008.8 * std::f64::consts::PI / 180.0;

/// Coordinate `north`/`east` meters away from the fixture origin
pub fn at(north: f64, east: f64) -> Coord<f64> {
    Coord {
        x: BASE_LON + east / (METERS_PER_DEGREE * BASE_LAT.to_radians().cos()),
        y: BASE_LAT + north / METERS_PER_DEGREE,
    }
}

pub fn point(index: usize, north: f64, east: f64) -> TrackPoint {
    let c = at(north, east);
    TrackPoint::new(index, c.y, c.x, None)
}

fn edge(id: u64, way_id: WayId, nodes: (u64, u64), ends: [(f64, f64); 2], highway: &str) -> Edge {
    let geometry = vec![at(ends[0].0, ends[0].1), at(ends[1].0, ends[1].1)];
    Edge {
        id,
        way_id,
        start_node: nodes.0,
        end_node: nodes.1,
        length: geometry_length(&geometry),
        geometry,
        highway_type: highway.to_string(),
        name: None,
    }
}

/// ```text
///   n4 ---E2--- n3
///   |            |E3
///   n1 ---E1--- n2 ---E4--- n5        n7 ---E6--- n8 (north 100)
///   |E5
///   n6
/// ```
pub fn park_graph() -> GraphStore {
    let node_positions = [
        (1, (0.0, 0.0)),
        (2, (0.0, 100.0)),
        (3, (10.0, 100.0)),
        (4, (10.0, 0.0)),
        (5, (0.0, 200.0)),
        (6, (-100.0, 0.0)),
        (7, (100.0, 300.0)),
        (8, (100.0, 400.0)),
    ];
    let nodes = node_positions
        .iter()
        .map(|(id, (north, east))| Node {
            id: *id,
            coord: at(*north, *east),
        })
        .collect();

    let edges = vec![
        edge(E1, LOOP_WAY, (1, 2), [(0.0, 0.0), (0.0, 100.0)], "footway"),
        edge(E2, LOOP_WAY, (3, 4), [(10.0, 100.0), (10.0, 0.0)], "footway"),
        edge(E3, LOOP_WAY, (2, 3), [(0.0, 100.0), (10.0, 100.0)], "footway"),
        edge(E4, EAST_WAY, (2, 5), [(0.0, 100.0), (0.0, 200.0)], "path"),
        edge(E5, SERVICE_WAY, (1, 6), [(0.0, 0.0), (-100.0, 0.0)], "service"),
        edge(E6, ISLAND_WAY, (7, 8), [(100.0, 300.0), (100.0, 400.0)], "path"),
    ];

    GraphStore::new(nodes, edges, ["service"]).unwrap()
}

/// Points walked along E1, one meter north of it
pub fn along_e1(count: usize) -> Vec<TrackPoint> {
    (0..count)
        .map(|i| point(i, 1.0, 5.0 + 90.0 * i as f64 / count as f64))
        .collect()
}

pub fn track(name: &str, points: Vec<TrackPoint>) -> Track {
    let samples: Vec<_> = points
        .iter()
        .map(|p| (p.latitude(), p.longitude(), p.timestamp))
        .collect();
    Track::from_samples(Some(name.to_string()), samples)
}

/// Answers from a fixed point index to way table
#[derive(Default)]
pub struct FixedResolver {
    ways: HashMap<usize, WayId>,
}

impl FixedResolver {
    pub fn new(ways: impl IntoIterator<Item = (usize, WayId)>) -> Self {
        Self {
            ways: ways.into_iter().collect(),
        }
    }

    /// Every index in `0..count` resolves to `way_id`
    pub fn uniform(count: usize, way_id: WayId) -> Self {
        Self::new((0..count).map(|i| (i, way_id)))
    }
}

impl WayResolver for FixedResolver {
    async fn resolve(&self, point: &TrackPoint) -> Result<WayMatch, ResolveError> {
        Ok(match self.ways.get(&point.index) {
            Some(way_id) => WayMatch::matched(point.index, *way_id, None),
            None => WayMatch::unmatched(point.index),
        })
    }
}

/// Always fails, counting calls
pub struct FailingResolver {
    pub calls: AtomicUsize,
    pub transient: bool,
}

impl FailingResolver {
    pub fn new(transient: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            transient,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WayResolver for FailingResolver {
    async fn resolve(&self, _point: &TrackPoint) -> Result<WayMatch, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.transient {
            Err(ResolveError::Unavailable("connection refused".to_string()))
        } else {
            Err(ResolveError::InvalidResponse("HTTP 400".to_string()))
        }
    }

    async fn resolve_track(&self, _points: &[TrackPoint]) -> Result<Vec<WayMatch>, ResolveError> {
        let way_match = self.resolve(&TrackPoint::new(0, BASE_LAT, BASE_LON, None)).await?;
        Ok(vec![way_match])
    }

    fn resolves_whole_track(&self) -> bool {
        true
    }
}

/// Resolves like `FixedResolver` except for `down`, which always fails
pub struct PartlyDownResolver {
    pub ways: FixedResolver,
    pub down: usize,
    pub calls_for_down: AtomicUsize,
}

impl PartlyDownResolver {
    pub fn new(ways: FixedResolver, down: usize) -> Self {
        Self {
            ways,
            down,
            calls_for_down: AtomicUsize::new(0),
        }
    }

    pub fn calls_for_down(&self) -> usize {
        self.calls_for_down.load(Ordering::SeqCst)
    }
}

impl WayResolver for PartlyDownResolver {
    async fn resolve(&self, point: &TrackPoint) -> Result<WayMatch, ResolveError> {
        if point.index == self.down {
            self.calls_for_down.fetch_add(1, Ordering::SeqCst);
            return Err(ResolveError::Unavailable("HTTP 503".to_string()));
        }
        self.ways.resolve(point).await
    }
}
