use anyhow::Result;
use serde_json::{Map, Value, json};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufWriter, Write as _},
    path::Path,
};

use crate::graph_store::{Edge, EdgeId, GraphStore};
use crate::route_assembler::TraversedRoute;
use crate::track::TrackPoint;
use crate::way_resolver::WayMatch;

/// Edges nobody has run yet
pub const TO_RUN_COLOR: &str = "#d0d0d0";

/// One color per run, cycled
const RUN_COLORS: &[&str] = &[
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

const HIGHWAY_COLORS: &[&str] = &[
    "skyblue",
    "paleturquoise",
    "orange",
    "sienna",
    "lightgreen",
    "grey",
    "lightskyblue",
    "yellow",
    "magenta",
    "cyan",
    "red",
    "green",
    "blue",
    "black",
];

pub fn run_color(run: usize) -> &'static str {
    RUN_COLORS[run % RUN_COLORS.len()]
}

/// GeoJSON output for inspecting graphs, tracks and coverage
pub struct DebugVisualizer;

impl DebugVisualizer {
    fn edge_feature(edge: &Edge, extra: Map<String, Value>) -> Value {
        let coords: Vec<Vec<f64>> = edge.geometry.iter().map(|c| vec![c.x, c.y]).collect();

        let mut props = Map::new();
        props.insert("edge_id".to_string(), json!(edge.id));
        props.insert("osm_way_id".to_string(), json!(edge.way_id));
        props.insert("highway_type".to_string(), json!(edge.highway_type));
        props.insert("length".to_string(), json!(edge.length));
        if let Some(name) = &edge.name {
            props.insert("name".to_string(), json!(name));
        }
        props.extend(extra);

        json!({
            "type": "Feature",
            "properties": props,
            "geometry": {
                "type": "LineString",
                "coordinates": coords
            }
        })
    }

    fn collection(features: Vec<Value>) -> Value {
        json!({
            "type": "FeatureCollection",
            "features": features
        })
    }

    /// Edges of a single route in traversal order
    pub fn route_geojson(graph: &GraphStore, route: &TraversedRoute, color: &str) -> Value {
        let features = route
            .edges()
            .iter()
            .enumerate()
            .filter_map(|(order, id)| graph.edge(*id).map(|edge| (order, edge)))
            .map(|(order, edge)| {
                let mut props = Map::new();
                props.insert("order".to_string(), json!(order));
                props.insert("color".to_string(), json!(color));
                Self::edge_feature(edge, props)
            })
            .collect();
        Self::collection(features)
    }

    /// Every countable edge, colored by the last run covering it or gray
    /// when still to run. `runs` pairs a popup label with each route.
    pub fn coverage_geojson(graph: &GraphStore, runs: &[(String, &TraversedRoute)]) -> Value {
        let mut painted: HashMap<EdgeId, (usize, &str)> = HashMap::new();
        for (i, (label, route)) in runs.iter().enumerate() {
            for id in route.edges() {
                painted.insert(*id, (i, label.as_str()));
            }
        }

        let features = graph
            .edges()
            .iter()
            .filter(|edge| !graph.is_edge_blacklisted(edge))
            .map(|edge| {
                let mut props = Map::new();
                match painted.get(&edge.id) {
                    Some((run, label)) => {
                        props.insert("color".to_string(), json!(run_color(*run)));
                        props.insert("route_info".to_string(), json!(label));
                        props.insert("covered".to_string(), json!(true));
                    }
                    None => {
                        props.insert("color".to_string(), json!(TO_RUN_COLOR));
                        props.insert("covered".to_string(), json!(false));
                    }
                }
                Self::edge_feature(edge, props)
            })
            .collect();
        Self::collection(features)
    }

    /// The whole graph with one color per highway type
    pub fn graph_by_highway_geojson(graph: &GraphStore) -> Value {
        let colors: HashMap<&str, &str> = graph
            .highway_types()
            .into_iter()
            .zip(HIGHWAY_COLORS.iter().copied().cycle())
            .collect();

        let features = graph
            .edges()
            .iter()
            .map(|edge| {
                let mut props = Map::new();
                let color = colors.get(edge.highway_type.as_str()).copied().unwrap_or("white");
                props.insert("color".to_string(), json!(color));
                props.insert("blacklisted".to_string(), json!(graph.is_edge_blacklisted(edge)));
                Self::edge_feature(edge, props)
            })
            .collect();
        Self::collection(features)
    }

    /// Recorded points, the snapped points where they moved, and the
    /// positions the resolver matched them to
    pub fn track_points_geojson(
        raw: &[TrackPoint],
        resolved: &[TrackPoint],
        way_matches: &[WayMatch],
        color: &str,
    ) -> Value {
        let point_feature = |point: &TrackPoint, kind: &str, opacity: f64| {
            json!({
                "type": "Feature",
                "properties": {
                    "point_index": point.index,
                    "kind": kind,
                    "color": color,
                    "opacity": opacity,
                    "timestamp": point.timestamp.map(|t| t.to_rfc3339()),
                },
                "geometry": {
                    "type": "Point",
                    "coordinates": [point.longitude(), point.latitude()]
                }
            })
        };

        let mut features: Vec<Value> = raw.iter().map(|p| point_feature(p, "raw", 0.5)).collect();
        let moved = resolved
            .iter()
            .zip(raw)
            .filter(|(resolved, raw)| resolved.coord != raw.coord)
            .map(|(resolved, _)| point_feature(resolved, "snapped", 1.0));
        features.extend(moved);

        let matched = way_matches.iter().filter_map(|m| {
            let coord = m.matched_coord?;
            let timestamp = raw.get(m.point_index).and_then(|p| p.timestamp);
            let point = TrackPoint {
                index: m.point_index,
                coord,
                timestamp,
            };
            Some(point_feature(&point, "matched", 1.0))
        });
        features.extend(matched);
        Self::collection(features)
    }

    pub fn write_geojson(path: &Path, value: &Value) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
        Ok(())
    }
}
