use anyhow::Result;
use geo::Coord;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use osmpbf::{Element, ElementReader};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    time::Instant,
};

use crate::cache::stable_hash;
use crate::graph_store::{Edge, GraphData, Node, geometry_length};

/// Highway types kept when reading the area from OSM
pub const DEFAULT_HIGHWAY_WHITELIST: &[&str] = &[
    "footway",
    "cycleway",
    "residential",
    "steps",
    "service",
    "unclassified",
    "track",
    "trunk_link",
    "trunk",
    "path",
    "bridleway",
];

/// Highway types that never count as covered
pub const DEFAULT_HIGHWAY_BLACKLIST: &[&str] = &["service", "trunk", "trunk_link"];

/// Which part of which OSM extract makes up the tracked area
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    /// Display name of the area
    pub name: String,
    /// Path to OpenStreetMap PBF file
    pub osm_pbf_path: String,
    /// `[min_lon, min_lat, max_lon, max_lat]`; `None` keeps the whole extract
    pub bbox: Option<[f64; 4]>,
    /// Directory for cached graphs
    pub graph_cache_dir: String,
    pub highway_whitelist: Vec<String>,
    /// Split ways only at junctions. When false every OSM node pair is an edge.
    pub simplify: bool,
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            name: "Englischer Garten".to_string(),
            osm_pbf_path: String::new(),
            bbox: Some([11.582, 48.142, 11.625, 48.190]),
            graph_cache_dir: "data".to_string(),
            highway_whitelist: DEFAULT_HIGHWAY_WHITELIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            simplify: true,
        }
    }
}

impl AreaConfig {
    fn contains(&self, coord: Coord<f64>) -> bool {
        match self.bbox {
            Some([min_lon, min_lat, max_lon, max_lat]) => {
                coord.x >= min_lon && coord.x <= max_lon && coord.y >= min_lat && coord.y <= max_lat
            }
            None => true,
        }
    }

    fn cache_key(&self) -> String {
        format!(
            "{}@{:?}@{}@{}",
            self.osm_pbf_path,
            self.bbox,
            self.highway_whitelist.join("|"),
            self.simplify
        )
    }
}

/// A highway way as read from the extract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WayEntry {
    pub id: u64,
    pub nodes: Vec<u64>,
    pub highway_type: String,
    pub name: Option<String>,
}

/// Builds the area graph from an OSM PBF extract
pub struct OsmProcessor {
    config: AreaConfig,
}

impl OsmProcessor {
    pub fn new(config: AreaConfig) -> Self {
        Self { config }
    }

    /// Location of the cached graph for this area configuration
    pub fn cache_path(&self) -> PathBuf {
        Path::new(&self.config.graph_cache_dir)
            .join(format!("{}.bin", stable_hash(&self.config.cache_key())))
    }

    /// Loads the cached graph, building and caching it first if needed
    pub fn load_or_build(&self) -> Result<GraphData> {
        let cache_path = self.cache_path();
        if cache_path.is_file() {
            info!("Using cached graph {:?} for {}", cache_path, self.config.name);
            return GraphData::load(&cache_path);
        }

        info!(
            "Couldn't find cache file {:?} - building graph for {} from {}",
            cache_path, self.config.name, self.config.osm_pbf_path
        );
        let data = self.process_pbf()?;
        data.save(&cache_path)?;
        info!("Graph cached at {:?}", cache_path);
        Ok(data)
    }

    /// Reads nodes and highway ways from the extract and builds the graph
    pub fn process_pbf(&self) -> Result<GraphData> {
        let start_time = Instant::now();
        let whitelist: HashSet<&str> = self
            .config
            .highway_whitelist
            .iter()
            .map(String::as_str)
            .collect();

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("[{elapsed_precise}] {spinner} {pos} elements - {msg}")?,
        );
        pb.set_message("Extracting elements");

        let mut node_coords: HashMap<u64, Coord<f64>> = HashMap::new();
        let mut ways: Vec<WayEntry> = Vec::new();

        let reader = ElementReader::from_path(&self.config.osm_pbf_path)?;
        reader.for_each(|element| {
            pb.inc(1);
            match element {
                Element::Node(node) => {
                    let coord = Coord {
                        x: node.lon(),
                        y: node.lat(),
                    };
                    if self.config.contains(coord) {
                        node_coords.insert(node.id() as u64, coord);
                    }
                }
                Element::DenseNode(node) => {
                    let coord = Coord {
                        x: node.lon(),
                        y: node.lat(),
                    };
                    if self.config.contains(coord) {
                        node_coords.insert(node.id() as u64, coord);
                    }
                }
                Element::Way(way) => {
                    let highway_type = way
                        .tags()
                        .find(|(key, _)| *key == "highway")
                        .map(|(_, value)| value.to_string());

                    if let Some(highway) = highway_type {
                        if !whitelist.contains(highway.as_str()) {
                            return;
                        }
                        let name = way
                            .tags()
                            .find(|(key, _)| *key == "name")
                            .map(|(_, value)| value.to_string());
                        let nodes: Vec<u64> = way.refs().map(|id| id as u64).collect();

                        if nodes.len() > 1 {
                            ways.push(WayEntry {
                                id: way.id() as u64,
                                nodes,
                                highway_type: highway,
                                name,
                            });
                        }
                    }
                }
                _ => {}
            }
        })?;
        pb.finish_with_message("Element extraction complete");

        debug!(
            "Read {} nodes inside the area and {} highway ways in {:?}",
            node_coords.len(),
            ways.len(),
            start_time.elapsed()
        );

        let data = self.build_graph(&node_coords, ways);
        if data.edges.is_empty() {
            warn!(
                "No edges found for {} - check the bounding box and highway whitelist",
                self.config.name
            );
        }
        info!(
            "Built graph with {} nodes and {} edges in {:?}",
            data.nodes.len(),
            data.edges.len(),
            start_time.elapsed()
        );
        Ok(data)
    }

    /// Turns ways into edges split at junctions (or at every node when not simplifying).
    ///
    /// Nodes without a known location (outside the area) cut a way into
    /// separate runs; runs shorter than two nodes are dropped.
    pub fn build_graph(&self, node_coords: &HashMap<u64, Coord<f64>>, mut ways: Vec<WayEntry>) -> GraphData {
        ways.sort_by_key(|w| w.id);

        let mut runs: Vec<(&WayEntry, &[u64])> = Vec::new();
        for way in &ways {
            for run in way.nodes.split(|id| !node_coords.contains_key(id)) {
                if run.len() > 1 {
                    runs.push((way, run));
                }
            }
        }

        let mut usage: HashMap<u64, usize> = HashMap::new();
        for (_, run) in &runs {
            for id in run.iter() {
                *usage.entry(*id).or_default() += 1;
            }
        }

        let mut edges = Vec::new();
        let mut endpoint_ids = HashSet::new();
        let mut next_edge_id = 0u64;

        for (way, run) in &runs {
            let last = run.len() - 1;
            let mut start = 0;
            for i in 1..=last {
                let is_junction = usage.get(&run[i]).copied().unwrap_or(0) > 1;
                if self.config.simplify && !is_junction && i != last {
                    continue;
                }

                let mut geometry: Vec<Coord<f64>> =
                    run[start..=i].iter().filter_map(|id| node_coords.get(id).copied()).collect();
                geometry.dedup();
                if geometry.len() >= 2 {
                    edges.push(Edge {
                        id: next_edge_id,
                        way_id: way.id,
                        start_node: run[start],
                        end_node: run[i],
                        length: geometry_length(&geometry),
                        geometry,
                        highway_type: way.highway_type.clone(),
                        name: way.name.clone(),
                    });
                    next_edge_id += 1;
                    endpoint_ids.insert(run[start]);
                    endpoint_ids.insert(run[i]);
                }
                start = i;
            }
        }

        let mut nodes: Vec<Node> = endpoint_ids
            .into_iter()
            .filter_map(|id| node_coords.get(&id).map(|coord| Node { id, coord: *coord }))
            .collect();
        nodes.sort_by_key(|n| n.id);

        GraphData { nodes, edges }
    }
}
