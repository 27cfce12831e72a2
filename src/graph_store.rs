use anyhow::{Result, anyhow, bail};
use geo::{Closest, ClosestPoint, Coord, Distance, Haversine, Line, Point};
use log::{debug, info};
use ordered_float::OrderedFloat;
use petgraph::prelude::UnGraphMap;
use rstar::RTree;
use rstar::primitives::{GeomWithData, Line as IndexLine};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

pub type NodeId = u64;
pub type EdgeId = u64;
pub type WayId = u64;

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// `nearest_edges` pulls this many times `k` distinct edges out of the
/// projected index before ranking them by exact distance.
const NEAREST_SEARCH_WIDTH: usize = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// x = longitude, y = latitude
    pub coord: Coord<f64>,
}

/// A traversable segment of an OSM way between two graph nodes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub way_id: WayId,
    pub start_node: NodeId,
    pub end_node: NodeId,
    pub geometry: Vec<Coord<f64>>,
    /// Length in meters
    pub length: f64,
    pub highway_type: String,
    pub name: Option<String>,
}

impl Edge {
    pub fn start_point(&self) -> Point<f64> {
        Point::from(self.geometry[0])
    }

    pub fn end_point(&self) -> Point<f64> {
        Point::from(self.geometry[self.geometry.len() - 1])
    }

    /// Perpendicular distance in meters from `point` to the polyline: the
    /// minimum over its constituent segments.
    pub fn distance_to(&self, point: Point<f64>) -> f64 {
        let projection = LocalProjection::at_latitude(point.y());
        let query = projection.project(point.0);

        self.geometry
            .windows(2)
            .map(|pair| {
                let a = projection.project(pair[0]);
                let b = projection.project(pair[1]);
                projected_distance(query, Line::new(a, b))
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Distance in meters from the nearer of this edge's endpoints to `other`'s geometry.
    pub fn endpoint_distance_to(&self, other: &Edge) -> f64 {
        other
            .distance_to(self.start_point())
            .min(other.distance_to(self.end_point()))
    }
}

/// Haversine length of a coordinate sequence in meters
pub fn geometry_length(coords: &[Coord<f64>]) -> f64 {
    coords
        .windows(2)
        .map(|pair| Haversine.distance(Point::from(pair[0]), Point::from(pair[1])))
        .sum()
}

fn projected_distance(query: Coord<f64>, line: Line<f64>) -> f64 {
    let closest = match line.closest_point(&Point::from(query)) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => p.0,
        // zero-length segment
        Closest::Indeterminate => line.start,
    };
    (query.x - closest.x).hypot(query.y - closest.y)
}

/// Equirectangular projection to meters around a reference latitude. Accurate
/// enough for the extent of a single park.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LocalProjection {
    cos_lat: f64,
}

impl LocalProjection {
    pub(crate) fn at_latitude(lat: f64) -> Self {
        Self {
            cos_lat: lat.to_radians().cos(),
        }
    }

    pub(crate) fn project(&self, coord: Coord<f64>) -> Coord<f64> {
        Coord {
            x: coord.x.to_radians() * EARTH_RADIUS_M * self.cos_lat,
            y: coord.y.to_radians() * EARTH_RADIUS_M,
        }
    }
}

type IndexedSegment = GeomWithData<IndexLine<[f64; 2]>, EdgeId>;

/// Serialized form of a graph store
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphData {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| anyhow!("Failed to write graph cache {:?}: {}", path, e))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| anyhow!("Failed to open graph cache {:?}: {}", path, e))?;
        let mut reader = BufReader::new(file);
        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| anyhow!("Invalid graph cache {:?}: {}", path, e))
    }
}

/// Immutable, indexed path network of one area.
///
/// Built once and shared by reference between all runs; every query is a
/// pure lookup, so the store can be used from several threads at once.
pub struct GraphStore {
    nodes: HashMap<NodeId, Node>,
    /// Sorted by id
    edges: Vec<Edge>,
    edge_positions: HashMap<EdgeId, usize>,
    way_index: HashMap<WayId, Vec<EdgeId>>,
    spatial_index: RTree<IndexedSegment>,
    /// Line graph: edges sharing an end node are connected
    adjacency: UnGraphMap<EdgeId, ()>,
    blacklist: HashSet<String>,
    projection: LocalProjection,
}

impl GraphStore {
    pub fn new<I, S>(nodes: Vec<Node>, mut edges: Vec<Edge>, blacklist: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut node_map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            let id = node.id;
            if node_map.insert(id, node).is_some() {
                bail!("Duplicate node id {}", id);
            }
        }

        edges.sort_by_key(|e| e.id);
        let mut edge_positions = HashMap::with_capacity(edges.len());
        for (pos, edge) in edges.iter().enumerate() {
            if edge_positions.insert(edge.id, pos).is_some() {
                bail!("Duplicate edge id {}", edge.id);
            }
            if edge.geometry.len() < 2 {
                bail!("Edge {} has fewer than two coordinates", edge.id);
            }
            for node_id in [edge.start_node, edge.end_node] {
                if !node_map.contains_key(&node_id) {
                    bail!("Edge {} references unknown node {}", edge.id, node_id);
                }
            }
        }

        let mean_lat = if node_map.is_empty() {
            0.0
        } else {
            node_map.values().map(|n| n.coord.y).sum::<f64>() / node_map.len() as f64
        };
        let projection = LocalProjection::at_latitude(mean_lat);

        let mut way_index: HashMap<WayId, Vec<EdgeId>> = HashMap::new();
        let mut node_edges: HashMap<NodeId, Vec<EdgeId>> = HashMap::new();
        let mut segments = Vec::new();
        let mut adjacency = UnGraphMap::new();

        for edge in &edges {
            way_index.entry(edge.way_id).or_default().push(edge.id);
            node_edges.entry(edge.start_node).or_default().push(edge.id);
            if edge.end_node != edge.start_node {
                node_edges.entry(edge.end_node).or_default().push(edge.id);
            }
            adjacency.add_node(edge.id);

            for pair in edge.geometry.windows(2) {
                let a = projection.project(pair[0]);
                let b = projection.project(pair[1]);
                // rstar cannot measure distance to a zero-length line
                if a == b {
                    continue;
                }
                segments.push(GeomWithData::new(
                    IndexLine::new([a.x, a.y], [b.x, b.y]),
                    edge.id,
                ));
            }
        }

        for incident in node_edges.values() {
            for (i, &a) in incident.iter().enumerate() {
                for &b in &incident[i + 1..] {
                    if a != b {
                        adjacency.add_edge(a, b, ());
                    }
                }
            }
        }

        let segment_count = segments.len();
        let spatial_index = RTree::bulk_load(segments);

        info!(
            "Graph store ready: {} nodes, {} edges, {} ways",
            node_map.len(),
            edges.len(),
            way_index.len()
        );
        debug!(
            "Indexed {} geometry segments, {} adjacencies",
            segment_count,
            adjacency.edge_count()
        );

        Ok(Self {
            nodes: node_map,
            edges,
            edge_positions,
            way_index,
            spatial_index,
            adjacency,
            blacklist: blacklist.into_iter().map(Into::into).collect(),
            projection,
        })
    }

    pub fn from_data<I, S>(data: GraphData, blacklist: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(data.nodes, data.edges, blacklist)
    }

    pub fn to_data(&self) -> GraphData {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        GraphData {
            nodes,
            edges: self.edges.clone(),
        }
    }

    /// The `k` edges closest to `point`, ordered by ascending perpendicular
    /// distance (meters), ties broken by edge id.
    ///
    /// Only a sanity check: near junctions and under GPS noise the nearest
    /// edge is frequently the wrong one.
    pub fn nearest_edges(&self, point: Point<f64>, k: usize) -> Vec<(&Edge, f64)> {
        if k == 0 || self.edges.is_empty() {
            return Vec::new();
        }

        let query = self.projection.project(point.0);
        let wanted = k.saturating_mul(NEAREST_SEARCH_WIDTH);
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for segment in self.spatial_index.nearest_neighbor_iter(&[query.x, query.y]) {
            if seen.insert(segment.data) {
                found.push(segment.data);
                if found.len() >= wanted {
                    break;
                }
            }
        }

        let mut ranked: Vec<(&Edge, f64)> = found
            .into_iter()
            .filter_map(|id| self.edge(id))
            .map(|edge| (edge, edge.distance_to(point)))
            .collect();
        ranked.sort_by_key(|(edge, distance)| (OrderedFloat(*distance), edge.id));
        ranked.truncate(k);
        ranked
    }

    /// All edges belonging to `way_id`, ascending by id. Empty if the way is unknown.
    pub fn edges_for_way(&self, way_id: WayId) -> Vec<&Edge> {
        self.way_index
            .get(&way_id)
            .map(|ids| ids.iter().filter_map(|id| self.edge(*id)).collect())
            .unwrap_or_default()
    }

    pub fn contains_way(&self, way_id: WayId) -> bool {
        self.way_index.contains_key(&way_id)
    }

    pub fn is_blacklisted(&self, highway_type: &str) -> bool {
        self.blacklist.contains(highway_type)
    }

    pub fn is_edge_blacklisted(&self, edge: &Edge) -> bool {
        self.is_blacklisted(&edge.highway_type)
    }

    /// True when both edges are the same or share an end node.
    pub fn are_adjacent(&self, a: EdgeId, b: EdgeId) -> bool {
        a == b || self.adjacency.contains_edge(a, b)
    }

    pub fn neighbors(&self, edge_id: EdgeId) -> Vec<EdgeId> {
        if !self.adjacency.contains_node(edge_id) {
            return Vec::new();
        }
        let mut neighbors: Vec<EdgeId> = self.adjacency.neighbors(edge_id).collect();
        neighbors.sort_unstable();
        neighbors
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edge_positions.get(&id).map(|&pos| &self.edges[pos])
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn way_count(&self) -> usize {
        self.way_index.len()
    }

    /// Summed length of all edges that count towards coverage (not blacklisted).
    pub fn total_length(&self) -> f64 {
        self.edges
            .iter()
            .filter(|e| !self.is_edge_blacklisted(e))
            .map(|e| e.length)
            .sum()
    }

    pub fn highway_types(&self) -> BTreeSet<&str> {
        self.edges.iter().map(|e| e.highway_type.as_str()).collect()
    }
}
