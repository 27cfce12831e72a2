use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::{fs::File, io::BufWriter, path::PathBuf};

use parkcover::coverage::CoverageAccumulator;
use parkcover::debug::{DebugVisualizer, run_color};
use parkcover::graph_store::GraphStore;
use parkcover::io::{TrackFilter, load_gpx_dir};
use parkcover::mapmatcher::{
    ConfiguredResolver, ConfiguredSnapper, MapMatcher, MapMatcherConfig, ResolverKind, TrackMatch,
};
use parkcover::osm_preprocessing::OsmProcessor;
use parkcover::track::Track;

/// Tracks which paths of a park have been run, from a directory of GPX files
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory with .gpx files
    #[arg(long)]
    gpxdir: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// OSM PBF extract containing the area
    #[arg(long)]
    osm_pbf: Option<String>,

    /// Valhalla base URL
    #[arg(long, env = "VALHALLA_URL")]
    valhalla: Option<String>,

    /// Output directory, a timestamped subdirectory is created per run
    #[arg(long, default_value = "output")]
    outdir: PathBuf,

    /// Persistent cache of Valhalla responses
    #[arg(long)]
    cachefile: Option<String>,

    /// Ignore tracks recorded before this unix timestamp
    #[arg(long)]
    filter_date: Option<i64>,

    /// Only use tracks with this name
    #[arg(long)]
    filter_name: Option<String>,

    /// Snap points with Mapbox before resolving ways
    #[arg(long)]
    snap: bool,

    #[arg(long, env = "MAPBOX_TOKEN", hide_env_values = true)]
    mapbox_token: Option<String>,

    /// Resolve ways from the local graph instead of Valhalla
    #[arg(long)]
    offline: bool,

    /// Verbose logging and extra GeoJSON output
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply_to(&self, config: &mut MapMatcherConfig) {
        if let Some(path) = &self.osm_pbf {
            config.area.osm_pbf_path = path.clone();
        }
        if let Some(url) = &self.valhalla {
            config.valhalla.url = Some(url.clone());
        }
        if let Some(cachefile) = &self.cachefile {
            config.valhalla.request_cache = Some(cachefile.clone());
        }
        if let Some(token) = &self.mapbox_token {
            config.mapbox.token = Some(token.clone());
        }
        if self.snap {
            config.snap_points = true;
        }
        if self.offline {
            config.resolver = ResolverKind::NearestEdge;
        }
    }

    fn track_filter(&self) -> Result<TrackFilter> {
        let not_before = match self.filter_date {
            Some(secs) => Some(
                DateTime::<Utc>::from_timestamp(secs, 0)
                    .ok_or_else(|| anyhow!("Invalid filter date {}", secs))?,
            ),
            None => None,
        };
        Ok(TrackFilter {
            not_before,
            name: self.filter_name.clone(),
        })
    }
}

fn write_json<T: serde::Serialize>(path: &std::path::Path, value: &T) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(if args.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .parse_default_env()
        .init();
    info!("Starting parkcover");

    let mut config = match &args.config {
        Some(path) => MapMatcherConfig::from_json_file(path)?,
        None => MapMatcherConfig::default(),
    };
    args.apply_to(&mut config);

    let graph_data = OsmProcessor::new(config.area.clone()).load_or_build()?;
    let graph = GraphStore::from_data(graph_data, config.highway_blacklist.iter().cloned())?;

    let tracks = args.track_filter()?.apply(load_gpx_dir(&args.gpxdir)?);
    info!("Matching {} tracks in {}", tracks.len(), config.area.name);

    let resolver = ConfiguredResolver::from_config(&config, &graph)?;
    let snapper = ConfiguredSnapper::from_config(&config)?;
    let matcher = MapMatcher::new(&graph, resolver, &config).with_snapper(snapper);

    let pb = ProgressBar::new(tracks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tracks - {msg}")?,
    );

    let mut accumulator = CoverageAccumulator::new(&graph);
    let mut counted: Vec<(&Track, TrackMatch)> = Vec::new();
    for track in &tracks {
        pb.set_message(track.label());
        let track_match = matcher.match_track_detailed(track).await;
        if accumulator.fold(track.name.clone(), track.date, &track_match.route) {
            counted.push((track, track_match));
        }
        pb.inc(1);
    }
    pb.finish_with_message("Matching complete");

    let stats = accumulator.stats();
    info!(
        "Covered {:.0} of {:.0} m ({:.1}%) in {} runs, {:.0} m to go",
        stats.covered_length_meters,
        stats.total_length_meters,
        stats.covered_percentage,
        stats.number_of_runs,
        stats.remaining_length_meters
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    let outdir = args.outdir.join(Utc::now().timestamp().to_string());
    std::fs::create_dir_all(&outdir)
        .with_context(|| format!("Failed to create output directory {:?}", outdir))?;
    write_json(&outdir.join("stats.json"), &stats)?;

    let runs: Vec<(String, &_)> = counted
        .iter()
        .map(|(track, track_match)| {
            let label = match track.date {
                Some(date) => date.format("%Y-%m-%d").to_string(),
                None => track.label(),
            };
            (label, &track_match.route)
        })
        .collect();
    DebugVisualizer::write_geojson(
        &outdir.join("map.geojson"),
        &DebugVisualizer::coverage_geojson(&graph, &runs),
    )?;

    if args.debug {
        DebugVisualizer::write_geojson(
            &outdir.join("graph-by-highway.geojson"),
            &DebugVisualizer::graph_by_highway_geojson(&graph),
        )?;
        for (i, (track, track_match)) in counted.iter().enumerate() {
            let color = run_color(i);
            DebugVisualizer::write_geojson(
                &outdir.join(format!("track-{}-points.geojson", i)),
                &DebugVisualizer::track_points_geojson(
                    track.points(),
                    &track_match.points,
                    &track_match.way_matches,
                    color,
                ),
            )?;
            DebugVisualizer::write_geojson(
                &outdir.join(format!("track-{}-route.geojson", i)),
                &DebugVisualizer::route_geojson(&graph, &track_match.route, color),
            )?;
        }
    }

    info!("Results written to {:?}", outdir);
    Ok(())
}
