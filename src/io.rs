use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rayon::prelude::*;
use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use crate::track::Track;

pub(crate) mod gpx_tracks {
    use anyhow::{Result, anyhow};
    use chrono::{DateTime, Utc};
    use log::debug;
    use std::io::Read;

    use crate::track::Track;

    fn to_chrono(time: &gpx::Time) -> Option<DateTime<Utc>> {
        let formatted = time.format().ok()?;
        DateTime::parse_from_rfc3339(&formatted)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Reads every track point of every track and segment, in file order.
    pub fn read_track<R: Read>(reader: R) -> Result<Track> {
        let data = gpx::read(reader).map_err(|e| anyhow!("Invalid GPX data: {}", e))?;

        let first_track = data.tracks.first();
        let name = first_track
            .and_then(|t| t.name.clone())
            .or_else(|| data.metadata.as_ref().and_then(|m| m.name.clone()));
        let activity_type = first_track.and_then(|t| t.type_.clone());
        let date = data
            .metadata
            .as_ref()
            .and_then(|m| m.time.as_ref())
            .and_then(to_chrono);

        let samples: Vec<(f64, f64, Option<DateTime<Utc>>)> = data
            .tracks
            .iter()
            .flat_map(|t| t.segments.iter())
            .flat_map(|s| s.points.iter())
            .map(|wp| {
                let point = wp.point();
                (point.y(), point.x(), wp.time.as_ref().and_then(to_chrono))
            })
            .collect();

        debug!(
            "Parsed GPX with {} tracks and {} points",
            data.tracks.len(),
            samples.len()
        );

        Ok(Track::from_samples(name, samples)
            .with_date(date)
            .with_activity_type(activity_type))
    }
}

/// Which loaded tracks take part in a coverage run
#[derive(Debug, Clone, Default)]
pub struct TrackFilter {
    /// Only tracks recorded at or after this instant
    pub not_before: Option<DateTime<Utc>>,
    /// Only tracks with exactly this name
    pub name: Option<String>,
}

impl TrackFilter {
    /// Returns the reason a track is skipped, if any
    pub fn rejection(&self, track: &Track) -> Option<String> {
        if let Some(name) = &self.name {
            if track.name.as_deref() != Some(name.as_str()) {
                return Some(format!("is not called '{}'", name));
            }
        }
        if track.is_empty() {
            return Some("has no points".to_string());
        }
        if let Some(not_before) = self.not_before {
            match track.date {
                Some(date) if date < not_before => {
                    return Some(format!("earlier than {}", not_before));
                }
                None => return Some(format!("has no date to compare with {}", not_before)),
                _ => {}
            }
        }
        None
    }

    pub fn apply(&self, tracks: Vec<Track>) -> Vec<Track> {
        tracks
            .into_iter()
            .filter(|track| match self.rejection(track) {
                Some(reason) => {
                    info!("Track {} {}, ignoring", track.label(), reason);
                    false
                }
                None => true,
            })
            .collect()
    }
}

pub fn load_gpx_file(path: &Path) -> Result<Track> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut contents = Vec::new();
    BufReader::new(file).read_to_end(&mut contents)?;
    let track = gpx_tracks::read_track(contents.as_slice())
        .with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(track.with_source(path.to_path_buf()))
}

/// Loads all `.gpx` files of a directory in parallel, sorted by file name.
/// Unreadable files are logged and skipped.
pub fn load_gpx_dir(dir: &Path) -> Result<Vec<Track>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read GPX directory {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "gpx"))
        .collect();
    paths.sort();

    info!("Found {} gpx files", paths.len());

    let tracks: Vec<Track> = paths
        .par_iter()
        .filter_map(|path| match load_gpx_file(path) {
            Ok(track) => Some(track),
            Err(e) => {
                warn!("Skipping {:?}: {:#}", path, e);
                None
            }
        })
        .collect();

    info!("Parsed {} tracks", tracks.len());
    Ok(tracks)
}
