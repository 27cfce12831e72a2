use chrono::{DateTime, Utc};
use geo::{Coord, Point};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single GPS sample. `coord.x` is longitude, `coord.y` latitude.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Position of the sample within its track
    pub index: usize,
    pub coord: Coord<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl TrackPoint {
    pub fn new(index: usize, lat: f64, lon: f64, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            index,
            coord: Coord { x: lon, y: lat },
            timestamp,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.coord.y
    }

    pub fn longitude(&self) -> f64 {
        self.coord.x
    }

    pub fn point(&self) -> Point<f64> {
        Point::from(self.coord)
    }

    /// Same sample moved to another position (used by snapping).
    pub fn with_coord(&self, coord: Coord<f64>) -> Self {
        Self {
            index: self.index,
            coord,
            timestamp: self.timestamp,
        }
    }
}

/// An ordered recording session. Points are fixed once the track is built.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Track {
    pub name: Option<String>,
    pub activity_type: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub source: Option<PathBuf>,
    points: Vec<TrackPoint>,
}

impl Track {
    /// Builds a track from `(lat, lon, timestamp)` samples, assigning sequence indices.
    pub fn from_samples<I>(name: Option<String>, samples: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64, Option<DateTime<Utc>>)>,
    {
        let points: Vec<TrackPoint> = samples
            .into_iter()
            .enumerate()
            .map(|(i, (lat, lon, ts))| TrackPoint::new(i, lat, lon, ts))
            .collect();
        let date = points.iter().find_map(|p| p.timestamp);

        Self {
            name,
            activity_type: None,
            date,
            source: None,
            points,
        }
    }

    pub fn with_date(mut self, date: Option<DateTime<Utc>>) -> Self {
        if date.is_some() {
            self.date = date;
        }
        self
    }

    pub fn with_activity_type(mut self, activity_type: Option<String>) -> Self {
        self.activity_type = activity_type;
        self
    }

    pub fn with_source(mut self, source: PathBuf) -> Self {
        self.source = Some(source);
        self
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Human readable label for log lines.
    pub fn label(&self) -> String {
        match (&self.source, &self.name) {
            (Some(path), Some(name)) => format!("{} - '{}'", path.display(), name),
            (Some(path), None) => path.display().to_string(),
            (None, Some(name)) => format!("'{}'", name),
            (None, None) => "<unnamed track>".to_string(),
        }
    }
}
