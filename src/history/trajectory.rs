use chrono::{DateTime, Utc};
use geo::HaversineDistance;
use serde::{Deserialize, Serialize};

use crate::types::{Coordinate, LocationSample, Window};

/// Chronological route for one entity within a window.
///
/// Samples are strictly ascending by timestamp; when two samples share a
/// timestamp the one that came later in the input wins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    window: Option<Window>,
    samples: Vec<LocationSample>,
}

impl Trajectory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_samples(window: Option<Window>, mut samples: Vec<LocationSample>) -> Self {
        // Stable sort keeps input order among equal timestamps
        samples.sort_by_key(|s| s.timestamp);

        let mut ordered: Vec<LocationSample> = Vec::with_capacity(samples.len());
        for sample in samples {
            match ordered.last_mut() {
                Some(last) if last.timestamp == sample.timestamp => *last = sample,
                _ => ordered.push(sample),
            }
        }

        Trajectory {
            window,
            samples: ordered,
        }
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_ref()
    }

    pub fn samples(&self) -> &[LocationSample] {
        &self.samples
    }

    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.samples.iter().map(|s| s.coordinate()).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&LocationSample> {
        self.samples.first()
    }

    pub fn latest(&self) -> Option<&LocationSample> {
        self.samples.last()
    }

    /// Great-circle length of the route in meters
    pub fn distance_m(&self) -> f64 {
        self.samples
            .windows(2)
            .map(|pair| {
                pair[0]
                    .coordinate()
                    .to_point()
                    .haversine_distance(&pair[1].coordinate().to_point())
            })
            .sum()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.first(), self.latest()) {
            (Some(first), Some(last)) => Some(last.timestamp - first.timestamp),
            _ => None,
        }
    }

    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.first()?.timestamp, self.latest()?.timestamp))
    }
}
