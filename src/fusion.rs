use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::stream::LiveStreamState;
use crate::types::{Coordinate, LocationSample};

/// Where a resolved display location came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Live,
    LastKnown,
    Historical,
    Fallback,
    None,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Live => "live",
            Provenance::LastKnown => "last-known",
            Provenance::Historical => "historical",
            Provenance::Fallback => "fallback",
            Provenance::None => "none",
        }
    }
}

impl Display for Provenance {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single "current" location shown for an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayLocation {
    pub coordinate: Option<Coordinate>,
    pub provenance: Provenance,
    /// Timestamp of the sample behind the coordinate, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_time: Option<DateTime<Utc>>,
}

impl DisplayLocation {
    pub fn none() -> Self {
        DisplayLocation {
            coordinate: None,
            provenance: Provenance::None,
            sample_time: None,
        }
    }

    fn from_sample(sample: &LocationSample, provenance: Provenance) -> Self {
        DisplayLocation {
            coordinate: Some(sample.coordinate()),
            provenance,
            sample_time: Some(sample.timestamp),
        }
    }

    pub fn is_available(&self) -> bool {
        self.coordinate.is_some()
    }
}

/// Everything the resolver looks at for one entity
#[derive(Debug, Clone, Copy)]
pub struct FusionInput<'a> {
    pub stream: Option<&'a LiveStreamState>,
    /// Latest sample of the current trajectory
    pub historical: Option<&'a LocationSample>,
    /// Most recent `last_tracking` reported by the device registry
    pub seed: Option<&'a LocationSample>,
    pub base_coordinate: Option<Coordinate>,
    pub now: DateTime<Utc>,
    pub stale_after: Duration,
}

/// Pick the display location by priority: live, last-known, historical,
/// fallback (registry seed, then base coordinate), none.
///
/// The last live sample survives disconnects inside `LiveStreamState`, so
/// once live data has been seen the result never drops below last-known.
pub fn resolve(input: &FusionInput<'_>) -> DisplayLocation {
    if let Some(stream) = input.stream {
        if let Some(sample) = stream.live_sample(input.now, input.stale_after) {
            return DisplayLocation::from_sample(sample, Provenance::Live);
        }
        if let Some(sample) = stream.last_sample.as_ref() {
            return DisplayLocation::from_sample(sample, Provenance::LastKnown);
        }
    }

    if let Some(sample) = input.historical {
        return DisplayLocation::from_sample(sample, Provenance::Historical);
    }

    if let Some(seed) = input.seed.filter(|s| s.is_valid()) {
        return DisplayLocation::from_sample(seed, Provenance::Fallback);
    }

    match input.base_coordinate.filter(|c| c.is_valid()) {
        Some(coordinate) => DisplayLocation {
            coordinate: Some(coordinate),
            provenance: Provenance::Fallback,
            sample_time: None,
        },
        None => DisplayLocation::none(),
    }
}
