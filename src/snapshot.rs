use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::fusion::Provenance;
use crate::status::{StatusTone, TripPhase};
use crate::stream::StreamStatus;
use crate::types::{Coordinate, EntityId};

/// Point-in-time view of one tracked entity, written to the status file
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrackerSnapshot {
    pub entity_id: EntityId,
    pub timestamp: DateTime<Utc>,
    pub trip_phase: TripPhase,
    pub status: String,
    pub tone: StatusTone,
    pub provenance: Provenance,
    pub coordinate: Option<Coordinate>,
    /// Marker position after declutter; equals `coordinate` when alone
    pub marker: Option<Coordinate>,
    pub sample_time: Option<DateTime<Utc>>,
    pub has_active_device: bool,
    // Stream
    pub stream_status: Option<StreamStatus>,
    pub reconnect_attempts: u32,
    pub stream_error: Option<String>,
    // Route
    pub trajectory_samples: usize,
    pub trajectory_distance_m: f64,
    pub fetch_in_flight: bool,
    pub fetch_warning: Option<String>,
}

/// All entities of a fleet view
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FleetSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub entities: Vec<TrackerSnapshot>,
}

impl FleetSnapshot {
    pub fn new(entities: Vec<TrackerSnapshot>, uptime_seconds: u64) -> Self {
        FleetSnapshot {
            timestamp: Utc::now(),
            uptime_seconds,
            entities,
        }
    }

    pub fn live_count(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| e.provenance == Provenance::Live)
            .count()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_json(self, path.as_ref())
    }
}

impl TrackerSnapshot {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_json(self, path.as_ref())
    }
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
