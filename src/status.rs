use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::TrackerError;

/// Booking phase supplied by the caller; only used for labeling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripPhase {
    #[default]
    Upcoming,
    Active,
    Completed,
    Cancelled,
}

impl FromStr for TripPhase {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upcoming" | "pending" | "confirmed" => Ok(TripPhase::Upcoming),
            "active" | "ongoing" | "in_progress" => Ok(TripPhase::Active),
            "completed" => Ok(TripPhase::Completed),
            "cancelled" | "canceled" => Ok(TripPhase::Cancelled),
            other => Err(TrackerError::Config(format!("unknown trip phase '{}'", other))),
        }
    }
}

/// Styling bucket for a status label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Info,
    Success,
    Warning,
    Neutral,
    Muted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Loading,
    CompletedRoute,
    TripCompleted,
    Live,
    LastKnown,
    WaitingForDevice,
    RouteHistory,
    BaseLocation,
}

impl TrackingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TrackingStatus::Loading => "loading",
            TrackingStatus::CompletedRoute => "completed route",
            TrackingStatus::TripCompleted => "trip completed",
            TrackingStatus::Live => "live",
            TrackingStatus::LastKnown => "last known",
            TrackingStatus::WaitingForDevice => "waiting for device",
            TrackingStatus::RouteHistory => "route history",
            TrackingStatus::BaseLocation => "base location",
        }
    }

    pub fn tone(&self) -> StatusTone {
        match self {
            TrackingStatus::Loading | TrackingStatus::RouteHistory => StatusTone::Info,
            TrackingStatus::Live => StatusTone::Success,
            TrackingStatus::LastKnown | TrackingStatus::WaitingForDevice => StatusTone::Warning,
            TrackingStatus::CompletedRoute | TrackingStatus::TripCompleted => StatusTone::Neutral,
            TrackingStatus::BaseLocation => StatusTone::Muted,
        }
    }
}

impl Display for TrackingStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassifierInput {
    /// A history fetch is running, or the stream is making its first connection
    pub in_flight: bool,
    pub has_device: bool,
    pub is_live: bool,
    pub has_last_known: bool,
    pub trip_phase: TripPhase,
    pub trajectory_non_empty: bool,
}

/// Map tracking state to a status label. First matching rule wins.
pub fn classify(input: &ClassifierInput) -> TrackingStatus {
    let active = input.trip_phase == TripPhase::Active;

    if input.in_flight {
        TrackingStatus::Loading
    } else if input.trip_phase == TripPhase::Completed {
        if input.trajectory_non_empty {
            TrackingStatus::CompletedRoute
        } else {
            TrackingStatus::TripCompleted
        }
    } else if active && input.is_live {
        TrackingStatus::Live
    } else if active && input.has_last_known {
        TrackingStatus::LastKnown
    } else if active && input.has_device && !input.trajectory_non_empty {
        TrackingStatus::WaitingForDevice
    } else if input.trajectory_non_empty {
        TrackingStatus::RouteHistory
    } else if input.has_device {
        TrackingStatus::WaitingForDevice
    } else {
        TrackingStatus::BaseLocation
    }
}
