use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

use crate::error::{Result, TrackerError};

/// Epoch values above this are treated as milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Identifier of a tracked entity (vehicle)
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId(id)
    }
}

/// WGS84 coordinate in degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Validated constructor: both finite, lat in [-90, 90], lon in [-180, 180]
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let coord = Coordinate { latitude, longitude };
        if coord.is_valid() {
            Ok(coord)
        } else {
            Err(TrackerError::InvalidSample(format!(
                "coordinate out of range: ({}, {})",
                latitude, longitude
            )))
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// geo uses (x = lon, y = lat)
    pub fn to_point(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// One position reading, from the live stream or the history store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Result<Self> {
        Coordinate::new(latitude, longitude)?;
        Ok(LocationSample {
            latitude,
            longitude,
            timestamp,
            speed: None,
            heading: None,
        })
    }

    pub fn with_motion(mut self, speed: Option<f64>, heading: Option<f64>) -> Self {
        self.speed = speed.filter(|s| s.is_finite());
        self.heading = heading.filter(|h| h.is_finite());
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.coordinate().is_valid()
    }

    /// Build a sample from loosely-typed JSON fields.
    ///
    /// Coordinates may be numbers or numeric strings. A missing timestamp
    /// falls back to `default_ts`; a present but unparseable one is invalid.
    pub fn from_fields(
        latitude: Option<&Value>,
        longitude: Option<&Value>,
        timestamp: Option<&Value>,
        speed: Option<&Value>,
        heading: Option<&Value>,
        default_ts: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let lat = latitude
            .and_then(coerce_f64)
            .ok_or_else(|| TrackerError::InvalidSample("latitude is not numeric".to_string()))?;
        let lon = longitude
            .and_then(coerce_f64)
            .ok_or_else(|| TrackerError::InvalidSample("longitude is not numeric".to_string()))?;

        let ts = match timestamp.filter(|v| !v.is_null()) {
            Some(raw) => parse_timestamp(raw).ok_or_else(|| {
                TrackerError::InvalidSample(format!("unparseable timestamp: {}", raw))
            })?,
            None => default_ts
                .ok_or_else(|| TrackerError::InvalidSample("missing timestamp".to_string()))?,
        };

        Ok(LocationSample::new(lat, lon, ts)?
            .with_motion(speed.and_then(coerce_f64), heading.and_then(coerce_f64)))
    }

    /// Parse a live stream payload `{location: {latitude, longitude, ...}}`.
    ///
    /// Live payloads usually carry no timestamp; `received_at` stamps them.
    pub fn from_stream_payload(payload: &Value, received_at: DateTime<Utc>) -> Result<Self> {
        let location = payload
            .get("location")
            .ok_or_else(|| TrackerError::InvalidSample("payload has no location".to_string()))?;
        let timestamp = location
            .get("gps_timestamp")
            .or_else(|| location.get("timestamp"));

        Self::from_fields(
            location.get("latitude"),
            location.get("longitude"),
            timestamp,
            location.get("speed"),
            location.get("heading"),
            Some(received_at),
        )
    }
}

/// Coerce a JSON number or numeric string into a finite f64
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` (UTC) or epoch seconds/millis
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    raw.parse::<f64>().ok().and_then(epoch_to_datetime)
}

fn epoch_to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() || epoch < 0.0 {
        return None;
    }
    let millis = if epoch > EPOCH_MILLIS_THRESHOLD {
        epoch
    } else {
        epoch * 1000.0
    };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

/// End of a history window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowEnd {
    At(DateTime<Utc>),
    /// Resolved to the wall clock when the query is issued
    Now,
}

/// Time range scoping a history query. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Window {
    entity_id: EntityId,
    start: DateTime<Utc>,
    end: WindowEnd,
}

impl Window {
    pub fn new(entity_id: EntityId, start: DateTime<Utc>, end: WindowEnd) -> Result<Self> {
        if let WindowEnd::At(end_ts) = end {
            if end_ts < start {
                return Err(TrackerError::InvalidWindow(format!(
                    "end {} precedes start {}",
                    end_ts, start
                )));
            }
        }
        Ok(Window {
            entity_id,
            start,
            end,
        })
    }

    /// Window from `start` up to the time of the query
    pub fn until_now(entity_id: EntityId, start: DateTime<Utc>) -> Self {
        Window {
            entity_id,
            start,
            end: WindowEnd::Now,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> WindowEnd {
        self.end
    }

    pub fn resolve_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.end {
            WindowEnd::At(ts) => ts,
            WindowEnd::Now => now.max(self.start),
        }
    }
}

/// Entity as known to the device registry. Read-only here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub base_coordinate: Option<Coordinate>,
    pub has_active_device: bool,
}

impl TrackedEntity {
    pub fn new(id: impl Into<EntityId>, base_coordinate: Option<Coordinate>) -> Self {
        TrackedEntity {
            id: id.into(),
            base_coordinate: base_coordinate.filter(|c| c.is_valid()),
            has_active_device: false,
        }
    }
}
