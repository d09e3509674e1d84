use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, TrackerError};
use crate::types::{EntityId, LocationSample, Window};

/// One windowed query against the history store
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryQuery {
    pub entity_id: EntityId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: u32,
}

impl HistoryQuery {
    /// `WindowEnd::Now` resolves against `now`
    pub fn from_window(window: &Window, now: DateTime<Utc>, limit: u32) -> Self {
        HistoryQuery {
            entity_id: window.entity_id().clone(),
            start: window.start(),
            end: window.resolve_end(now),
            limit,
        }
    }
}

/// Raw history row. Fields stay loosely typed until validated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub latitude: Option<Value>,
    #[serde(default)]
    pub longitude: Option<Value>,
    #[serde(default)]
    pub gps_timestamp: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub speed: Option<Value>,
    #[serde(default)]
    pub heading: Option<Value>,
}

impl HistoryRecord {
    /// Prefers `gps_timestamp`; a missing or unparseable one falls back to
    /// `timestamp`
    pub fn to_sample(&self) -> Result<LocationSample> {
        let gps = self.gps_timestamp.as_ref().filter(|v| !v.is_null());
        match (gps, self.timestamp.as_ref()) {
            (Some(gps), Some(fallback)) => self
                .sample_at(Some(gps))
                .or_else(|_| self.sample_at(Some(fallback))),
            (Some(gps), None) => self.sample_at(Some(gps)),
            (None, fallback) => self.sample_at(fallback),
        }
    }

    fn sample_at(&self, timestamp: Option<&Value>) -> Result<LocationSample> {
        LocationSample::from_fields(
            self.latitude.as_ref(),
            self.longitude.as_ref(),
            timestamp,
            self.speed.as_ref(),
            self.heading.as_ref(),
            None,
        )
    }
}

/// Boundary to the historical telemetry store
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>>;
}

#[derive(Deserialize)]
struct HistoryEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<HistoryData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct HistoryData {
    #[serde(default)]
    tracking_history: Vec<HistoryRecord>,
}

/// HTTP client for `GET {base}/{entityId}/history?startDate=&endDate=&limit=`
pub struct HttpHistoryStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpHistoryStore {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleet_tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpHistoryStore {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn history_url(&self, query: &HistoryQuery) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| TrackerError::Config(format!("api url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| TrackerError::Config(format!("api url {} cannot be a base", self.base_url)))?
            .push(query.entity_id.as_str())
            .push("history");
        url.query_pairs_mut()
            .append_pair("startDate", &query.start.to_rfc3339_opts(SecondsFormat::Millis, true))
            .append_pair("endDate", &query.end.to_rfc3339_opts(SecondsFormat::Millis, true))
            .append_pair("limit", &query.limit.to_string());
        Ok(url)
    }
}

#[async_trait]
impl HistoryStore for HttpHistoryStore {
    async fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        let mut request = self.client.get(self.history_url(query)?);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Http(status.as_u16()));
        }

        let envelope: HistoryEnvelope = response.json().await?;
        if !envelope.success {
            return Err(TrackerError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "history query unsuccessful".to_string()),
            ));
        }
        Ok(envelope
            .data
            .map(|d| d.tracking_history)
            .unwrap_or_default())
    }
}
