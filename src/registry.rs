use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, TrackerError};
use crate::types::{EntityId, LocationSample};

/// Device record as returned by `GET .../{entityId}/devices`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub last_tracking: Option<Value>,
}

impl DeviceRecord {
    /// Anything not explicitly `is_active: false` counts as active
    pub fn is_active(&self) -> bool {
        self.is_active != Some(false)
    }

    pub fn last_sample(&self) -> Option<LocationSample> {
        let tracking = self.last_tracking.as_ref()?;
        let timestamp = tracking
            .get("gps_timestamp")
            .or_else(|| tracking.get("timestamp"));
        LocationSample::from_fields(
            tracking.get("latitude"),
            tracking.get("longitude"),
            timestamp,
            tracking.get("speed"),
            tracking.get("heading"),
            None,
        )
        .ok()
    }
}

/// What the core derives from the device list
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePresence {
    pub has_active_device: bool,
    /// Most recent valid `last_tracking` across active devices
    pub seed: Option<LocationSample>,
}

impl DevicePresence {
    pub fn from_records(records: &[DeviceRecord]) -> Self {
        let active: Vec<&DeviceRecord> = records.iter().filter(|r| r.is_active()).collect();
        let seed = active
            .iter()
            .filter_map(|r| r.last_sample())
            .max_by_key(|s| s.timestamp);

        DevicePresence {
            has_active_device: !active.is_empty(),
            seed,
        }
    }
}

/// Boundary to the device registry
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn devices(&self, entity_id: &EntityId) -> Result<Vec<DeviceRecord>>;

    async fn presence(&self, entity_id: &EntityId) -> Result<DevicePresence> {
        let records = self.devices(entity_id).await?;
        Ok(DevicePresence::from_records(&records))
    }
}

/// Accepts a bare list or the `{success, data}` envelope
#[derive(Deserialize)]
#[serde(untagged)]
enum DevicesBody {
    List(Vec<DeviceRecord>),
    Envelope {
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        data: Vec<DeviceRecord>,
        #[serde(default)]
        message: Option<String>,
    },
}

fn default_success() -> bool {
    true
}

/// HTTP client for `GET {base}/{entityId}/devices`
pub struct HttpDeviceRegistry {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpDeviceRegistry {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleet_tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpDeviceRegistry {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn devices_url(&self, entity_id: &EntityId) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| TrackerError::Config(format!("api url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| TrackerError::Config(format!("api url {} cannot be a base", self.base_url)))?
            .push(entity_id.as_str())
            .push("devices");
        Ok(url)
    }
}

#[async_trait]
impl DeviceRegistry for HttpDeviceRegistry {
    async fn devices(&self, entity_id: &EntityId) -> Result<Vec<DeviceRecord>> {
        let mut request = self.client.get(self.devices_url(entity_id)?);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Http(status.as_u16()));
        }

        match response.json::<DevicesBody>().await? {
            DevicesBody::List(records) => Ok(records),
            DevicesBody::Envelope {
                success: true,
                data,
                ..
            } => Ok(data),
            DevicesBody::Envelope { message, .. } => Err(TrackerError::Rejected(
                message.unwrap_or_else(|| "device query unsuccessful".to_string()),
            )),
        }
    }
}
