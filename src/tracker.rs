use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;

use crate::config::TrackerConfig;
use crate::declutter::declutter;
use crate::error::{Result, TrackerError};
use crate::fusion::{resolve, DisplayLocation, FusionInput};
use crate::history::{FetchOutcome, HistoryStore, HttpHistoryStore, TrajectoryFetcher, Trajectory};
use crate::registry::{DevicePresence, DeviceRegistry, HttpDeviceRegistry};
use crate::snapshot::{FleetSnapshot, TrackerSnapshot};
use crate::status::{classify, ClassifierInput, TrackingStatus, TripPhase};
use crate::stream::{
    LiveStreamConnector, LiveStreamState, StreamTransport, SubscriptionHandle, WsTransport,
};
use crate::types::{Coordinate, EntityId, TrackedEntity, Window, WindowEnd};

/// The three external boundaries a tracker talks to
#[derive(Clone)]
pub struct TrackerServices {
    pub transport: Arc<dyn StreamTransport>,
    pub registry: Arc<dyn DeviceRegistry>,
    pub history: Arc<dyn HistoryStore>,
}

impl TrackerServices {
    /// WebSocket stream plus HTTP registry and history clients
    pub fn from_config(config: &TrackerConfig) -> Self {
        TrackerServices {
            transport: Arc::new(WsTransport::new(&config.stream_url, config.auth_token.clone())),
            registry: Arc::new(HttpDeviceRegistry::new(
                &config.api_base_url,
                config.auth_token.clone(),
                config.request_timeout(),
            )),
            history: Arc::new(HttpHistoryStore::new(
                &config.api_base_url,
                config.auth_token.clone(),
                config.request_timeout(),
            )),
        }
    }
}

/// Everything tracked for one entity: stream, route and device presence.
///
/// Created with [`EntityTracker::open`]; [`EntityTracker::close`] must be
/// awaited to release the connection. Dropping without closing still stops
/// the background tasks but skips the orderly socket close.
pub struct EntityTracker {
    entity: TrackedEntity,
    config: TrackerConfig,
    registry: Arc<dyn DeviceRegistry>,
    connector: LiveStreamConnector,
    subscription: Option<SubscriptionHandle>,
    fetcher: TrajectoryFetcher,
    presence: DevicePresence,
    trip_phase: TripPhase,
    closed: bool,
}

impl EntityTracker {
    /// Query device presence, then open the live stream if a device is active
    pub async fn open(entity: TrackedEntity, services: &TrackerServices, config: TrackerConfig) -> Result<Self> {
        config.validate()?;

        let connector = LiveStreamConnector::new(services.transport.clone(), config.clone())
            .with_registry(services.registry.clone());
        let fetcher = TrajectoryFetcher::new(entity.id.clone(), services.history.clone(), config.history_limit);

        let mut tracker = EntityTracker {
            entity,
            config,
            registry: services.registry.clone(),
            connector,
            subscription: None,
            fetcher,
            presence: DevicePresence::default(),
            trip_phase: TripPhase::default(),
            closed: false,
        };
        tracker.refresh_presence().await;
        Ok(tracker)
    }

    /// Re-query the registry. Starts the stream when a device has appeared.
    ///
    /// A failed query keeps the previous presence.
    pub async fn refresh_presence(&mut self) -> &DevicePresence {
        match self.registry.presence(&self.entity.id).await {
            Ok(presence) => {
                log::info!(
                    "[{}] active device: {}, seed sample: {}",
                    self.entity.id,
                    presence.has_active_device,
                    presence.seed.is_some()
                );
                self.entity.has_active_device = presence.has_active_device;
                self.presence = presence;
            }
            Err(e) => log::warn!("[{}] device presence query failed: {}", self.entity.id, e),
        }

        // A loop that gave up (device went inactive) is replaced, keeping
        // its last-known sample
        let stream_down = self.subscription.is_none() || self.connector.connection_ended(&self.entity.id);
        if self.presence.has_active_device && stream_down && !self.closed {
            self.subscription = Some(self.connector.subscribe(&self.entity.id).await);
        }
        &self.presence
    }

    /// Replace the history window. Any fetch still running is cancelled.
    pub async fn set_window(&self, window: Window) -> Result<FetchOutcome> {
        if self.closed {
            return Err(TrackerError::Closed);
        }
        self.fetcher.fetch(window).await
    }

    /// History from `start` up to the time of the query
    pub async fn fetch_since(&self, start: DateTime<Utc>) -> Result<FetchOutcome> {
        self.set_window(Window::until_now(self.entity.id.clone(), start)).await
    }

    pub fn set_trip_phase(&mut self, phase: TripPhase) {
        self.trip_phase = phase;
    }

    pub fn trip_phase(&self) -> TripPhase {
        self.trip_phase
    }

    pub fn entity(&self) -> &TrackedEntity {
        &self.entity
    }

    pub fn id(&self) -> &EntityId {
        &self.entity.id
    }

    pub fn presence(&self) -> &DevicePresence {
        &self.presence
    }

    /// Shared handle, for issuing fetches from another task
    pub fn fetcher(&self) -> TrajectoryFetcher {
        self.fetcher.clone()
    }

    pub fn trajectory(&self) -> Trajectory {
        self.fetcher.trajectory()
    }

    pub fn stream_state(&self) -> Option<LiveStreamState> {
        self.connector.state(&self.entity.id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn resolve(&self) -> DisplayLocation {
        self.resolve_at(Utc::now())
    }

    pub fn resolve_at(&self, now: DateTime<Utc>) -> DisplayLocation {
        let stream = self.stream_state();
        let historical = self.fetcher.latest_sample();
        resolve(&FusionInput {
            stream: stream.as_ref(),
            historical: historical.as_ref(),
            seed: self.presence.seed.as_ref(),
            base_coordinate: self.entity.base_coordinate,
            now,
            stale_after: self.config.stale_after(),
        })
    }

    pub fn status(&self) -> TrackingStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> TrackingStatus {
        classify(&self.classifier_input(now))
    }

    fn classifier_input(&self, now: DateTime<Utc>) -> ClassifierInput {
        let stream = self.stream_state();
        // Only the first connection counts as loading; reconnects keep the
        // last-known label
        let first_connect = stream.as_ref().map(|s| s.is_first_connect()).unwrap_or(false);
        let device_gone = stream.as_ref().and_then(|s| s.device_active) == Some(false);

        ClassifierInput {
            in_flight: self.fetcher.in_flight() || first_connect,
            has_device: self.presence.has_active_device && !device_gone,
            is_live: stream
                .as_ref()
                .map(|s| s.is_live(now, self.config.stale_after()))
                .unwrap_or(false),
            has_last_known: stream.as_ref().map(|s| s.has_last_known()).unwrap_or(false),
            trip_phase: self.trip_phase,
            trajectory_non_empty: self.fetcher.has_samples(),
        }
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let now = Utc::now();
        let location = self.resolve_at(now);
        self.snapshot_with(now, &location, location.coordinate)
    }

    fn snapshot_with(
        &self,
        now: DateTime<Utc>,
        location: &DisplayLocation,
        marker: Option<Coordinate>,
    ) -> TrackerSnapshot {
        let status = self.status_at(now);
        let stream = self.stream_state();
        let trajectory = self.fetcher.trajectory();

        TrackerSnapshot {
            entity_id: self.entity.id.clone(),
            timestamp: now,
            trip_phase: self.trip_phase,
            status: status.label().to_string(),
            tone: status.tone(),
            provenance: location.provenance,
            coordinate: location.coordinate,
            marker,
            sample_time: location.sample_time,
            has_active_device: self.presence.has_active_device,
            stream_status: stream.as_ref().map(|s| s.status),
            reconnect_attempts: stream.as_ref().map(|s| s.attempts).unwrap_or(0),
            stream_error: stream.and_then(|s| s.last_error),
            trajectory_samples: trajectory.len(),
            trajectory_distance_m: trajectory.distance_m(),
            fetch_in_flight: self.fetcher.in_flight(),
            fetch_warning: self.fetcher.last_error(),
        }
    }

    /// Start a fresh session: forget the last-known sample and the route.
    /// The stream stays open.
    pub fn reset(&mut self) {
        self.fetcher.reset();
        self.connector.forget_last_known(&self.entity.id);
        log::info!("[{}] session reset", self.entity.id);
    }

    /// Cancel the fetch, unsubscribe and close the stream. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.fetcher.cancel();
        if let Some(handle) = self.subscription.take() {
            self.connector.unsubscribe(&handle).await;
        }
        self.connector.close().await;
        log::info!("[{}] tracker closed", self.entity.id);
    }
}

impl Drop for EntityTracker {
    fn drop(&mut self) {
        self.fetcher.cancel();
    }
}

/// Decluttered marker for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct FleetMarker {
    pub entity_id: EntityId,
    pub location: DisplayLocation,
    /// Where to draw the marker; `None` when nothing is known
    pub marker: Option<Coordinate>,
}

/// Several trackers shown together
pub struct FleetView {
    services: TrackerServices,
    config: TrackerConfig,
    trackers: Vec<EntityTracker>,
}

impl FleetView {
    pub fn new(services: TrackerServices, config: TrackerConfig) -> Self {
        FleetView {
            services,
            config,
            trackers: Vec::new(),
        }
    }

    /// Open a tracker for `entity`, replacing (and closing) any existing
    /// tracker with the same id
    pub async fn add(&mut self, entity: TrackedEntity) -> Result<&mut EntityTracker> {
        self.remove(&entity.id).await;
        let tracker = EntityTracker::open(entity, &self.services, self.config.clone()).await?;
        self.trackers.push(tracker);
        let last = self.trackers.len() - 1;
        Ok(&mut self.trackers[last])
    }

    pub async fn remove(&mut self, entity_id: &EntityId) -> bool {
        match self.trackers.iter().position(|t| t.id() == entity_id) {
            Some(index) => {
                let mut tracker = self.trackers.remove(index);
                tracker.close().await;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<&EntityTracker> {
        self.trackers.iter().find(|t| t.id() == entity_id)
    }

    pub fn get_mut(&mut self, entity_id: &EntityId) -> Option<&mut EntityTracker> {
        self.trackers.iter_mut().find(|t| t.id() == entity_id)
    }

    pub fn trackers(&self) -> &[EntityTracker] {
        &self.trackers
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn set_trip_phase(&mut self, phase: TripPhase) {
        for tracker in self.trackers.iter_mut() {
            tracker.set_trip_phase(phase);
        }
    }

    /// Fetch `[start, end]` for every entity concurrently
    pub async fn fetch_all(
        &self,
        start: DateTime<Utc>,
        end: WindowEnd,
    ) -> Vec<(EntityId, Result<FetchOutcome>)> {
        let fetches = self.trackers.iter().map(|tracker| {
            let id = tracker.id().clone();
            async move {
                let result = match Window::new(id.clone(), start, end) {
                    Ok(window) => tracker.set_window(window).await,
                    Err(e) => Err(e),
                };
                (id, result)
            }
        });
        join_all(fetches).await
    }

    /// Resolve every entity and declutter the ones that have a coordinate
    pub fn markers(&self) -> Vec<FleetMarker> {
        self.markers_at(Utc::now())
    }

    pub fn markers_at(&self, now: DateTime<Utc>) -> Vec<FleetMarker> {
        let resolved: Vec<(EntityId, DisplayLocation)> = self
            .trackers
            .iter()
            .map(|t| (t.id().clone(), t.resolve_at(now)))
            .collect();

        let placed: Vec<(EntityId, Coordinate)> = resolved
            .iter()
            .filter_map(|(id, loc)| loc.coordinate.map(|c| (id.clone(), c)))
            .collect();
        let mut adjusted = declutter(
            &placed,
            self.config.declutter_radius_m,
            self.config.declutter_precision_deg,
        )
        .into_iter();

        resolved
            .into_iter()
            .map(|(entity_id, location)| {
                let marker = if location.coordinate.is_some() {
                    adjusted.next().map(|(_, c)| c)
                } else {
                    None
                };
                FleetMarker {
                    entity_id,
                    location,
                    marker,
                }
            })
            .collect()
    }

    pub fn snapshot(&self, uptime_seconds: u64) -> FleetSnapshot {
        let now = Utc::now();
        let entities = self
            .trackers
            .iter()
            .zip(self.markers_at(now))
            .map(|(tracker, marker)| tracker.snapshot_with(now, &marker.location, marker.marker))
            .collect();
        FleetSnapshot::new(entities, uptime_seconds)
    }

    pub async fn close_all(&mut self) {
        for mut tracker in self.trackers.drain(..) {
            tracker.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::Provenance;
    use crate::history::HistoryRecord;
    use crate::stream::StreamStatus;
    use crate::testing::{wait_for, ScriptedHistoryStore, ScriptedRegistry, ScriptedTransport};
    use crate::types::LocationSample;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        transport: ScriptedTransport,
        registry: ScriptedRegistry,
        history: ScriptedHistoryStore,
    }

    impl Harness {
        fn new(registry: ScriptedRegistry) -> Self {
            Harness {
                transport: ScriptedTransport::new(),
                registry,
                history: ScriptedHistoryStore::new(),
            }
        }

        fn services(&self) -> TrackerServices {
            TrackerServices {
                transport: Arc::new(self.transport.clone()),
                registry: Arc::new(self.registry.clone()),
                history: Arc::new(self.history.clone()),
            }
        }
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            throttle_interval_ms: 100,
            ..TrackerConfig::default()
        }
    }

    fn entity(id: &str) -> TrackedEntity {
        TrackedEntity::new(id, Some(Coordinate::new(10.0, 120.0).unwrap()))
    }

    fn history_record(lat: f64, lon: f64, at: DateTime<Utc>) -> HistoryRecord {
        serde_json::from_value(json!({
            "latitude": lat, "longitude": lon, "gps_timestamp": at.to_rfc3339()
        }))
        .unwrap()
    }

    fn connected(tracker: &EntityTracker) -> bool {
        tracker.stream_state().map(|s| s.status) == Some(StreamStatus::Connected)
    }

    fn sample_event(lat: f64, lon: f64) -> serde_json::Value {
        json!({"location": {"latitude": lat, "longitude": lon}})
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_without_device_uses_base_location() {
        let harness = Harness::new(ScriptedRegistry::inactive());
        let mut tracker = EntityTracker::open(entity("v-1"), &harness.services(), config())
            .await
            .unwrap();
        tracker.set_trip_phase(TripPhase::Active);

        assert!(tracker.stream_state().is_none());
        assert_eq!(harness.transport.connects(), 0);

        let location = tracker.resolve();
        assert_eq!(location.provenance, Provenance::Fallback);
        assert_eq!(location.coordinate, Some(Coordinate::new(10.0, 120.0).unwrap()));
        assert_eq!(tracker.status(), TrackingStatus::BaseLocation);

        tracker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_then_disconnect_keeps_last_known() {
        let harness = Harness::new(ScriptedRegistry::active(None));
        let mut tracker = EntityTracker::open(entity("v-1"), &harness.services(), config())
            .await
            .unwrap();
        tracker.set_trip_phase(TripPhase::Active);

        let now = Utc::now();
        harness
            .history
            .respond(Duration::ZERO, Ok(vec![history_record(13.9, 120.9, now - ChronoDuration::minutes(1))]));
        tracker.fetch_since(now - ChronoDuration::hours(1)).await.unwrap();

        assert!(wait_for(|| connected(&tracker)).await);
        assert_eq!(tracker.status(), TrackingStatus::RouteHistory);
        harness.transport.emit("location_update", sample_event(14.0, 121.0));
        assert!(wait_for(|| tracker.resolve().provenance == Provenance::Live).await);

        let live = tracker.resolve();
        assert_eq!(live.coordinate, Some(Coordinate::new(14.0, 121.0).unwrap()));
        assert_eq!(tracker.status(), TrackingStatus::Live);

        harness.transport.fail_next_connects(100);
        harness.transport.drop_connection();
        assert!(wait_for(|| tracker.resolve().provenance == Provenance::LastKnown).await);
        assert_eq!(tracker.resolve().coordinate, live.coordinate);
        assert_eq!(tracker.status(), TrackingStatus::LastKnown);

        tracker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_sample_is_fallback() {
        let seed = LocationSample::new(13.5, 120.5, Utc::now() - ChronoDuration::hours(2)).unwrap();
        let harness = Harness::new(ScriptedRegistry::active(Some(seed)));
        let mut tracker = EntityTracker::open(entity("v-1"), &harness.services(), config())
            .await
            .unwrap();
        tracker.set_trip_phase(TripPhase::Active);
        assert!(wait_for(|| connected(&tracker)).await);

        let location = tracker.resolve();
        assert_eq!(location.provenance, Provenance::Fallback);
        assert_eq!(location.coordinate.unwrap().latitude, 13.5);
        assert_eq!(tracker.status(), TrackingStatus::WaitingForDevice);

        tracker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_leaves_nothing_running() {
        let harness = Harness::new(ScriptedRegistry::active(None));
        let mut tracker = EntityTracker::open(entity("v-1"), &harness.services(), config())
            .await
            .unwrap();
        assert!(wait_for(|| harness.transport.open_connections() == 1).await);

        harness.history.respond(Duration::from_secs(5), Ok(Vec::new()));
        let fetcher = tracker.fetcher();
        let pending = tokio::spawn(async move {
            fetcher
                .fetch(Window::until_now(EntityId::from("v-1"), Utc::now() - ChronoDuration::hours(1)))
                .await
        });
        assert!(wait_for(|| tracker.fetcher().in_flight()).await);

        tracker.close().await;
        assert!(tracker.is_closed());
        assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Superseded);
        assert!(!tracker.fetcher().in_flight());
        assert_eq!(harness.transport.open_connections(), 0);
        assert!(tracker.stream_state().is_none());

        let after = tracker.fetch_since(Utc::now()).await;
        assert_eq!(after, Err(TrackerError::Closed));

        // Nothing reconnects later
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(harness.transport.connects(), 1);

        // Second close is a no-op
        tracker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_session() {
        let harness = Harness::new(ScriptedRegistry::active(None));
        let mut tracker = EntityTracker::open(entity("v-1"), &harness.services(), config())
            .await
            .unwrap();
        assert!(wait_for(|| harness.transport.open_connections() == 1).await);

        harness
            .history
            .respond(Duration::ZERO, Ok(vec![history_record(13.9, 120.9, Utc::now())]));
        tracker.fetch_since(Utc::now() - ChronoDuration::hours(1)).await.unwrap();
        harness.transport.emit("location_update", sample_event(14.0, 121.0));
        assert!(wait_for(|| tracker.resolve().provenance == Provenance::Live).await);

        tracker.reset();
        assert!(tracker.trajectory().is_empty());
        assert_eq!(tracker.resolve().provenance, Provenance::Fallback);
        assert_eq!(harness.transport.open_connections(), 1);

        tracker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_restarts_when_device_returns() {
        let harness = Harness::new(ScriptedRegistry::active(None));
        let mut tracker = EntityTracker::open(entity("v-1"), &harness.services(), config())
            .await
            .unwrap();
        assert!(wait_for(|| connected(&tracker)).await);
        harness.transport.emit("location_update", sample_event(14.0, 121.0));
        assert!(wait_for(|| tracker.resolve().provenance == Provenance::Live).await);

        // Device unplugged: retries run out and the re-query ends the loop
        harness.registry.set_active(false);
        harness.transport.fail_next_connects(100);
        harness.transport.drop_connection();
        assert!(wait_for(|| harness.registry.queries() == 2).await);
        assert!(wait_for(|| tracker.stream_state().map(|s| s.device_active) == Some(Some(false))).await);
        assert_eq!(harness.transport.connects(), 5);
        assert_eq!(tracker.stream_state().unwrap().status, StreamStatus::Disconnected);

        // Still inactive: nothing reopens
        tracker.refresh_presence().await;
        assert!(!tracker.presence().has_active_device);
        assert_eq!(harness.transport.connects(), 5);

        // Device back
        harness.registry.set_active(true);
        harness.transport.fail_next_connects(0);
        assert!(tracker.refresh_presence().await.has_active_device);
        assert!(wait_for(|| connected(&tracker)).await);
        assert_eq!(harness.transport.connects(), 6);
        assert_eq!(harness.transport.open_connections(), 1);

        // Last-known carried into the new subscription
        let state = tracker.stream_state().unwrap();
        assert_eq!(state.last_sample.unwrap().latitude, 14.0);
        assert_eq!(state.device_active, None);

        // A healthy stream is left alone
        tracker.refresh_presence().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.transport.connects(), 6);

        tracker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_failure_is_not_fatal() {
        let harness = Harness::new(ScriptedRegistry::failing());
        let mut tracker = EntityTracker::open(entity("v-1"), &harness.services(), config())
            .await
            .unwrap();
        assert!(!tracker.presence().has_active_device);
        assert_eq!(tracker.resolve().provenance, Provenance::Fallback);
        tracker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fleet_declutters_colocated_entities() {
        let harness = Harness::new(ScriptedRegistry::inactive());
        let mut fleet = FleetView::new(harness.services(), config());
        let base = Coordinate::new(14.5995, 120.9842).unwrap();

        for id in ["a", "b", "c"] {
            fleet.add(TrackedEntity::new(id, Some(base))).await.unwrap();
        }
        fleet.add(TrackedEntity::new("d", None)).await.unwrap();
        // Re-adding replaces rather than duplicates
        fleet.add(TrackedEntity::new("c", Some(base))).await.unwrap();
        assert_eq!(fleet.len(), 4);

        let markers = fleet.markers();
        let ids: Vec<&str> = markers.iter().map(|m| m.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d", "c"]);
        assert_eq!(markers[0].marker, Some(base));
        assert_ne!(markers[1].marker, Some(base));
        assert_ne!(markers[3].marker, Some(base));
        assert_ne!(markers[1].marker, markers[3].marker);
        assert!(markers[2].marker.is_none());
        assert_eq!(markers[1].location.coordinate, Some(base));

        let snapshot = fleet.snapshot(5);
        assert_eq!(snapshot.entities.len(), 4);
        assert_eq!(snapshot.entities[2].status, "base location");
        assert_eq!(snapshot.entities[1].marker, markers[1].marker);

        fleet.close_all().await;
        assert!(fleet.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fleet_fetch_all() {
        let harness = Harness::new(ScriptedRegistry::inactive());
        let mut fleet = FleetView::new(harness.services(), config());
        fleet.add(entity("a")).await.unwrap();
        fleet.add(entity("b")).await.unwrap();

        let now = Utc::now();
        harness
            .history
            .respond(Duration::ZERO, Ok(vec![history_record(13.9, 120.9, now)]));
        harness.history.respond(Duration::ZERO, Err(TrackerError::Http(502)));

        let results = fleet.fetch_all(now - ChronoDuration::hours(1), WindowEnd::Now).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, EntityId::from("a"));
        assert_eq!(results[0].1, Ok(FetchOutcome::Applied(1)));
        assert_eq!(results[1].1, Err(TrackerError::Http(502)));

        let b = fleet.get(&EntityId::from("b")).unwrap();
        assert_eq!(b.snapshot().fetch_warning.as_deref(), Some("HTTP error: 502"));

        fleet.close_all().await;
    }
}
