use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::ReconnectState;
use super::transport::{StreamConnection, StreamTransport};
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::registry::DeviceRegistry;
use crate::throttle::{ThrottleBuffer, ThrottleHandle};
use crate::types::{EntityId, LocationSample};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state of one entity's push stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Per-entity stream state, owned by the connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStreamState {
    pub status: StreamStatus,
    pub last_sample: Option<LocationSample>,
    /// Wall-clock time the last sample reached the state
    pub last_update_at: Option<DateTime<Utc>>,
    /// Failed connection attempts in the current retry round
    pub attempts: u32,
    /// Set once any connection attempt has finished, successful or not.
    /// Unlike `attempts` it survives the reset between retry rounds.
    pub has_attempted: bool,
    /// Result of the last presence re-query, if one was needed
    pub device_active: Option<bool>,
    pub last_error: Option<String>,
}

impl LiveStreamState {
    pub fn new(seed: Option<LocationSample>) -> Self {
        LiveStreamState {
            status: StreamStatus::Disconnected,
            last_sample: seed,
            last_update_at: None,
            attempts: 0,
            has_attempted: false,
            device_active: None,
            last_error: None,
        }
    }

    /// Apply a throttled sample. Samples older than the current one are
    /// rejected so live delivery stays monotonic.
    pub fn record_sample(&mut self, sample: LocationSample, now: DateTime<Utc>) -> bool {
        if let Some(current) = &self.last_sample {
            if sample.timestamp < current.timestamp {
                return false;
            }
        }
        self.last_sample = Some(sample);
        self.last_update_at = Some(now);
        true
    }

    /// Connected and heard from within `stale_after`
    pub fn is_live(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if self.status != StreamStatus::Connected || self.last_sample.is_none() {
            return false;
        }
        match self.last_update_at {
            Some(at) => (now - at).to_std().map(|age| age <= stale_after).unwrap_or(true),
            None => false,
        }
    }

    pub fn live_sample(&self, now: DateTime<Utc>, stale_after: Duration) -> Option<&LocationSample> {
        if self.is_live(now, stale_after) {
            self.last_sample.as_ref()
        } else {
            None
        }
    }

    pub fn has_last_known(&self) -> bool {
        self.last_sample.is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.status == StreamStatus::Connecting
    }

    /// Still on the very first connection attempt with nothing to show
    pub fn is_first_connect(&self) -> bool {
        self.status == StreamStatus::Connecting && !self.has_attempted && !self.has_last_known()
    }
}

fn lock_state(state: &Mutex<LiveStreamState>) -> MutexGuard<'_, LiveStreamState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returned by [`LiveStreamConnector::subscribe`]; identifies one subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    entity_id: EntityId,
    id: u64,
}

impl SubscriptionHandle {
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }
}

struct Subscription {
    id: u64,
    state: Arc<Mutex<LiveStreamState>>,
    cancel: CancellationToken,
    connection_task: Option<JoinHandle<()>>,
    throttle: ThrottleBuffer<LocationSample>,
    applier_task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Cancel, close the connection, stop the throttle, then drain the applier.
    async fn teardown(mut self) -> LiveStreamState {
        self.cancel.cancel();
        if let Some(task) = self.connection_task.take() {
            let _ = task.await;
        }
        self.throttle.close().await;
        if let Some(task) = self.applier_task.take() {
            let _ = task.await;
        }

        let mut state = lock_state(&self.state);
        state.status = StreamStatus::Disconnected;
        state.clone()
    }

    fn connection_ended(&self) -> bool {
        self.connection_task
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.connection_task.take() {
            task.abort();
        }
        if let Some(task) = self.applier_task.take() {
            task.abort();
        }
    }
}

/// Owns one push connection per subscribed entity.
///
/// Each subscription runs three tasks: the connection loop (connect, join,
/// read, reconnect), the throttle, and an applier that writes throttled
/// samples into the shared [`LiveStreamState`].
pub struct LiveStreamConnector {
    transport: Arc<dyn StreamTransport>,
    registry: Option<Arc<dyn DeviceRegistry>>,
    config: TrackerConfig,
    subscriptions: HashMap<EntityId, Subscription>,
    next_id: u64,
}

impl LiveStreamConnector {
    pub fn new(transport: Arc<dyn StreamTransport>, config: TrackerConfig) -> Self {
        LiveStreamConnector {
            transport,
            registry: None,
            config,
            subscriptions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registry consulted when reconnect attempts are exhausted
    pub fn with_registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Open a stream for `entity_id`, replacing any active one for the same
    /// entity. The previous subscription is fully torn down first; its last
    /// sample carries over as the new subscription's last-known location.
    pub async fn subscribe(&mut self, entity_id: &EntityId) -> SubscriptionHandle {
        let carried = match self.subscriptions.remove(entity_id) {
            Some(previous) => {
                log::info!("[{}] replacing active stream subscription", entity_id);
                previous.teardown().await.last_sample
            }
            None => None,
        };

        let id = self.next_id;
        self.next_id += 1;

        let state = Arc::new(Mutex::new(LiveStreamState::new(carried)));
        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(1);
        let throttle = ThrottleBuffer::spawn(self.config.throttle_interval(), out_tx);

        let applier_task = tokio::spawn(apply_samples(out_rx, state.clone(), entity_id.clone()));
        let connection_task = tokio::spawn(run_connection(ConnectionContext {
            entity_id: entity_id.clone(),
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            state: state.clone(),
            throttle: throttle.handle(),
            cancel: cancel.clone(),
            reconnect: ReconnectState::from_config(entity_id.as_str(), &self.config),
            presence_recheck_delay: self.config.presence_recheck_delay(),
        }));

        log::info!("[{}] stream subscription {} opened", entity_id, id);
        self.subscriptions.insert(
            entity_id.clone(),
            Subscription {
                id,
                state,
                cancel,
                connection_task: Some(connection_task),
                throttle,
                applier_task: Some(applier_task),
            },
        );

        SubscriptionHandle {
            entity_id: entity_id.clone(),
            id,
        }
    }

    /// Tear down the subscription behind `handle`. Returns the final state,
    /// or `None` if the handle was already replaced or unsubscribed.
    pub async fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Option<LiveStreamState> {
        match self.subscriptions.get(&handle.entity_id) {
            Some(sub) if sub.id == handle.id => {}
            _ => return None,
        }
        let sub = self.subscriptions.remove(&handle.entity_id)?;
        let final_state = sub.teardown().await;
        log::info!("[{}] stream subscription {} closed", handle.entity_id, handle.id);
        Some(final_state)
    }

    /// Snapshot of the entity's stream state
    pub fn state(&self, entity_id: &EntityId) -> Option<LiveStreamState> {
        self.subscriptions
            .get(entity_id)
            .map(|sub| lock_state(&sub.state).clone())
    }

    /// Drop the entity's last-known sample. Returns false when not subscribed.
    pub fn forget_last_known(&self, entity_id: &EntityId) -> bool {
        match self.subscriptions.get(entity_id) {
            Some(sub) => {
                let mut state = lock_state(&sub.state);
                state.last_sample = None;
                state.last_update_at = None;
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, entity_id: &EntityId) -> bool {
        self.subscriptions.contains_key(entity_id)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// True when the entity has no subscription or its connection loop has
    /// given up (no active device)
    pub fn connection_ended(&self, entity_id: &EntityId) -> bool {
        self.subscriptions
            .get(entity_id)
            .map(|sub| sub.connection_ended())
            .unwrap_or(true)
    }

    /// Unsubscribe every entity
    pub async fn close(&mut self) {
        let entities: Vec<EntityId> = self.subscriptions.keys().cloned().collect();
        for entity_id in entities {
            if let Some(sub) = self.subscriptions.remove(&entity_id) {
                sub.teardown().await;
            }
        }
    }
}

struct ConnectionContext {
    entity_id: EntityId,
    transport: Arc<dyn StreamTransport>,
    registry: Option<Arc<dyn DeviceRegistry>>,
    state: Arc<Mutex<LiveStreamState>>,
    throttle: ThrottleHandle<LocationSample>,
    cancel: CancellationToken,
    reconnect: ReconnectState,
    presence_recheck_delay: Duration,
}

impl ConnectionContext {
    fn set_status(&self, status: StreamStatus, error: Option<String>) {
        let mut state = lock_state(&self.state);
        state.status = status;
        state.attempts = self.reconnect.attempts;
        if status != StreamStatus::Connecting {
            state.has_attempted = true;
        }
        if error.is_some() {
            state.last_error = error;
        }
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

enum PumpExit {
    Cancelled,
    Failed(String),
}

async fn run_connection(mut ctx: ConnectionContext) {
    loop {
        ctx.set_status(StreamStatus::Connecting, None);

        let connected = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = ctx.transport.connect(&ctx.entity_id) => result,
        };

        let failure = match connected {
            Ok(mut conn) => match join_and_pump(&mut ctx, conn.as_mut()).await {
                PumpExit::Cancelled => {
                    close_connection(conn.as_mut()).await;
                    break;
                }
                PumpExit::Failed(reason) => {
                    close_connection(conn.as_mut()).await;
                    reason
                }
            },
            Err(e) => e.to_string(),
        };

        match ctx.reconnect.record_failed_attempt() {
            Some(delay) => {
                log::warn!(
                    "[{}] stream failed: {}. Retrying in {:.1}s (attempt {}/{})",
                    ctx.entity_id,
                    failure,
                    delay.as_secs_f64(),
                    ctx.reconnect.attempts,
                    ctx.reconnect.max_attempts
                );
                ctx.set_status(StreamStatus::Error, Some(failure));
                if !ctx.pause(delay).await {
                    break;
                }
            }
            None => {
                log::warn!(
                    "[{}] stream failed: {}. {}, re-checking device presence",
                    ctx.entity_id,
                    failure,
                    ctx.reconnect.status()
                );
                ctx.set_status(StreamStatus::Error, Some(failure));
                if !recheck_presence(&mut ctx).await {
                    break;
                }
            }
        }
    }

    lock_state(&ctx.state).status = StreamStatus::Disconnected;
}

/// After an exhausted retry round, ask the registry whether to keep trying.
/// Returns false when the loop should end.
async fn recheck_presence(ctx: &mut ConnectionContext) -> bool {
    let presence = match &ctx.registry {
        Some(registry) => {
            let registry = registry.clone();
            tokio::select! {
                _ = ctx.cancel.cancelled() => return false,
                result = registry.presence(&ctx.entity_id) => Some(result),
            }
        }
        None => None,
    };

    match presence {
        Some(Ok(presence)) if !presence.has_active_device => {
            log::info!("[{}] no active device registered, stopping stream", ctx.entity_id);
            let mut state = lock_state(&ctx.state);
            state.device_active = Some(false);
            state.status = StreamStatus::Disconnected;
            false
        }
        Some(Ok(_)) => {
            lock_state(&ctx.state).device_active = Some(true);
            ctx.reconnect.reset();
            ctx.pause(ctx.presence_recheck_delay).await
        }
        Some(Err(e)) => {
            log::warn!("[{}] device presence query failed: {}", ctx.entity_id, e);
            ctx.reconnect.reset();
            ctx.pause(ctx.presence_recheck_delay).await
        }
        None => {
            ctx.reconnect.reset();
            ctx.pause(ctx.presence_recheck_delay).await
        }
    }
}

async fn join_and_pump(ctx: &mut ConnectionContext, conn: &mut dyn StreamConnection) -> PumpExit {
    let joined = tokio::select! {
        _ = ctx.cancel.cancelled() => return PumpExit::Cancelled,
        result = conn.send_join(&ctx.entity_id) => result,
    };
    if let Err(e) = joined {
        return PumpExit::Failed(format!("join failed: {}", e));
    }

    ctx.reconnect.record_success();
    ctx.set_status(StreamStatus::Connected, None);
    log::info!("[{}] stream connected", ctx.entity_id);

    loop {
        let event = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return PumpExit::Cancelled,
            event = conn.next_event() => event,
        };

        match event {
            Some(Ok(event)) if event.is_sample() => {
                match LocationSample::from_stream_payload(&event.data, Utc::now()) {
                    Ok(sample) => {
                        if ctx.throttle.push(sample).is_err() {
                            return PumpExit::Cancelled;
                        }
                    }
                    Err(e) => log::debug!("[{}] dropping malformed sample: {}", ctx.entity_id, e),
                }
            }
            Some(Ok(event)) => log::debug!("[{}] ignoring event '{}'", ctx.entity_id, event.event),
            Some(Err(TrackerError::Decode(e))) => {
                log::debug!("[{}] dropping undecodable frame: {}", ctx.entity_id, e)
            }
            Some(Err(e)) => return PumpExit::Failed(e.to_string()),
            None => return PumpExit::Failed("connection closed by server".to_string()),
        }
    }
}

async fn close_connection(conn: &mut dyn StreamConnection) {
    if tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await.is_err() {
        log::debug!("stream close timed out");
    }
}

async fn apply_samples(
    mut rx: mpsc::Receiver<LocationSample>,
    state: Arc<Mutex<LiveStreamState>>,
    entity_id: EntityId,
) {
    while let Some(sample) = rx.recv().await {
        if !lock_state(&state).record_sample(sample, Utc::now()) {
            log::debug!("[{}] dropping out-of-order live sample", entity_id);
        }
    }
}
