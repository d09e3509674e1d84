//! In-process fakes for the network boundaries, shared by unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{Result, TrackerError};
use crate::history::{HistoryQuery, HistoryRecord, HistoryStore};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::stream::transport::{ServerEvent, StreamConnection, StreamTransport};
use crate::types::{EntityId, LocationSample};

/// Serve `app` on an ephemeral localhost port
pub async fn serve(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Poll `condition` every 50 ms for up to 200 s of (usually paused) time
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..4000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[derive(Default)]
struct TransportInner {
    connects: usize,
    fail_remaining: usize,
    next_conn: u64,
    open: Vec<(u64, mpsc::UnboundedSender<ServerEvent>)>,
    joins: Vec<EntityId>,
}

/// Stream transport driven from the test body
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<TransportInner>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an event to every open connection
    pub fn emit(&self, event: &str, data: Value) {
        let inner = self.inner.lock().unwrap();
        for (_, tx) in inner.open.iter() {
            let _ = tx.send(ServerEvent::new(event, data.clone()));
        }
    }

    /// Simulate the server dropping every open connection
    pub fn drop_connection(&self) {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<u64> = inner.open.iter().map(|(id, _)| *id).collect();
        // Replace senders with closed ones so readers see end-of-stream
        inner.open = ids
            .into_iter()
            .map(|id| {
                let (tx, _) = mpsc::unbounded_channel();
                (id, tx)
            })
            .collect();
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.inner.lock().unwrap().fail_remaining = n;
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    pub fn open_connections(&self) -> usize {
        self.inner.lock().unwrap().open.len()
    }

    pub fn joins(&self) -> Vec<EntityId> {
        self.inner.lock().unwrap().joins.clone()
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn connect(&self, _entity_id: &EntityId) -> Result<Box<dyn StreamConnection>> {
        let mut inner = self.inner.lock().unwrap();
        inner.connects += 1;
        if inner.fail_remaining > 0 {
            inner.fail_remaining -= 1;
            return Err(TrackerError::Transport("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.next_conn += 1;
        let id = inner.next_conn;
        inner.open.push((id, tx));
        Ok(Box::new(ScriptedConnection {
            id,
            rx,
            inner: self.inner.clone(),
        }))
    }
}

struct ScriptedConnection {
    id: u64,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    inner: Arc<Mutex<TransportInner>>,
}

impl ScriptedConnection {
    fn release(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.open.retain(|(id, _)| *id != self.id);
    }
}

#[async_trait]
impl StreamConnection for ScriptedConnection {
    async fn send_join(&mut self, entity_id: &EntityId) -> Result<()> {
        self.inner.lock().unwrap().joins.push(entity_id.clone());
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Clone)]
enum RegistryMode {
    Active(Option<LocationSample>),
    Inactive,
    Failing,
}

/// Device registry whose answer the test can switch
#[derive(Clone)]
pub struct ScriptedRegistry {
    mode: Arc<Mutex<RegistryMode>>,
    queries: Arc<AtomicUsize>,
}

impl ScriptedRegistry {
    fn with_mode(mode: RegistryMode) -> Self {
        ScriptedRegistry {
            mode: Arc::new(Mutex::new(mode)),
            queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active(seed: Option<LocationSample>) -> Self {
        Self::with_mode(RegistryMode::Active(seed))
    }

    pub fn inactive() -> Self {
        Self::with_mode(RegistryMode::Inactive)
    }

    pub fn failing() -> Self {
        Self::with_mode(RegistryMode::Failing)
    }

    /// Flip to an active device without a seed, or to an inactive one
    pub fn set_active(&self, active: bool) {
        *self.mode.lock().unwrap() = if active {
            RegistryMode::Active(None)
        } else {
            RegistryMode::Inactive
        };
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceRegistry for ScriptedRegistry {
    async fn devices(&self, _entity_id: &EntityId) -> Result<Vec<DeviceRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode.lock().unwrap().clone();
        match &mode {
            RegistryMode::Active(seed) => Ok(vec![DeviceRecord {
                is_active: Some(true),
                last_tracking: seed.as_ref().map(|s| {
                    json!({
                        "latitude": s.latitude,
                        "longitude": s.longitude,
                        "gps_timestamp": s.timestamp.to_rfc3339(),
                    })
                }),
            }]),
            RegistryMode::Inactive => Ok(vec![DeviceRecord {
                is_active: Some(false),
                last_tracking: None,
            }]),
            RegistryMode::Failing => Err(TrackerError::Http(503)),
        }
    }
}

#[derive(Default)]
struct HistoryInner {
    responses: VecDeque<(Duration, Result<Vec<HistoryRecord>>)>,
    queries: Vec<HistoryQuery>,
}

/// History store answering from a queue; an empty queue yields no records
#[derive(Clone, Default)]
pub struct ScriptedHistoryStore {
    inner: Arc<Mutex<HistoryInner>>,
}

impl ScriptedHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response, delivered after `delay`
    pub fn respond(&self, delay: Duration, response: Result<Vec<HistoryRecord>>) {
        self.inner.lock().unwrap().responses.push_back((delay, response));
    }

    pub fn queries(&self) -> Vec<HistoryQuery> {
        self.inner.lock().unwrap().queries.clone()
    }
}

#[async_trait]
impl HistoryStore for ScriptedHistoryStore {
    async fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        let (delay, response) = {
            let mut inner = self.inner.lock().unwrap();
            inner.queries.push(query.clone());
            inner
                .responses
                .pop_front()
                .unwrap_or((Duration::ZERO, Ok(Vec::new())))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }
}
