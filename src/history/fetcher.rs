use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use super::store::{HistoryQuery, HistoryStore};
use super::trajectory::Trajectory;
use crate::error::{Result, TrackerError};
use crate::types::{EntityId, LocationSample, Window};

/// Result of a fetch that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The trajectory was replaced; holds the new sample count
    Applied(usize),
    /// A newer fetch was issued (or the fetcher was cancelled) first
    Superseded,
}

#[derive(Default)]
struct FetcherState {
    generation: u64,
    cancel: Option<CancellationToken>,
    trajectory: Trajectory,
    last_error: Option<String>,
}

/// Windowed, cancellable history fetcher for one entity.
///
/// Cloning shares the same state, so a caller can issue a new fetch from
/// another task while an older one is still in flight. Only the most
/// recently issued fetch may replace the trajectory.
#[derive(Clone)]
pub struct TrajectoryFetcher {
    entity_id: EntityId,
    store: Arc<dyn HistoryStore>,
    limit: u32,
    state: Arc<Mutex<FetcherState>>,
}

impl TrajectoryFetcher {
    pub fn new(entity_id: EntityId, store: Arc<dyn HistoryStore>, limit: u32) -> Self {
        TrajectoryFetcher {
            entity_id,
            store,
            limit,
            state: Arc::new(Mutex::new(FetcherState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FetcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Query the store for `window` and rebuild the trajectory.
    ///
    /// Any fetch still in flight is cancelled. On failure the previous
    /// trajectory stays in place and the error is kept as a soft warning.
    pub async fn fetch(&self, window: Window) -> Result<FetchOutcome> {
        if window.entity_id() != &self.entity_id {
            return Err(TrackerError::InvalidWindow(format!(
                "window for {} issued to fetcher for {}",
                window.entity_id(),
                self.entity_id
            )));
        }

        let token = CancellationToken::new();
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            if let Some(previous) = state.cancel.replace(token.clone()) {
                previous.cancel();
            }
            state.generation
        };

        let query = HistoryQuery::from_window(&window, Utc::now(), self.limit);
        log::debug!(
            "[{}] fetching history {} .. {} (limit {})",
            self.entity_id,
            query.start,
            query.end,
            query.limit
        );

        let result = tokio::select! {
            _ = token.cancelled() => {
                log::debug!("[{}] history fetch {} superseded", self.entity_id, generation);
                return Ok(FetchOutcome::Superseded);
            }
            result = self.store.query(&query) => result,
        };

        let mut state = self.lock();
        if state.generation != generation {
            return Ok(FetchOutcome::Superseded);
        }
        state.cancel = None;

        match result {
            Ok(records) => {
                let total = records.len();
                let samples: Vec<LocationSample> = records
                    .iter()
                    .filter_map(|record| match record.to_sample() {
                        Ok(sample) => Some(sample),
                        Err(e) => {
                            log::debug!("[{}] dropping history record: {}", self.entity_id, e);
                            None
                        }
                    })
                    .collect();

                if samples.len() < total {
                    log::debug!(
                        "[{}] kept {}/{} history records",
                        self.entity_id,
                        samples.len(),
                        total
                    );
                }

                state.trajectory = Trajectory::from_samples(Some(window), samples);
                state.last_error = None;
                Ok(FetchOutcome::Applied(state.trajectory.len()))
            }
            Err(e) => {
                log::warn!(
                    "[{}] history fetch failed ({}): {}; keeping previous route",
                    self.entity_id,
                    if e.is_transient() { "transient" } else { "permanent" },
                    e
                );
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Cancel any in-flight fetch without touching the trajectory
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.generation += 1;
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
    }

    /// Cancel and drop the current trajectory
    pub fn reset(&self) {
        self.cancel();
        let mut state = self.lock();
        state.trajectory = Trajectory::empty();
        state.last_error = None;
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn trajectory(&self) -> Trajectory {
        self.lock().trajectory.clone()
    }

    pub fn latest_sample(&self) -> Option<LocationSample> {
        self.lock().trajectory.latest().cloned()
    }

    pub fn has_samples(&self) -> bool {
        !self.lock().trajectory.is_empty()
    }

    pub fn in_flight(&self) -> bool {
        self.lock().cancel.is_some()
    }

    /// Soft warning from the last failed fetch, cleared by the next success
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }
}
