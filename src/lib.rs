//! Live location fusion and route reconstruction for tracked vehicles.
//!
//! Each [`EntityTracker`] combines a throttled push stream, a windowed
//! history query and the registry's fallback data into one display
//! location plus a status label. [`FleetView`] runs several trackers and
//! spreads co-located markers apart.

pub mod config;
pub mod declutter;
pub mod error;
pub mod fusion;
pub mod history;
pub mod registry;
pub mod snapshot;
pub mod status;
pub mod stream;
pub mod throttle;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::TrackerConfig;
pub use declutter::declutter;
pub use error::{Result, TrackerError};
pub use fusion::{resolve, DisplayLocation, FusionInput, Provenance};
pub use history::{FetchOutcome, Trajectory, TrajectoryFetcher};
pub use registry::DevicePresence;
pub use snapshot::{FleetSnapshot, TrackerSnapshot};
pub use status::{classify, ClassifierInput, StatusTone, TrackingStatus, TripPhase};
pub use stream::{LiveStreamConnector, LiveStreamState, StreamStatus};
pub use throttle::ThrottleBuffer;
pub use tracker::{EntityTracker, FleetMarker, FleetView, TrackerServices};
pub use types::{Coordinate, EntityId, LocationSample, TrackedEntity, Window, WindowEnd};
