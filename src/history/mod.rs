pub mod fetcher;
pub mod store;
pub mod trajectory;

pub use fetcher::{FetchOutcome, TrajectoryFetcher};
pub use store::{HistoryQuery, HistoryRecord, HistoryStore, HttpHistoryStore};
pub use trajectory::Trajectory;
