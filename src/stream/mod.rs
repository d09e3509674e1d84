pub mod backoff;
pub mod connector;
pub mod transport;

pub use backoff::ReconnectState;
pub use connector::{LiveStreamConnector, LiveStreamState, StreamStatus, SubscriptionHandle};
pub use transport::{ServerEvent, StreamConnection, StreamTransport, WsTransport};
