// greenlink-api: collaborator interfaces for the greenlink realtime layer
// (push transport, snapshot endpoint, HTTP client construction).

pub mod error;
pub mod http;
pub mod memory;
pub mod model;
pub mod push;
pub mod snapshot;

pub use error::Error;
pub use http::{HttpConfig, TlsMode};
pub use memory::{ChannelCalls, MemoryTransport};
pub use model::{EntityId, EntitySnapshot, ServerTimestamp};
pub use push::{
    ChannelHandle, ConnectionState, EventListener, ListenerId, PushEvent, PushTransport,
    StateListener, SUBSCRIPTION_ERROR, SUBSCRIPTION_SUCCEEDED,
};
pub use snapshot::{SnapshotClient, SnapshotFetcher};
