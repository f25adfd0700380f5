pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod errors;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod packet;
mod pipeline;
pub mod registry;
pub mod retry;
pub mod rtmp;
pub mod session;
mod source;
pub mod store;
pub mod stream_key;
pub mod transport;

#[cfg(test)]
#[path = "../tests/common/mp4.rs"]
pub(crate) mod fixture;

pub use self::{
    errors::{RelayError, Result},
    ingest::IngestManager,
    pipeline::ProgressSnapshot,
    registry::{Registry, RegistryConfig},
    session::{Session, SessionId, SessionRuntime, SessionSnapshot, SessionState},
    store::Store,
    stream_key::StreamKey,
    transport::{Connector, Destination, Publisher},
};
