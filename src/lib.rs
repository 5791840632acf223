pub mod config;
mod core;
pub mod dht;
pub mod maintenance;
pub mod node;
pub mod protocol;
mod test_support;

// Re-export commonly used types for consumers and integration tests
pub use crate::core::bucket::{Bucket, Payload};
pub use crate::core::identifier::{
    finger_target, in_between, offset, ring_distance, Identifier, NodeAddress, Peer, M,
};
pub use crate::core::ring::{RingState, RoutingStep};
pub use crate::node::{Node, NodeSnapshot};

use ctor::ctor;
use tracing_subscriber::{fmt, EnvFilter};

#[ctor]
fn init_tracing() {
    // Avoid duplicate initialization if multiple tests run in parallel
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_target(false)
        .compact()
        .try_init();
}

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong inside the ring engine. Peer failures are
/// signals, not fatal conditions: call sites degrade the ring state and let
/// the next maintenance cycle re-converge.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transport failure talking to {addr}: {source}")]
    Transport {
        addr: NodeAddress,
        #[source]
        source: std::io::Error,
    },
    #[error("lookup for {target} gave up after {hops} hops")]
    RoutingExhausted { target: Identifier, hops: usize },
    #[error("peer answered with a reply that does not match the request")]
    UnexpectedResponse,
    #[error("could not join the ring via {bootstrap}")]
    JoinFailed {
        bootstrap: NodeAddress,
        #[source]
        source: Box<Error>,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no file stored under \"{filename}\"")]
    NotFound { filename: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
