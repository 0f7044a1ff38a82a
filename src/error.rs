//! Main Crate Error

use libp2p::PeerId;

#[derive(thiserror::Error, Debug)]
/// dht-tracer crate error enum.
pub enum Error {
    /// Malformed or unrecognized command, empty key, unparsable argument.
    ///
    /// Always surfaced to the caller, never retried.
    #[error("{0}")]
    Validation(String),

    /// A single peer could not be reached.
    #[error("{0}")]
    Connectivity(String),

    /// A node ended its bootstrap without any connected peer.
    #[error("failed to bootstrap {0} to any peer")]
    NoBootstrapPeers(PeerId),

    /// Failure reported by the DHT engine itself, passed through verbatim.
    #[error("{0}")]
    Engine(String),

    /// Allocating a node or joining the transport stack failed.
    #[error("failed to construct node: {0}")]
    Construction(String),

    /// The operation exists in the interface but is not implemented.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("dht node is not started")]
    NotStarted,

    /// The node's actor task is gone, all requests will fail.
    #[error("dht node was shutdown")]
    NodeShutdown,

    #[error("operation timed out")]
    Timeout,

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if the error was caused by the caller's input rather
    /// than by this node or the network.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

/// Alias for results returned throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
