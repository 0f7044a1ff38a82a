#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
pub mod bootstrap;
pub mod command;
pub mod config;
pub mod eventlog;
pub mod gateway;
pub mod harness;
pub mod network;
pub mod node;
pub mod tracer;

mod error;

pub use bytes::Bytes;
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use libp2p::{Multiaddr, PeerId};
pub use network::NodeNetwork;
pub use node::{AddrInfo, PeerNode};
pub use tracer::Tracer;
