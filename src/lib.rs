#![doc = include_str!("../README.md")]

// Public modules
mod common;
pub mod context;
pub mod datastore;
pub mod dht;
mod error;
pub mod net;
pub mod peerstore;
pub mod testnet;

pub use crate::common::{
    messages, Bucket, ClosestPeers, Id, Key, Message, MessageType, Peer, PeerId, PeerInfo,
    RoutingTable, DEFAULT_BUCKET_SIZE, ID_BITS, ID_SIZE,
};
pub use bytes::Bytes;
pub use context::{CancelHandle, Context};
pub use datastore::{Datastore, MemoryDatastore};
pub use dht::{Config, Dht, DhtBuilder, ValueOrPeers};
pub use error::Error;
pub use peerstore::{MemoryPeerstore, Peerstore};
pub use testnet::{MemoryNetwork, Testnet};

pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
