//! Network plumbing between the DHT and a transport.
//!
//! Messages travel over [Pipe]s, a [Muxer] shares one pipe among several
//! protocols, and a [Service] turns a protocol pipe into request/response
//! calls.

mod message;
pub mod mux;
mod pipe;
pub mod service;

pub use message::NetMessage;
pub use mux::{Muxer, ProtocolId, ProtocolMap};
pub use pipe::Pipe;
pub use service::{Handler, Service};

use crate::{Context, Peer, Result};

/// Opens connections to peers at the transport layer.
pub trait Dialer: Send + Sync {
    fn dial_peer(&self, peer: &Peer) -> Result<()>;
}

/// Sends a request to `message.peer()` and waits for its correlated response.
pub trait RequestSender: Send + Sync {
    /// Fails with a transport error if no response arrives before `ctx` is done.
    fn send_request(&self, ctx: &Context, message: NetMessage) -> Result<NetMessage>;
}
