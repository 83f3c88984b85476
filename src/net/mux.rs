//! Share one message stream among several protocols.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{NetMessage, Pipe};
use crate::{CancelHandle, Context, Error, Result};

/// Capacity of every pipe a [Muxer] creates.
pub const DEFAULT_PIPE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Protocols sharing a connection, with their stable wire ids.
pub enum ProtocolId {
    Test = 0,
    Identify = 1,
    Routing = 2,
    Exchange = 3,
    Diagnostic = 4,
}

impl TryFrom<u8> for ProtocolId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => ProtocolId::Test,
            1 => ProtocolId::Identify,
            2 => ProtocolId::Routing,
            3 => ProtocolId::Exchange,
            4 => ProtocolId::Diagnostic,
            other => return Err(Error::UnknownProtocol(other)),
        })
    }
}

/// The pipe each protocol reads from and writes to.
pub type ProtocolMap = HashMap<ProtocolId, Pipe>;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "p")]
    protocol: u8,

    #[serde(rename = "d")]
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

/// Wrap `data` in an envelope tagged with `pid`.
pub fn wrap_data(data: &[u8], pid: ProtocolId) -> Result<Vec<u8>> {
    let envelope = Envelope {
        protocol: pid as u8,
        data: data.to_vec(),
    };

    Ok(serde_bencode::to_bytes(&envelope)?)
}

/// Open an envelope, returning the payload and the protocol it belongs to.
pub fn unwrap_data(data: &[u8]) -> Result<(Vec<u8>, ProtocolId)> {
    let envelope: Envelope = serde_bencode::from_bytes(data)?;

    Ok((envelope.data, ProtocolId::try_from(envelope.protocol)?))
}

#[derive(Debug)]
/// Routes messages between the network side [Pipe] and one [Pipe] per protocol.
///
/// The transport writes into [Muxer::pipe]'s incoming queue and reads from its
/// outgoing queue; protocols do the opposite with their own pipes.
///
/// While stopped, messages protocols send are dropped, so senders never block
/// on a muxer nobody drives.
pub struct Muxer {
    protocols: ProtocolMap,
    pipe: Pipe,
    session: Option<Session>,
}

#[derive(Debug)]
/// Threads of one [Muxer::start].
struct Session {
    /// Stops forwarding, outbound threads then discard until retired.
    cancel: CancelHandle,
    /// Stops the outbound threads altogether.
    retire: CancelHandle,
    incoming: Option<JoinHandle<()>>,
    outgoing: Vec<JoinHandle<()>>,
}

impl Session {
    fn stop(&mut self) {
        self.cancel.cancel();

        if let Some(handle) = self.incoming.take() {
            let _ = handle.join();
        }
    }

    fn retire(mut self) {
        self.stop();
        self.retire.cancel();

        for handle in self.outgoing.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Muxer {
    pub fn new(protocols: ProtocolMap) -> Self {
        Self::with_capacity(protocols, DEFAULT_PIPE_CAPACITY)
    }

    pub fn with_capacity(protocols: ProtocolMap, capacity: usize) -> Self {
        Muxer {
            protocols,
            pipe: Pipe::new(capacity),
            session: None,
        }
    }

    // === Getters ===

    /// The network side pipe.
    pub fn pipe(&self) -> &Pipe {
        &self.pipe
    }

    pub fn protocol(&self, pid: ProtocolId) -> Option<&Pipe> {
        self.protocols.get(&pid)
    }

    /// Returns `true` between [Muxer::start] and [Muxer::stop], unless `ctx`
    /// got cancelled in between.
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(|session| {
            !session.cancel.is_cancelled()
                && session
                    .incoming
                    .as_ref()
                    .is_some_and(|handle| !handle.is_finished())
        })
    }

    // === Public Methods ===

    /// Spawn one outbound thread per protocol and one inbound thread.
    ///
    /// They forward messages until `ctx` is cancelled or [Muxer::stop] is
    /// called. Messages queued while the muxer was stopped are discarded.
    pub fn start(&mut self, ctx: &Context) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        if let Some(session) = self.session.take() {
            session.retire();
        }

        for (pid, pipe) in &self.protocols {
            let dropped = pipe.outgoing_rx().drain().count();

            if dropped > 0 {
                trace!(context = "mux", ?pid, dropped, "Discarded messages sent while stopped");
            }
        }

        let (ctx, cancel) = ctx.with_cancel();
        // Not a child of `ctx`, outbound threads outlive its cancellation.
        let (retire_ctx, retire) = Context::background().with_cancel();

        let outgoing = self
            .protocols
            .iter()
            .map(|(pid, pipe)| {
                let ctx = ctx.clone();
                let retire_ctx = retire_ctx.clone();
                let pid = *pid;
                let from = pipe.outgoing_rx().clone();
                let to = self.pipe.outgoing_tx().clone();

                thread::spawn(move || handle_outgoing(ctx, retire_ctx, pid, from, to))
            })
            .collect();

        let from = self.pipe.incoming_rx().clone();
        let routes: HashMap<ProtocolId, Sender<NetMessage>> = self
            .protocols
            .iter()
            .map(|(pid, pipe)| (*pid, pipe.incoming_tx().clone()))
            .collect();

        let incoming = thread::spawn(move || handle_incoming(ctx, from, routes));

        self.session = Some(Session {
            cancel,
            retire,
            incoming: Some(incoming),
            outgoing,
        });

        Ok(())
    }

    /// Stop forwarding and join the inbound thread. Stopping a stopped muxer
    /// is a no-op.
    ///
    /// Messages protocols send from now on are dropped.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.stop();
        }
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.retire();
        }
    }
}

fn handle_outgoing(
    ctx: Context,
    retire: Context,
    pid: ProtocolId,
    from: Receiver<NetMessage>,
    to: Sender<NetMessage>,
) {
    while let Ok(message) = ctx.recv(&from) {
        let (peer, data) = message.into_parts();

        let wrapped = match wrap_data(&data, pid) {
            Ok(wrapped) => wrapped,
            Err(error) => {
                debug!(?error, ?pid, "Failed to wrap outgoing message");
                continue;
            }
        };

        if ctx.send(&to, NetMessage::new(peer, wrapped)).is_err() {
            break;
        }
    }

    while let Ok(message) = retire.recv(&from) {
        trace!(
            context = "mux",
            ?pid,
            peer = %message.peer(),
            "Dropped message sent to a stopped muxer"
        );
    }

    trace!(context = "mux", ?pid, "Outgoing loop stopped");
}

fn handle_incoming(
    ctx: Context,
    from: Receiver<NetMessage>,
    routes: HashMap<ProtocolId, Sender<NetMessage>>,
) {
    while let Ok(message) = ctx.recv(&from) {
        let (peer, data) = message.into_parts();

        let (payload, pid) = match unwrap_data(&data) {
            Ok(unwrapped) => unwrapped,
            Err(error) => {
                debug!(?error, %peer, "Dropped incoming message");
                continue;
            }
        };

        let Some(to) = routes.get(&pid) else {
            debug!(?pid, %peer, "Dropped message for unregistered protocol");
            continue;
        };

        if ctx.send(to, NetMessage::new(peer, payload)).is_err() {
            break;
        }
    }

    trace!(context = "mux", "Incoming loop stopped");
}
