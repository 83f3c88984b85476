use flume::{Receiver, Sender};

use super::NetMessage;

#[derive(Debug, Clone)]
/// A pair of bounded queues: `incoming` towards the protocol, `outgoing`
/// towards the network.
///
/// Clones share the same queues.
pub struct Pipe {
    incoming: (Sender<NetMessage>, Receiver<NetMessage>),
    outgoing: (Sender<NetMessage>, Receiver<NetMessage>),
}

impl Pipe {
    pub fn new(capacity: usize) -> Self {
        Pipe {
            incoming: flume::bounded(capacity),
            outgoing: flume::bounded(capacity),
        }
    }

    pub fn incoming_tx(&self) -> &Sender<NetMessage> {
        &self.incoming.0
    }

    pub fn incoming_rx(&self) -> &Receiver<NetMessage> {
        &self.incoming.1
    }

    pub fn outgoing_tx(&self) -> &Sender<NetMessage> {
        &self.outgoing.0
    }

    pub fn outgoing_rx(&self) -> &Receiver<NetMessage> {
        &self.outgoing.1
    }
}
