use bytes::Bytes;

use crate::Peer;

#[derive(Debug, Clone)]
/// Raw bytes exchanged with a peer.
///
/// Outgoing messages carry the destination, incoming ones the sender.
pub struct NetMessage {
    peer: Peer,
    data: Bytes,
}

impl NetMessage {
    pub fn new<T: Into<Bytes>>(peer: Peer, data: T) -> Self {
        NetMessage {
            peer,
            data: data.into(),
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_parts(self) -> (Peer, Bytes) {
        (self.peer, self.data)
    }
}
