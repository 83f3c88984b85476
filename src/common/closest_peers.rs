use crate::common::{Id, Peer};

#[derive(Debug, Clone)]
/// Peers sorted by XOR distance to a target, without duplicates.
pub struct ClosestPeers {
    target: Id,
    peers: Vec<Peer>,
}

impl ClosestPeers {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            peers: Vec::with_capacity(64),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    // === Public Methods ===

    /// Insert a peer at its sorted position, returns `false` if it was already present.
    pub fn add(&mut self, peer: Peer) -> bool {
        if self.peers.iter().any(|p| p.id() == peer.id()) {
            return false;
        }

        let seek = peer.kad_id().xor(&self.target);

        let position = self
            .peers
            .partition_point(|peer| peer.kad_id().xor(&self.target) <= seek);

        self.peers.insert(position, peer);

        true
    }

    /// Remove and return the closest peer.
    pub fn pop_closest(&mut self) -> Option<Peer> {
        if self.peers.is_empty() {
            None
        } else {
            Some(self.peers.remove(0))
        }
    }

    pub fn into_vec(self) -> Vec<Peer> {
        self.peers
    }
}
