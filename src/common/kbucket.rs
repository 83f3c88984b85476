//! K-bucket: recency ordered peers within one distance range.

use std::collections::VecDeque;
use std::time::Duration;

use crate::common::{Id, Peer, PeerId};

/// K = the default maximum size of a k-bucket.
pub const DEFAULT_BUCKET_SIZE: usize = 20;

/// Kbuckets keep the most recently seen peers at the front, so the least
/// recently seen peer is always the one evicted from the back.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    peers: VecDeque<Peer>,
}

impl Bucket {
    pub fn new() -> Self {
        Bucket {
            peers: VecDeque::with_capacity(DEFAULT_BUCKET_SIZE),
        }
    }

    // === Getters ===

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    /// Peer at `index`, where 0 is the most recently seen.
    pub fn get(&self, index: usize) -> Option<&Peer> {
        self.peers.get(index)
    }

    // === Public Methods ===

    /// Position of the peer with this id, if present.
    pub fn find(&self, id: &PeerId) -> Option<usize> {
        self.peers.iter().position(|peer| peer.id() == id)
    }

    /// Insert `peer` as the most recently seen.
    ///
    /// Returns `false`, leaving the bucket untouched, if the peer's measured
    /// latency exceeds `max_latency`.
    pub fn push_front(&mut self, peer: Peer, max_latency: Duration) -> bool {
        if peer.latency() > max_latency {
            return false;
        }

        self.peers.push_front(peer);
        true
    }

    /// Move the peer at `index` to the front.
    pub fn move_to_front(&mut self, index: usize) {
        if let Some(peer) = self.peers.remove(index) {
            self.peers.push_front(peer);
        }
    }

    /// Remove and return the least recently seen peer.
    pub fn pop_back(&mut self) -> Option<Peer> {
        self.peers.pop_back()
    }

    /// Split this bucket: peers sharing more than `cpl` leading bits with
    /// `local` move into the returned bucket, the rest stay, keeping their order.
    pub fn split(&mut self, cpl: usize, local: &Id) -> Bucket {
        let (farther, closer): (VecDeque<Peer>, VecDeque<Peer>) = self
            .peers
            .drain(..)
            .partition(|peer| peer.kad_id().common_prefix_len(local) <= cpl);

        self.peers = farther;

        Bucket { peers: closer }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MAX_LATENCY: Duration = Duration::from_secs(1);

    #[test]
    fn push_front_is_most_recent() {
        let mut bucket = Bucket::new();

        let first = Peer::random();
        let second = Peer::random();

        assert!(bucket.push_front(first.clone(), MAX_LATENCY));
        assert!(bucket.push_front(second.clone(), MAX_LATENCY));

        assert_eq!(bucket.find(second.id()), Some(0));
        assert_eq!(bucket.find(first.id()), Some(1));
        assert_eq!(bucket.find(Peer::random().id()), None);
    }

    #[test]
    fn rejects_slow_peers() {
        let mut bucket = Bucket::new();

        let slow = Peer::random().with_latency(Duration::from_secs(2));

        assert!(!bucket.push_front(slow.clone(), MAX_LATENCY));
        assert!(bucket.is_empty());
    }

    #[test]
    fn move_to_front_and_pop_back() {
        let mut bucket = Bucket::new();

        let peers: Vec<Peer> = (0..3).map(|_| Peer::random()).collect();
        for peer in &peers {
            bucket.push_front(peer.clone(), MAX_LATENCY);
        }

        // peers[0] is the least recently seen; touch it.
        let index = bucket.find(peers[0].id()).unwrap();
        bucket.move_to_front(index);

        assert_eq!(bucket.get(0), Some(&peers[0]));
        assert_eq!(bucket.len(), 3);

        assert_eq!(bucket.pop_back(), Some(peers[1].clone()));
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn split_by_common_prefix_len() {
        let local = Id::random();
        let mut bucket = Bucket::new();

        for _ in 0..50 {
            bucket.push_front(Peer::random(), MAX_LATENCY);
        }

        let new_bucket = bucket.split(0, &local);

        assert_eq!(bucket.len() + new_bucket.len(), 50);
        assert!(bucket
            .iter()
            .all(|peer| peer.kad_id().common_prefix_len(&local) == 0));
        assert!(new_bucket
            .iter()
            .all(|peer| peer.kad_id().common_prefix_len(&local) > 0));
    }
}
