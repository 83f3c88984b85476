//! The owner of every [Peer] record a node knows about.

use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::{Peer, PeerId, Result};

/// Constructs and owns peers.
///
/// Routing tables only hold handles obtained from here, so a peer's addresses
/// and latency have a single source of truth per node.
pub trait Peerstore: Debug + Send + Sync {
    /// The peer with this id, created on first use.
    fn get(&self, id: &PeerId) -> Result<Peer>;

    /// Insert `peer`, or merge its addresses into the known record.
    ///
    /// Returns the stored handle, which callers should use from then on.
    fn add(&self, peer: Peer) -> Result<Peer>;
}

/// Default number of peers a [MemoryPeerstore] remembers.
pub const DEFAULT_MAX_PEERS: usize = 10_000;

#[derive(Debug)]
/// In-memory [Peerstore], forgetting the least recently used peers past its capacity.
///
/// Every peer record seen on the wire lands here, so the bound keeps a busy
/// node's memory flat. A forgotten peer gets a fresh record on next use.
pub struct MemoryPeerstore {
    peers: Mutex<LruCache<PeerId, Peer>>,
}

impl Default for MemoryPeerstore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPeerstore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_PEERS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MemoryPeerstore {
            peers: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // === Private Methods ===

    fn lock(&self) -> MutexGuard<'_, LruCache<PeerId, Peer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Peerstore for MemoryPeerstore {
    fn get(&self, id: &PeerId) -> Result<Peer> {
        Ok(self
            .lock()
            .get_or_insert(id.clone(), || Peer::new(id.clone()))
            .clone())
    }

    fn add(&self, peer: Peer) -> Result<Peer> {
        let mut peers = self.lock();

        match peers.get(peer.id()) {
            Some(existing) => {
                for address in peer.addresses() {
                    existing.add_address(address);
                }
                Ok(existing.clone())
            }
            None => {
                peers.put(peer.id().clone(), peer.clone());
                Ok(peer)
            }
        }
    }
}
