//! Manage provider records: which peers hold the content of a key.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::{Key, Peer, PeerId};

#[derive(Debug, Clone)]
struct ProviderRecord {
    peer: Peer,
    created_at: Instant,
}

#[derive(Debug)]
struct Inner {
    providers: LruCache<Key, LruCache<PeerId, ProviderRecord>>,
    local_keys: HashSet<Key>,
}

#[derive(Debug)]
/// An LRU cache of providers per key, with records expiring after a TTL.
///
/// Keys this node provides itself are also tracked separately, see
/// [ProviderManager::get_local].
pub struct ProviderManager {
    local: PeerId,
    ttl: Duration,
    max_providers_per_key: NonZeroUsize,
    inner: Mutex<Inner>,
}

impl ProviderManager {
    pub fn new(
        local: PeerId,
        ttl: Duration,
        max_keys: usize,
        max_providers_per_key: usize,
    ) -> Self {
        ProviderManager {
            local,
            ttl,
            max_providers_per_key: non_zero(max_providers_per_key),
            inner: Mutex::new(Inner {
                providers: LruCache::new(non_zero(max_keys)),
                local_keys: HashSet::new(),
            }),
        }
    }

    // === Public Methods ===

    /// Record `peer` as a provider of `key`, refreshing its timestamp if known.
    pub fn add_provider(&self, key: Key, peer: Peer) {
        let mut inner = self.lock();

        if peer.id() == &self.local {
            inner.local_keys.insert(key.clone());
        }

        let record = ProviderRecord {
            peer: peer.clone(),
            created_at: Instant::now(),
        };

        if let Some(providers) = inner.providers.get_mut(&key) {
            providers.put(peer.id().clone(), record);
        } else {
            let mut providers = LruCache::new(self.max_providers_per_key);
            providers.put(peer.id().clone(), record);
            inner.providers.put(key, providers);
        }
    }

    /// Unexpired providers of `key`, most recently added first.
    pub fn get_providers(&self, key: &Key) -> Vec<Peer> {
        let mut inner = self.lock();

        let Some(providers) = inner.providers.get_mut(key) else {
            return Vec::new();
        };

        let expired: Vec<PeerId> = providers
            .iter()
            .filter(|(_, record)| record.created_at.elapsed() > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            providers.pop(id);
        }

        let peers = providers
            .iter()
            .map(|(_, record)| record.peer.clone())
            .collect();

        if providers.is_empty() {
            inner.providers.pop(key);
        }

        peers
    }

    /// Keys this node provides itself.
    pub fn get_local(&self) -> Vec<Key> {
        self.lock().local_keys.iter().cloned().collect()
    }

    /// Drop every expired record and the keys left without providers.
    ///
    /// Returns the number of records removed.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.lock();
        let mut removed = 0;
        let mut empty_keys = Vec::new();

        for (key, providers) in inner.providers.iter_mut() {
            let expired: Vec<PeerId> = providers
                .iter()
                .filter(|(_, record)| record.created_at.elapsed() > self.ttl)
                .map(|(id, _)| id.clone())
                .collect();

            for id in &expired {
                providers.pop(id);
            }

            removed += expired.len();

            if providers.is_empty() {
                empty_keys.push(key.clone());
            }
        }

        for key in &empty_keys {
            inner.providers.pop(key);
        }

        removed
    }

    /// Number of keys with at least one provider record.
    pub fn len(&self) -> usize {
        self.lock().providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // === Private Methods ===

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn non_zero(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
}
