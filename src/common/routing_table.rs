//! Kademlia routing table with a splitting catch-all bucket.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::trace;

use crate::common::{Bucket, Id, Peer, PeerId, ID_BITS};

#[derive(Debug)]
/// Kademlia routing table.
///
/// Bucket `i` holds peers sharing exactly `i` leading bits with the local id,
/// except the last bucket, which catches every peer sharing at least as many
/// bits as its index. Only that last bucket ever splits.
///
/// All reads and writes go through one table-wide reader-writer lock.
pub struct RoutingTable {
    local: Id,
    bucket_size: usize,
    max_latency: Duration,
    buckets: RwLock<Vec<Bucket>>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given bucket size, local id, and the
    /// maximum latency a peer may have to be admitted.
    pub fn new(bucket_size: usize, local: Id, max_latency: Duration) -> Self {
        RoutingTable {
            local,
            bucket_size: bucket_size.max(1),
            max_latency,
            buckets: RwLock::new(vec![Bucket::new()]),
        }
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn local_id(&self) -> &Id {
        &self.local
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub fn max_latency(&self) -> Duration {
        self.max_latency
    }

    /// Number of buckets, including the catch-all bucket.
    pub fn bucket_count(&self) -> usize {
        self.read().len()
    }

    /// Occupancy of every bucket, in bucket order.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.read().iter().map(Bucket::len).collect()
    }

    // === Public Methods ===

    /// Add the peer to its bucket, or move it to the front if already there.
    ///
    /// Returns a peer that got evicted to make room, if any. Peers slower
    /// than the latency ceiling and the local node itself are never inserted.
    pub fn update(&self, peer: &Peer) -> Option<Peer> {
        if peer.kad_id() == &self.local {
            return None;
        }

        let mut buckets = self.write();

        let cpl = peer.kad_id().common_prefix_len(&self.local);
        let last = buckets.len() - 1;
        let index = cpl.min(last);

        let bucket = &mut buckets[index];

        if let Some(position) = bucket.find(peer.id()) {
            // Seen again, it is now the most active peer in its bucket.
            bucket.move_to_front(position);
            return None;
        }

        if !bucket.push_front(peer.clone(), self.max_latency) {
            trace!(
                context = "routing_table",
                %peer,
                latency = ?peer.latency(),
                "Rejected peer over the latency ceiling"
            );
            return None;
        }

        if bucket.len() <= self.bucket_size {
            return None;
        }

        if index == last {
            Self::next_bucket(&mut buckets, self.bucket_size, &self.local)
        } else {
            bucket.pop_back()
        }
    }

    /// Exact lookup of a peer by id.
    pub fn find(&self, id: &PeerId) -> Option<Peer> {
        self.nearest_peers(&id.kad_id(), 1)
            .into_iter()
            .next()
            .filter(|peer| peer.id() == id)
    }

    /// The single nearest peer to `target`.
    pub fn nearest_peer(&self, target: &Id) -> Option<Peer> {
        self.nearest_peers(target, 1).into_iter().next()
    }

    /// Up to `count` peers, closest to `target` first.
    ///
    /// Candidates come from `target`'s bucket, or from its two neighbors
    /// when that bucket is empty after an uneven split.
    pub fn nearest_peers(&self, target: &Id, count: usize) -> Vec<Peer> {
        let buckets = self.read();

        let cpl = target.common_prefix_len(&self.local);
        let index = cpl.min(buckets.len() - 1);

        let mut candidates: Vec<(Id, &Peer)> = Vec::new();

        if buckets[index].is_empty() {
            if index > 0 {
                candidates.extend(
                    buckets[index - 1]
                        .iter()
                        .map(|peer| (peer.kad_id().xor(target), peer)),
                );
            }
            if index + 1 < buckets.len() {
                candidates.extend(
                    buckets[index + 1]
                        .iter()
                        .map(|peer| (peer.kad_id().xor(target), peer)),
                );
            }
        } else {
            candidates.extend(
                buckets[index]
                    .iter()
                    .map(|peer| (peer.kad_id().xor(target), peer)),
            );
        }

        // Stable, equidistant peers keep their bucket order.
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        candidates
            .into_iter()
            .take(count)
            .map(|(_, peer)| peer.clone())
            .collect()
    }

    /// Return the number of peers in this routing table.
    pub fn size(&self) -> usize {
        self.read().iter().map(Bucket::len).sum()
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Export an owned list of all peers, bucket by bucket.
    pub fn list_peers(&self) -> Vec<Peer> {
        self.read()
            .iter()
            .flat_map(|bucket| bucket.iter().cloned())
            .collect()
    }

    // === Private Methods ===

    /// Split the catch-all bucket until no bucket is over capacity.
    ///
    /// Returns the peer evicted from the old catch-all bucket if every peer
    /// stayed on its side of the split.
    fn next_bucket(buckets: &mut Vec<Bucket>, bucket_size: usize, local: &Id) -> Option<Peer> {
        loop {
            let last = buckets.len() - 1;

            if buckets.len() >= ID_BITS {
                // Nothing left to split on.
                return buckets[last].pop_back();
            }

            let new_bucket = buckets[last].split(last, local);
            buckets.push(new_bucket);

            trace!(
                context = "routing_table",
                buckets = buckets.len(),
                "Split catch-all bucket"
            );

            if buckets[last + 1].len() > bucket_size {
                // Every peer landed on the new side, split again.
                continue;
            }

            if buckets[last].len() > bucket_size {
                return buckets[last].pop_back();
            }

            return None;
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Bucket>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Bucket>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use rayon::prelude::*;

    use super::*;
    use crate::common::DEFAULT_BUCKET_SIZE;

    const MAX_LATENCY: Duration = Duration::from_secs(1);

    fn table() -> RoutingTable {
        RoutingTable::new(DEFAULT_BUCKET_SIZE, Id::random(), MAX_LATENCY)
    }

    /// A random peer sharing exactly `cpl` leading bits with `local`.
    fn peer_with_cpl(local: &Id, cpl: usize) -> Peer {
        loop {
            let peer = Peer::random();
            if peer.kad_id().common_prefix_len(local) == cpl {
                return peer;
            }
        }
    }

    /// A random peer sharing at least `cpl` leading bits with `local`.
    fn peer_with_min_cpl(local: &Id, cpl: usize) -> Peer {
        loop {
            let peer = Peer::random();
            if peer.kad_id().common_prefix_len(local) >= cpl {
                return peer;
            }
        }
    }

    #[test]
    fn table_is_empty() {
        let table = table();
        assert!(table.is_empty());

        table.update(&Peer::random());
        assert!(!table.is_empty());
    }

    #[test]
    fn find_after_update() {
        let table = table();

        let peers: Vec<Peer> = (0..DEFAULT_BUCKET_SIZE).map(|_| Peer::random()).collect();
        for peer in &peers {
            assert!(table.update(peer).is_none());
        }

        for peer in &peers {
            assert_eq!(table.find(peer.id()).as_ref(), Some(peer));
        }

        assert!(table.find(Peer::random().id()).is_none());
    }

    #[test]
    fn buckets_are_sets() {
        let table = table();

        let peer = Peer::random();
        table.update(&peer);
        table.update(&Peer::new(peer.id().clone()));

        assert_eq!(table.size(), 1);
    }

    #[test]
    fn should_not_add_self() {
        let local = Peer::random();
        let table = RoutingTable::new(DEFAULT_BUCKET_SIZE, *local.kad_id(), MAX_LATENCY);

        assert!(table.update(&local).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn rejects_slow_peers() {
        let table = table();

        let slow = Peer::random().with_latency(Duration::from_millis(1500));
        let fast = Peer::random().with_latency(Duration::from_millis(500));

        assert!(table.update(&slow).is_none());
        table.update(&fast);

        assert!(table.find(slow.id()).is_none());
        assert!(table.find(fast.id()).is_some());
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn single_split_preserves_peers() {
        let table = table();
        let local = *table.local_id();

        // 12 peers stay in bucket 0 after the split, 13 move to bucket 1.
        let mut peers: Vec<Peer> = (0..12).map(|_| peer_with_cpl(&local, 0)).collect();
        peers.extend((0..13).map(|_| peer_with_min_cpl(&local, 1)));

        for peer in &peers {
            assert!(table.update(peer).is_none());
        }

        assert_eq!(table.bucket_count(), 2);
        assert_eq!(table.bucket_sizes(), vec![12, 13]);
        assert_eq!(table.size(), 25);

        for peer in &peers {
            assert!(table.find(peer.id()).is_some());
        }
    }

    #[test]
    fn degenerate_split_recurses() {
        let table = table();
        let local = *table.local_id();

        // All share at least 2 bits, so splitting at 0 leaves bucket 0 empty.
        for _ in 0..(DEFAULT_BUCKET_SIZE + 1) {
            table.update(&peer_with_min_cpl(&local, 2));
        }

        assert!(table.bucket_count() >= 3);
        assert!(table
            .bucket_sizes()
            .iter()
            .all(|size| *size <= DEFAULT_BUCKET_SIZE));
        assert_eq!(table.size(), DEFAULT_BUCKET_SIZE + 1);
    }

    #[test]
    fn evicts_least_recently_seen_from_full_bucket() {
        let table = table();
        let local = *table.local_id();

        // Force a split so that bucket 0 is no longer the catch-all.
        for _ in 0..(DEFAULT_BUCKET_SIZE + 1) {
            table.update(&peer_with_min_cpl(&local, 1));
        }
        assert!(table.bucket_count() >= 2);

        let bucket_zero: Vec<Peer> = (0..DEFAULT_BUCKET_SIZE)
            .map(|_| peer_with_cpl(&local, 0))
            .collect();
        for peer in &bucket_zero {
            assert!(table.update(peer).is_none());
        }

        // Touch the oldest so the second oldest becomes the eviction candidate.
        table.update(&bucket_zero[0]);

        let newcomer = peer_with_cpl(&local, 0);
        let evicted = table.update(&newcomer);

        assert_eq!(evicted, Some(bucket_zero[1].clone()));
        assert!(table.find(newcomer.id()).is_some());
        assert!(table.find(bucket_zero[1].id()).is_none());
        assert!(table.find(bucket_zero[0].id()).is_some());
    }

    #[test]
    fn nearest_peers_sorted_by_distance() {
        let table = table();

        for _ in 0..200 {
            table.update(&Peer::random());
        }

        for _ in 0..20 {
            let target = Id::random();
            let nearest = table.nearest_peers(&target, 10);

            assert!(nearest.len() <= 10);
            assert!(nearest.len() <= table.size());

            for pair in nearest.windows(2) {
                assert!(pair[0].kad_id().xor(&target) <= pair[1].kad_id().xor(&target));
            }
        }
    }

    #[test]
    fn nearest_peers_falls_back_to_neighbors() {
        let table = table();
        let local = *table.local_id();

        // Every peer shares >= 2 bits, buckets 0 and 1 end up empty.
        for _ in 0..(DEFAULT_BUCKET_SIZE + 1) {
            table.update(&peer_with_min_cpl(&local, 2));
        }

        // A target with cpl 1 lands on the empty bucket 1,
        // so candidates come from buckets 0 and 2.
        let target = peer_with_cpl(&local, 1);
        let nearest = table.nearest_peers(target.kad_id(), 5);

        assert!(!nearest.is_empty());
    }

    #[test]
    fn concurrent_updates() {
        let table = Arc::new(table());

        (0..2000).into_par_iter().for_each(|_| {
            table.update(&Peer::random());
            table.nearest_peers(&Id::random(), 5);
        });

        assert!(table
            .bucket_sizes()
            .iter()
            .all(|size| *size <= DEFAULT_BUCKET_SIZE));
        assert_eq!(table.size(), table.list_peers().len());
    }
}
