//! Content routing on top of single hop requests: publish and resolve
//! values, providers and peers.

use std::sync::{Mutex, PoisonError};
use std::thread;

use bytes::Bytes;
use tracing::debug;

use super::{query::QueryStep, Dht, ValueOrPeers};
use crate::{Context, Key, Peer, PeerId, Result};

impl Dht {
    /// Store `value` locally and at the `k_value` nearest peers of every
    /// routing table.
    ///
    /// Failures to reach individual peers are logged, not returned.
    pub fn put_value(&self, ctx: &Context, key: Key, value: Bytes) -> Result<()> {
        self.put_local(key.clone(), value.clone())?;

        let target = key.id();
        let mut peers: Vec<Peer> = Vec::new();

        for table in self.routing_tables() {
            for peer in table.nearest_peers(&target, self.config().k_value) {
                if !peers.contains(&peer) {
                    peers.push(peer);
                }
            }
        }

        self.for_each_peer(&peers, |peer| {
            self.put_value_to_network(ctx, peer, &key, &value)
        });

        Ok(())
    }

    /// Find the value stored under `key`, locally first, then with an
    /// iterative GET_VALUE lookup.
    ///
    /// Returns `Ok(None)` if the lookup ran out of peers to ask.
    pub fn get_value(&self, ctx: &Context, key: &Key) -> Result<Option<Bytes>> {
        if let Some(value) = self.get_local(key)? {
            return Ok(Some(value));
        }

        let target = key.id();
        let seeds = self.table(0).nearest_peers(&target, self.config().k_value);

        if seeds.is_empty() {
            debug!(%key, "No peers to get value from");
            return Ok(None);
        }

        self.run_query(ctx, target, seeds, |ctx, peer| {
            Ok(match self.get_value_or_peers(ctx, peer, key, 0)? {
                ValueOrPeers::Value(value) => QueryStep::Done(value),
                ValueOrPeers::CloserPeers(peers) => QueryStep::Continue(peers),
                ValueOrPeers::NotFound => QueryStep::Continue(Vec::new()),
            })
        })
    }

    /// Announce this node as a provider of `key`, locally and to the
    /// `k_value` nearest peers.
    pub fn provide(&self, ctx: &Context, key: &Key) -> Result<()> {
        self.providers()
            .add_provider(key.clone(), self.local_peer().clone());

        let peers = self.table(0).nearest_peers(&key.id(), self.config().k_value);

        if peers.is_empty() {
            debug!(%key, "No peers to provide to");
        }

        self.for_each_peer(&peers, |peer| self.put_provider(ctx, peer, key));

        Ok(())
    }

    /// Find up to `count` providers of `key`, starting with the local records.
    pub fn find_providers(&self, ctx: &Context, key: &Key, count: usize) -> Result<Vec<Peer>> {
        let mut local = self.providers().get_providers(key);

        if local.len() >= count {
            local.truncate(count);
            return Ok(local);
        }

        let found = Mutex::new(local);
        let target = key.id();
        let seeds = self.table(0).nearest_peers(&target, self.config().k_value);

        self.run_query(ctx, target, seeds, |ctx, peer| {
            let response = self.find_providers_single(ctx, peer, key, 0)?;
            let providers = self.add_providers(key, &response.provider_peers);

            {
                let mut found = found.lock().unwrap_or_else(PoisonError::into_inner);

                for provider in providers {
                    if !found.contains(&provider) {
                        found.push(provider);
                    }
                }

                if found.len() >= count {
                    return Ok(QueryStep::Done(()));
                }
            }

            Ok(QueryStep::Continue(
                self.peers_from_infos(&response.closer_peers),
            ))
        })?;

        let mut found = found.into_inner().unwrap_or_else(PoisonError::into_inner);
        found.truncate(count);

        Ok(found)
    }

    /// Find a peer by id, in the routing tables first, then with an iterative
    /// FIND_NODE lookup.
    pub fn find_peer(&self, ctx: &Context, id: &PeerId) -> Result<Option<Peer>> {
        if id == self.local_peer().id() {
            return Ok(Some(self.local_peer().clone()));
        }

        if let Some((peer, _)) = self.find_local(id) {
            return Ok(Some(peer));
        }

        let target = id.kad_id();
        let seeds = self.table(0).nearest_peers(&target, self.config().k_value);

        self.run_query(ctx, target, seeds, |ctx, peer| {
            let response = self.find_peer_single(ctx, peer, id, 0)?;

            if let Some(info) = response.closer_peers.iter().find(|info| &info.id == id) {
                return Ok(QueryStep::Done(self.peer_from_info(info)?));
            }

            Ok(QueryStep::Continue(
                self.peers_from_infos(&response.closer_peers),
            ))
        })
    }

    /// Fill the routing tables by looking up a random peer id.
    pub fn bootstrap(&self, ctx: &Context) {
        let id = PeerId::random();

        match self.find_peer(ctx, &id) {
            Ok(_) => debug!(size = self.size(), "Bootstrap done"),
            Err(error) => debug!(?error, "Bootstrap peer error"),
        }
    }

    // === Private Methods ===

    /// Run `request` against every peer concurrently, logging failures.
    fn for_each_peer<F>(&self, peers: &[Peer], request: F)
    where
        F: Fn(&Peer) -> Result<()> + Sync,
    {
        thread::scope(|scope| {
            for peer in peers {
                let request = &request;

                scope.spawn(move || {
                    if let Err(error) = request(peer) {
                        debug!(?error, %peer, "Request failed");
                    }
                });
            }
        });
    }
}
