//! Single hop requests to one peer.

use bytes::Bytes;
use tracing::debug;

use super::{ping_message, Dht, ValueOrPeers};
use crate::{Context, Error, Key, Message, MessageType, Peer, PeerId, PeerInfo, Result};

impl Dht {
    pub fn ping(&self, ctx: &Context, peer: &Peer) -> Result<()> {
        self.send_request(ctx, peer, &ping_message())?;

        Ok(())
    }

    /// Store `value` at `peer`, failing unless the peer echoes it back.
    pub fn put_value_to_network(
        &self,
        ctx: &Context,
        peer: &Peer,
        key: &Key,
        value: &Bytes,
    ) -> Result<()> {
        let request =
            Message::new(MessageType::PutValue, key.clone(), 0).with_value(value.clone());

        let response = self.send_request(ctx, peer, &request)?;

        if response.value.as_ref() != Some(value) {
            return Err(Error::NotStored(peer.to_string()));
        }

        Ok(())
    }

    /// Announce this node as a provider of `key` to `peer`.
    pub fn put_provider(&self, ctx: &Context, peer: &Peer, key: &Key) -> Result<()> {
        let request = Message::new(MessageType::AddProvider, key.clone(), 0)
            .with_provider_peers(&[self.local_peer().clone()]);

        let response = self.send_request(ctx, peer, &request)?;

        debug!(to = %peer, %key, "Put provider");

        if &response.key != key {
            return Err(Error::NotStored(peer.to_string()));
        }

        Ok(())
    }

    pub fn get_value_single(
        &self,
        ctx: &Context,
        peer: &Peer,
        key: &Key,
        level: u32,
    ) -> Result<Message> {
        self.send_request(ctx, peer, &Message::new(MessageType::GetValue, key.clone(), level))
    }

    /// One GET_VALUE hop.
    ///
    /// If `peer` points at providers, they are asked for the value in turn.
    /// Not finding anything is [ValueOrPeers::NotFound], not an error.
    pub fn get_value_or_peers(
        &self,
        ctx: &Context,
        peer: &Peer,
        key: &Key,
        level: u32,
    ) -> Result<ValueOrPeers> {
        let response = self.get_value_single(ctx, peer, key, level)?;

        if let Some(value) = response.value {
            return Ok(ValueOrPeers::Value(value));
        }

        if !response.provider_peers.is_empty() {
            if let Some(value) =
                self.get_from_peer_list(ctx, key, &response.provider_peers, level)?
            {
                return Ok(ValueOrPeers::Value(value));
            }
        }

        let peers = self.peers_from_infos(&response.closer_peers);

        if !peers.is_empty() {
            return Ok(ValueOrPeers::CloserPeers(peers));
        }

        debug!(from = %peer, %key, "Value not found");

        Ok(ValueOrPeers::NotFound)
    }

    /// Ask each peer in turn for the value, stopping at the first that has it.
    ///
    /// That peer is recorded as a provider of `key`.
    pub fn get_from_peer_list(
        &self,
        ctx: &Context,
        key: &Key,
        peers: &[PeerInfo],
        level: u32,
    ) -> Result<Option<Bytes>> {
        for info in peers {
            ctx.check()?;

            let peer = match self.ensure_connected_to_peer(info) {
                Ok(peer) => peer,
                Err(error) => {
                    debug!(?error, "Get from peers error");
                    continue;
                }
            };

            let response = match self.get_value_single(ctx, &peer, key, level) {
                Ok(response) => response,
                Err(error) => {
                    debug!(?error, %peer, "Get from peers error");
                    continue;
                }
            };

            if let Some(value) = response.value {
                self.providers().add_provider(key.clone(), peer);
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    pub fn find_peer_single(
        &self,
        ctx: &Context,
        peer: &Peer,
        id: &PeerId,
        level: u32,
    ) -> Result<Message> {
        let key = Key::from(id.as_bytes().clone());

        self.send_request(ctx, peer, &Message::new(MessageType::FindNode, key, level))
    }

    pub fn find_providers_single(
        &self,
        ctx: &Context,
        peer: &Peer,
        key: &Key,
        level: u32,
    ) -> Result<Message> {
        self.send_request(
            ctx,
            peer,
            &Message::new(MessageType::GetProviders, key.clone(), level),
        )
    }

    /// Record the given peers as providers of `key`, never this node itself.
    ///
    /// Returns the peers that were added.
    pub fn add_providers(&self, key: &Key, infos: &[PeerInfo]) -> Vec<Peer> {
        let mut added = Vec::with_capacity(infos.len());

        for info in infos {
            let peer = match self.peer_from_info(info) {
                Ok(peer) => peer,
                Err(error) => {
                    debug!(?error, "Error getting peer from info");
                    continue;
                }
            };

            debug!(local = %self.local_peer(), provider = %peer, %key, "Adding provider");

            self.providers().add_provider(key.clone(), peer.clone());
            added.push(peer);
        }

        added
    }

    /// Resolve a peer through the peerstore.
    pub fn get_peer(&self, id: &PeerId) -> Result<Peer> {
        self.peerstore().get(id).map_err(|error| {
            debug!(?error, %id, "Failed to get peer from peerstore");
            error
        })
    }

    /// Resolve a wire peer record into a peerstore handle, learning its addresses.
    ///
    /// Records pointing at this node are rejected with [Error::FoundSelf].
    pub fn peer_from_info(&self, info: &PeerInfo) -> Result<Peer> {
        if &info.id == self.local_peer().id() {
            return Err(Error::FoundSelf);
        }

        let peer = self.get_peer(&info.id)?;

        for address in &info.addresses {
            peer.add_address(*address);
        }

        Ok(peer)
    }

    /// [Dht::peer_from_info], then dial the peer.
    pub fn ensure_connected_to_peer(&self, info: &PeerInfo) -> Result<Peer> {
        let peer = self.peer_from_info(info)?;

        self.0.dialer.dial_peer(&peer)?;

        Ok(peer)
    }

    // === Private Methods ===

    /// Resolve every record that can be resolved, logging the rest.
    pub(crate) fn peers_from_infos(&self, infos: &[PeerInfo]) -> Vec<Peer> {
        infos
            .iter()
            .filter_map(|info| match self.peer_from_info(info) {
                Ok(peer) => Some(peer),
                Err(error) => {
                    debug!(?error, peer = %info.id, "Skipped peer record");
                    None
                }
            })
            .collect()
    }
}
