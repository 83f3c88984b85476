//! Answer incoming DHT requests.

use tracing::{debug, error, trace};

use super::Dht;
use crate::net::NetMessage;
use crate::{Context, Error, Key, Message, MessageType, Peer, PeerId, Result};

impl Dht {
    /// Entry point for requests from the network.
    ///
    /// Every message that decodes refreshes its sender in the routing tables.
    /// Malformed or failing requests get no response, which the remote end
    /// observes as a timeout.
    pub fn handle_message(&self, ctx: &Context, message: NetMessage) -> Option<NetMessage> {
        if ctx.is_cancelled() {
            return None;
        }

        let (sender, data) = message.into_parts();

        if data.is_empty() {
            debug!(%sender, "Message contained no data");
            return None;
        }

        let request = match Message::from_bytes(&data) {
            Ok(request) => request,
            Err(error) => {
                debug!(?error, %sender, "Failed to decode message");
                return None;
            }
        };

        self.update(&sender);

        trace!(
            context = "dht",
            local = %self.local_peer(),
            from = %sender,
            message_type = %request.message_type,
            "Got message"
        );

        let response = match request.message_type {
            MessageType::Ping => Ok(request),
            MessageType::FindNode => self.handle_find_node(request),
            MessageType::GetValue => self.handle_get_value(request),
            MessageType::PutValue => self.handle_put_value(request),
            MessageType::GetProviders => self.handle_get_providers(request),
            MessageType::AddProvider => self.handle_add_provider(&sender, request),
        };

        match response.and_then(|response| response.to_bytes()) {
            Ok(bytes) => Some(NetMessage::new(sender, bytes)),
            Err(error) => {
                debug!(?error, %sender, "Handle message error");
                None
            }
        }
    }

    /// The routing table's nearest peers to the request's key, from the table
    /// its cluster level selects.
    pub fn nearest_peers_to_query(&self, request: &Message, count: usize) -> Vec<Peer> {
        self.table(request.cluster_level)
            .nearest_peers(&request.key.id(), count)
    }

    /// [Dht::nearest_peers_to_query], keeping only peers strictly closer to
    /// the key than this node, so lookups always make progress.
    pub fn better_peers_to_query(&self, request: &Message, count: usize) -> Vec<Peer> {
        let closer = self.nearest_peers_to_query(request, count);

        self.closer_than_self(&request.key, closer)
    }

    // === Private Methods ===

    /// The candidates strictly closer to `key` than this node.
    ///
    /// Routing tables never hold the local peer, so finding it among the
    /// candidates means the table is corrupt, and nothing is returned.
    fn closer_than_self(&self, key: &Key, candidates: Vec<Peer>) -> Vec<Peer> {
        if candidates
            .iter()
            .any(|peer| peer.id() == self.local_peer().id())
        {
            error!(
                context = "invariant_violation",
                %key,
                "Routing table returned self as a closer peer"
            );
            return Vec::new();
        }

        let target = key.id();
        let local = self.local_peer().kad_id();

        candidates
            .into_iter()
            .filter(|peer| target.closer(peer.kad_id(), local))
            .collect()
    }

    fn handle_find_node(&self, request: Message) -> Result<Message> {
        let target = PeerId::new(request.key.as_bytes().clone());

        let closer = if &target == self.local_peer().id() {
            vec![self.local_peer().clone()]
        } else if let Some((peer, _)) = self.find_local(&target) {
            vec![peer]
        } else {
            self.better_peers_to_query(&request, self.config().closer_peer_count)
        };

        Ok(
            Message::new(MessageType::FindNode, request.key, request.cluster_level)
                .with_closer_peers(&closer),
        )
    }

    /// Exactly one of value, providers or closer peers, in that order.
    fn handle_get_value(&self, request: Message) -> Result<Message> {
        if request.key.is_empty() {
            return Err(Error::Static("GET_VALUE request without a key"));
        }

        let response = Message::new(
            MessageType::GetValue,
            request.key.clone(),
            request.cluster_level,
        );

        if let Some(value) = self.get_local(&request.key)? {
            return Ok(response.with_value(value));
        }

        let providers = self.providers().get_providers(&request.key);
        if !providers.is_empty() {
            return Ok(response.with_provider_peers(&providers));
        }

        let closer = self.better_peers_to_query(&request, self.config().closer_peer_count);

        Ok(response.with_closer_peers(&closer))
    }

    /// Store unconditionally and echo the request back.
    fn handle_put_value(&self, request: Message) -> Result<Message> {
        self.put_local(
            request.key.clone(),
            request.value.clone().unwrap_or_default(),
        )?;

        Ok(request)
    }

    /// Known providers, including this node if it holds the value, plus closer peers.
    fn handle_get_providers(&self, request: Message) -> Result<Message> {
        let mut providers = self.providers().get_providers(&request.key);

        let local = self.local_peer();
        if self.get_local(&request.key)?.is_some() && !providers.contains(local) {
            providers.insert(0, local.clone());
        }

        let closer = self.better_peers_to_query(&request, self.config().closer_peer_count);

        Ok(
            Message::new(MessageType::GetProviders, request.key, request.cluster_level)
                .with_provider_peers(&providers)
                .with_closer_peers(&closer),
        )
    }

    /// Register the listed providers, or the sender when none are listed.
    fn handle_add_provider(&self, sender: &Peer, request: Message) -> Result<Message> {
        if request.provider_peers.is_empty() {
            self.providers()
                .add_provider(request.key.clone(), sender.clone());
        }

        for info in &request.provider_peers {
            if &info.id == sender.id() {
                for address in &info.addresses {
                    sender.add_address(*address);
                }
                self.providers()
                    .add_provider(request.key.clone(), sender.clone());
                continue;
            }

            match self.peer_from_info(info) {
                Ok(peer) => self.providers().add_provider(request.key.clone(), peer),
                Err(error) => debug!(?error, provider = %info.id, "Ignored provider"),
            }
        }

        Ok(request)
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::dht::ping_message;
    use crate::net::{Dialer, RequestSender};
    use crate::PeerInfo;

    struct Offline;

    impl Dialer for Offline {
        fn dial_peer(&self, peer: &Peer) -> Result<()> {
            Err(Error::Dial {
                peer: peer.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    impl RequestSender for Offline {
        fn send_request(&self, _ctx: &Context, _message: NetMessage) -> Result<NetMessage> {
            Err(Error::Timeout)
        }
    }

    fn dht() -> Dht {
        let transport = Arc::new(Offline);
        Dht::builder(
            Peer::random().with_address(SocketAddr::from(([127, 0, 0, 1], 4000))),
            transport.clone(),
            transport,
        )
        .build()
        .unwrap()
    }

    fn request(dht: &Dht, from: &Peer, message: Message) -> Option<Message> {
        dht.handle_message(
            &Context::background(),
            NetMessage::new(from.clone(), message.to_bytes().unwrap()),
        )
        .map(|response| Message::from_bytes(response.data()).unwrap())
    }

    #[test]
    fn every_valid_message_updates_the_sender() {
        let dht = dht();
        let sender = Peer::random();

        let response = request(&dht, &sender, ping_message()).unwrap();

        assert_eq!(response.message_type, MessageType::Ping);
        assert_eq!(dht.find_local(sender.id()).map(|(peer, _)| peer), Some(sender));
    }

    #[test]
    fn malformed_messages_get_no_response() {
        let dht = dht();
        let sender = Peer::random();

        let ctx = Context::background();
        assert!(dht
            .handle_message(&ctx, NetMessage::new(sender.clone(), Vec::new()))
            .is_none());
        assert!(dht
            .handle_message(&ctx, NetMessage::new(sender.clone(), b"garbage".to_vec()))
            .is_none());

        assert!(dht.find_local(sender.id()).is_none());
    }

    #[test]
    fn put_then_get_value() {
        let dht = dht();
        let sender = Peer::random();
        let key = Key::from("foo");

        let put = Message::new(MessageType::PutValue, key.clone(), 0)
            .with_value(Bytes::from_static(b"bar"));
        assert_eq!(request(&dht, &sender, put.clone()), Some(put));

        let response = request(
            &dht,
            &sender,
            Message::new(MessageType::GetValue, key, 0),
        )
        .unwrap();

        assert_eq!(response.value, Some(Bytes::from_static(b"bar")));
        assert!(response.provider_peers.is_empty());
        assert!(response.closer_peers.is_empty());

        let other = request(
            &dht,
            &sender,
            Message::new(MessageType::GetValue, Key::from("baz"), 0),
        )
        .unwrap();

        assert_eq!(other.value, None);
    }

    #[test]
    fn get_value_prefers_providers_over_closer_peers() {
        let dht = dht();
        let key = Key::from("foo");

        for _ in 0..10 {
            dht.update(&Peer::random());
        }

        let provider = Peer::random();
        dht.providers().add_provider(key.clone(), provider.clone());

        let response = request(
            &dht,
            &Peer::random(),
            Message::new(MessageType::GetValue, key, 0),
        )
        .unwrap();

        assert_eq!(response.value, None);
        assert_eq!(response.provider_peers, vec![PeerInfo::from(&provider)]);
        assert!(response.closer_peers.is_empty());
    }

    #[test]
    fn get_value_without_key_is_rejected() {
        let dht = dht();

        assert!(request(
            &dht,
            &Peer::random(),
            Message::new(MessageType::GetValue, Key::from(""), 0),
        )
        .is_none());
    }

    #[test]
    fn closer_peers_are_closer_than_self() {
        let dht = dht();

        for _ in 0..100 {
            dht.update(&Peer::random());
        }

        let key = Key::from("foo");
        let target = key.id();
        let local = *dht.local_peer().kad_id();

        let response = request(
            &dht,
            &Peer::random(),
            Message::new(MessageType::GetValue, key, 0),
        )
        .unwrap();

        assert!(response.closer_peers.len() <= dht.config().closer_peer_count);
        for info in &response.closer_peers {
            assert_ne!(&info.id, dht.local_peer().id());
            assert!(target.closer(&info.id.kad_id(), &local));
        }
    }

    #[test]
    fn self_among_closer_peers_yields_nothing() {
        let dht = dht();
        let key = Key::from("foo");

        let candidates = (0..20).map(|_| Peer::random()).collect::<Vec<_>>();

        let closer = dht.closer_than_self(&key, candidates.clone());
        assert!(closer.len() <= candidates.len());

        let mut corrupt = candidates;
        corrupt.push(dht.local_peer().clone());

        assert!(dht.closer_than_self(&key, corrupt).is_empty());
    }

    #[test]
    fn find_node() {
        let dht = dht();
        let known = Peer::random();
        dht.update(&known);

        let response = request(
            &dht,
            &Peer::random(),
            Message::new(MessageType::FindNode, Key::from(known.id().as_bytes().clone()), 0),
        )
        .unwrap();
        assert_eq!(response.closer_peers, vec![PeerInfo::from(&known)]);

        let local = dht.local_peer().clone();
        let response = request(
            &dht,
            &Peer::random(),
            Message::new(MessageType::FindNode, Key::from(local.id().as_bytes().clone()), 0),
        )
        .unwrap();
        assert_eq!(response.closer_peers, vec![PeerInfo::from(&local)]);
    }

    #[test]
    fn add_and_get_providers() {
        let dht = dht();
        let key = Key::from("foo");
        let sender = Peer::random();

        let add = Message::new(MessageType::AddProvider, key.clone(), 0);
        assert_eq!(request(&dht, &sender, add.clone()), Some(add));

        let response = request(
            &dht,
            &Peer::random(),
            Message::new(MessageType::GetProviders, key.clone(), 0),
        )
        .unwrap();
        assert_eq!(response.provider_peers, vec![PeerInfo::from(&sender)]);

        dht.put_local(key.clone(), Bytes::from_static(b"bar")).unwrap();

        let response = request(
            &dht,
            &Peer::random(),
            Message::new(MessageType::GetProviders, key, 0),
        )
        .unwrap();
        assert_eq!(response.provider_peers.len(), 2);
        assert_eq!(&response.provider_peers[0].id, dht.local_peer().id());
    }

    #[test]
    fn cluster_level_out_of_range_uses_last_table() {
        let dht = dht();
        let peer = Peer::random();
        dht.update(&peer);

        let message = Message::new(MessageType::FindNode, Key::from("foo"), 42);

        assert_eq!(dht.nearest_peers_to_query(&message, 10), vec![peer]);
    }
}
