//! In-memory network of DHT nodes, for tests and demos.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use rand::Rng;
use tracing::debug;

use crate::dht::DhtInner;
use crate::net::{Dialer, NetMessage, RequestSender};
use crate::{Config, Context, Dht, Error, Peer, PeerId, Result, SigningKey};

/// Port of the first node's address, later nodes count up from it.
const FIRST_PORT: u16 = 4001;

#[derive(Debug)]
struct NetworkEntry {
    node: Weak<DhtInner>,
    online: bool,
}

#[derive(Debug, Clone)]
/// Routes requests between in-process [Dht] nodes by calling
/// [Dht::handle_message] directly.
///
/// Nodes can be switched offline to simulate unreachable peers.
pub struct MemoryNetwork {
    nodes: Arc<RwLock<HashMap<PeerId, NetworkEntry>>>,
    next_port: Arc<AtomicU16>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        MemoryNetwork {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            next_port: Arc::new(AtomicU16::new(FIRST_PORT)),
        }
    }

    /// Create a node with a fresh ed25519 identity and register it.
    pub fn spawn(&self, config: Config) -> Result<Dht> {
        let secret: [u8; 32] = rand::thread_rng().gen();
        let signing_key = SigningKey::from_bytes(&secret);

        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let address = SocketAddr::from(([127, 0, 0, 1], port));

        let local = Peer::from_public_key(signing_key.verifying_key()).with_address(address);

        let transport = Arc::new(MemoryTransport {
            network: self.clone(),
            id: local.id().clone(),
            addresses: vec![address],
        });

        let dht = Dht::builder(local, transport.clone(), transport)
            .config(config)
            .build()?;

        self.register(&dht);

        Ok(dht)
    }

    /// Make `dht` reachable through this network.
    pub fn register(&self, dht: &Dht) {
        self.write().insert(
            dht.local_peer().id().clone(),
            NetworkEntry {
                node: Arc::downgrade(&dht.0),
                online: true,
            },
        );
    }

    pub fn set_online(&self, id: &PeerId, online: bool) {
        if let Some(entry) = self.write().get_mut(id) {
            entry.online = online;
        }
    }

    pub fn is_online(&self, id: &PeerId) -> bool {
        self.read().get(id).is_some_and(|entry| entry.online)
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // === Private Methods ===

    /// The live node registered under `id`, with its online flag.
    fn node(&self, id: &PeerId) -> Option<(Dht, bool)> {
        let nodes = self.read();
        let entry = nodes.get(id)?;

        entry.node.upgrade().map(|inner| (Dht(inner), entry.online))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PeerId, NetworkEntry>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PeerId, NetworkEntry>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
/// One node's view of a [MemoryNetwork].
struct MemoryTransport {
    network: MemoryNetwork,
    id: PeerId,
    addresses: Vec<SocketAddr>,
}

impl MemoryTransport {
    fn unreachable(peer: &Peer, reason: &str) -> Error {
        Error::Dial {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Dialer for MemoryTransport {
    fn dial_peer(&self, peer: &Peer) -> Result<()> {
        match self.network.node(peer.id()) {
            Some((_, true)) => Ok(()),
            Some((_, false)) => Err(Self::unreachable(peer, "offline")),
            None => Err(Self::unreachable(peer, "unknown peer")),
        }
    }
}

impl RequestSender for MemoryTransport {
    fn send_request(&self, ctx: &Context, message: NetMessage) -> Result<NetMessage> {
        ctx.check()?;

        let (peer, data) = message.into_parts();

        let remote = match self.network.node(peer.id()) {
            Some((remote, true)) => remote,
            // An offline peer just never answers.
            Some((_, false)) => return Err(Error::Timeout),
            None => return Err(Self::unreachable(&peer, "unknown peer")),
        };

        // The remote node sees the sender through its own peerstore.
        let announced = Peer::new(self.id.clone());
        for address in &self.addresses {
            announced.add_address(*address);
        }
        let sender = remote.peerstore().add(announced)?;

        let response = remote
            .handle_message(ctx, NetMessage::new(sender, data))
            .ok_or(Error::NoResponse)?;

        ctx.check()?;

        Ok(NetMessage::new(peer, response.data().clone()))
    }
}

#[derive(Debug)]
/// A small in-memory DHT, every node connected to the first one and bootstrapped.
pub struct Testnet {
    pub network: MemoryNetwork,
    pub nodes: Vec<Dht>,
}

impl Testnet {
    /// Create a testnet of `count` nodes with liveness pings disabled.
    pub fn new(count: usize) -> Result<Testnet> {
        Self::with_config(
            count,
            Config {
                ping_interval: None,
                ..Default::default()
            },
        )
    }

    pub fn with_config(count: usize, config: Config) -> Result<Testnet> {
        let network = MemoryNetwork::new();

        let nodes = (0..count)
            .map(|_| network.spawn(config.clone()))
            .collect::<Result<Vec<_>>>()?;

        let testnet = Testnet { network, nodes };

        let ctx = Context::background();

        for node in testnet.nodes.iter().skip(1) {
            testnet.join(&ctx, node)?;
        }

        for node in &testnet.nodes {
            node.bootstrap(&ctx);
        }

        debug!(nodes = testnet.nodes.len(), "Testnet ready");

        Ok(testnet)
    }

    /// The first node, which every other node connected to.
    pub fn bootstrap(&self) -> Option<&Dht> {
        self.nodes.first()
    }

    /// Create one more node on the same network, connected and bootstrapped,
    /// without adding it to [Testnet::nodes].
    pub fn spawn_node(&self, config: Config) -> Result<Dht> {
        let node = self.network.spawn(config)?;
        let ctx = Context::background();

        self.join(&ctx, &node)?;
        node.bootstrap(&ctx);

        Ok(node)
    }

    fn join(&self, ctx: &Context, node: &Dht) -> Result<()> {
        if let Some(bootstrap) = self.bootstrap() {
            if bootstrap.local_peer().id() != node.local_peer().id() {
                node.connect(ctx, bootstrap.local_peer())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_node_knows_the_bootstrap_node() {
        let testnet = Testnet::new(5).unwrap();
        let bootstrap = testnet.bootstrap().unwrap();

        for node in testnet.nodes.iter().skip(1) {
            assert!(node.find_local(bootstrap.local_peer().id()).is_some());
            assert!(bootstrap.find_local(node.local_peer().id()).is_some());
        }

        assert_eq!(testnet.network.len(), 5);
    }

    #[test]
    fn offline_nodes_are_unreachable() {
        let testnet = Testnet::new(2).unwrap();
        let (a, b) = (&testnet.nodes[0], &testnet.nodes[1]);

        let peer = a.find_local(b.local_peer().id()).unwrap().0;

        testnet.network.set_online(b.local_peer().id(), false);
        assert!(!testnet.network.is_online(b.local_peer().id()));

        let result = a.ping(&Context::background(), &peer);
        assert!(matches!(result, Err(Error::Timeout)));

        testnet.network.set_online(b.local_peer().id(), true);
        assert!(a.ping(&Context::background(), &peer).is_ok());
    }
}
