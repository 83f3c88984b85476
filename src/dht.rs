//! Dht node.

mod config;
mod handlers;
mod providers;
mod query;
mod requests;
mod routing;

use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, trace};

use crate::datastore::{Datastore, MemoryDatastore};
use crate::net::{Dialer, Handler, NetMessage, RequestSender};
use crate::peerstore::{MemoryPeerstore, Peerstore};
use crate::{
    CancelHandle, Context, Error, Id, Key, Message, MessageType, Peer, PeerId, Result,
    RoutingTable,
};

pub use config::{Config, DEFAULT_REQUEST_TIMEOUT};
pub use providers::ProviderManager;

#[derive(Debug, Clone, PartialEq)]
/// Outcome of a single GET_VALUE hop.
pub enum ValueOrPeers {
    /// The peer, or one of the providers it pointed at, had the value.
    Value(Bytes),
    /// Peers closer to the key, to query next.
    CloserPeers(Vec<Peer>),
    /// The peer had neither the value nor anyone better to ask.
    NotFound,
}

#[derive(Clone)]
/// Kademlia DHT node.
///
/// Cloning is cheap, every clone drives the same node.
pub struct Dht(pub(crate) Arc<DhtInner>);

pub(crate) struct DhtInner {
    config: Config,
    local: Peer,
    /// One table per configured cluster latency.
    routing_tables: Vec<RoutingTable>,
    peerstore: Arc<dyn Peerstore>,
    datastore: Mutex<Box<dyn Datastore>>,
    providers: ProviderManager,
    dialer: Arc<dyn Dialer>,
    sender: Arc<dyn RequestSender>,
    birth: Instant,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancelHandle,
    handles: Vec<JoinHandle<()>>,
}

impl Dht {
    /// Create a [DhtBuilder] for the `local` peer, dialing and sending
    /// requests through the given transport.
    pub fn builder(
        local: Peer,
        dialer: Arc<dyn Dialer>,
        sender: Arc<dyn RequestSender>,
    ) -> DhtBuilder {
        DhtBuilder {
            local,
            dialer,
            sender,
            config: Config::default(),
            peerstore: None,
            datastore: None,
        }
    }

    // === Getters ===

    pub fn local_peer(&self) -> &Peer {
        &self.0.local
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn peerstore(&self) -> &Arc<dyn Peerstore> {
        &self.0.peerstore
    }

    pub fn providers(&self) -> &ProviderManager {
        &self.0.providers
    }

    pub fn routing_tables(&self) -> &[RoutingTable] {
        &self.0.routing_tables
    }

    /// Number of peers in the first routing table.
    pub fn size(&self) -> usize {
        self.table(0).size()
    }

    /// Time since this node was built.
    pub fn uptime(&self) -> Duration {
        self.0.birth.elapsed()
    }

    // === Public Methods ===

    /// Start the background routines: periodic liveness pings (unless
    /// [Config::ping_interval] is `None`) and provider record cleanup.
    pub fn start(&self, ctx: &Context) -> Result<()> {
        let mut running = self.running();

        if running.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let (ctx, cancel) = ctx.with_cancel();
        let mut handles = Vec::new();

        if let Some(interval) = self.config().ping_interval {
            let weak = Arc::downgrade(&self.0);
            let ctx = ctx.clone();

            handles.push(thread::spawn(move || ping_routine(weak, ctx, interval)));
        }

        let weak = Arc::downgrade(&self.0);
        let interval = self.config().provider_cleanup_interval;

        handles.push(thread::spawn(move || {
            provider_cleanup_routine(weak, ctx, interval)
        }));

        *running = Some(Running { cancel, handles });

        info!(peer = %self.local_peer(), "Dht node started");

        Ok(())
    }

    /// Stop the background routines and wait for them to exit.
    pub fn stop(&self) {
        let running = self.running().take();

        if let Some(mut running) = running {
            running.cancel.cancel();

            for handle in running.handles {
                let _ = handle.join();
            }
        }
    }

    /// Dial `peer`, ping it, and add it to the routing tables.
    ///
    /// Nothing is added to the routing tables if either step fails.
    pub fn connect(&self, ctx: &Context, peer: &Peer) -> Result<Peer> {
        // Work on this node's own record of the peer, never on a foreign handle.
        let announced = Peer::new(peer.id().clone());
        for address in peer.addresses() {
            announced.add_address(address);
        }
        let peer = self.peerstore().add(announced)?;

        debug!(%peer, "Connect to new peer");

        self.0.dialer.dial_peer(&peer)?;
        self.ping(ctx, &peer)?;

        self.update(&peer);

        Ok(peer)
    }

    /// Refresh `peer` in every routing table.
    ///
    /// Evicted peers are not disconnected, they may still be in use elsewhere.
    pub fn update(&self, peer: &Peer) {
        if peer.id() == self.local_peer().id() {
            return;
        }

        trace!(context = "dht", %peer, latency = ?peer.latency(), "Updating peer");

        for (level, table) in self.0.routing_tables.iter().enumerate() {
            if let Some(evicted) = table.update(peer) {
                trace!(context = "dht", %evicted, level, "Evicted peer");
            }
        }
    }

    /// Find a peer in the routing tables, returning it with the index of the
    /// table it was found in.
    pub fn find_local(&self, id: &PeerId) -> Option<(Peer, usize)> {
        self.0
            .routing_tables
            .iter()
            .enumerate()
            .find_map(|(level, table)| table.find(id).map(|peer| (peer, level)))
    }

    /// Read a value from the local datastore.
    pub fn get_local(&self, key: &Key) -> Result<Option<Bytes>> {
        self.datastore().get(key)
    }

    /// Write a value to the local datastore.
    pub fn put_local(&self, key: Key, value: Bytes) -> Result<()> {
        self.datastore().put(key, value)
    }

    /// Register every key in the datastore as provided by this node.
    ///
    /// Returns the number of keys loaded.
    pub fn load_providable_keys(&self) -> Result<usize> {
        let keys = self.datastore().list_keys()?;

        for key in &keys {
            if key.is_empty() {
                debug!("Skipping empty datastore key");
                continue;
            }
            self.0
                .providers
                .add_provider(key.clone(), self.local_peer().clone());
        }

        Ok(keys.len())
    }

    /// Send `message` to `peer` and wait for the decoded response.
    ///
    /// On success the round trip time is recorded on the responding peer,
    /// which is then refreshed in the routing tables.
    pub fn send_request(&self, ctx: &Context, peer: &Peer, message: &Message) -> Result<Message> {
        let ctx = ctx.with_timeout(self.config().request_timeout);
        let bytes = message.to_bytes()?;

        let start = Instant::now();

        trace!(
            context = "dht",
            to = %peer,
            message_type = %message.message_type,
            "Sent message"
        );

        let response = self
            .0
            .sender
            .send_request(&ctx, NetMessage::new(peer.clone(), bytes))?;

        let rtt = start.elapsed();

        let parsed = Message::from_bytes(response.data())?;

        response.peer().set_latency(rtt);
        self.update(response.peer());

        Ok(parsed)
    }

    // === Private Methods ===

    /// The routing table for a cluster level, out of range levels use the last table.
    fn table(&self, level: u32) -> &RoutingTable {
        let tables = &self.0.routing_tables;
        &tables[(level as usize).min(tables.len() - 1)]
    }

    fn datastore(&self) -> MutexGuard<'_, Box<dyn Datastore>> {
        self.0
            .datastore
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.0.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ping a few peers near a random id.
    fn ping_neighbors(&self, ctx: &Context) {
        let target = Id::random();
        let peers = self.table(0).nearest_peers(&target, self.config().ping_count);

        for peer in peers {
            let ctx = ctx.with_timeout(self.config().ping_timeout);

            if let Err(error) = self.ping(&ctx, &peer) {
                debug!(?error, %peer, "Ping error");
            }
        }
    }
}

impl Debug for Dht {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dht")
            .field("local", self.local_peer())
            .field("size", &self.size())
            .finish()
    }
}

impl Handler for Dht {
    fn handle_message(&self, ctx: &Context, message: NetMessage) -> Option<NetMessage> {
        Dht::handle_message(self, ctx, message)
    }
}

impl Drop for DhtInner {
    fn drop(&mut self) {
        // Background threads only hold weak references, and may be the ones
        // dropping the node, so signal them without joining.
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut running) = running {
            running.cancel.cancel();
        }
    }
}

fn ping_routine(weak: Weak<DhtInner>, ctx: Context, interval: Duration) {
    while ctx.sleep(interval) {
        let Some(inner) = weak.upgrade() else {
            break;
        };

        Dht(inner).ping_neighbors(&ctx);
    }

    trace!(context = "dht", "Ping routine stopped");
}

fn provider_cleanup_routine(weak: Weak<DhtInner>, ctx: Context, interval: Duration) {
    while ctx.sleep(interval) {
        let Some(inner) = weak.upgrade() else {
            break;
        };

        let removed = inner.providers.cleanup();
        trace!(context = "dht", removed, "Cleaned up provider records");
    }
}

/// Builds a [Dht], see [Dht::builder].
pub struct DhtBuilder {
    local: Peer,
    dialer: Arc<dyn Dialer>,
    sender: Arc<dyn RequestSender>,
    config: Config,
    peerstore: Option<Arc<dyn Peerstore>>,
    datastore: Option<Box<dyn Datastore>>,
}

impl DhtBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a [MemoryPeerstore].
    pub fn peerstore(mut self, peerstore: Arc<dyn Peerstore>) -> Self {
        self.peerstore = Some(peerstore);
        self
    }

    /// Defaults to a [MemoryDatastore].
    pub fn datastore(mut self, datastore: Box<dyn Datastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    pub fn build(self) -> Result<Dht> {
        let peerstore = self
            .peerstore
            .unwrap_or_else(|| Arc::new(MemoryPeerstore::new()));
        let local = peerstore.add(self.local)?;

        let mut latencies = self.config.cluster_latencies.clone();
        if latencies.is_empty() {
            latencies.push(Duration::MAX);
        }

        let routing_tables = latencies
            .into_iter()
            .map(|max_latency| {
                RoutingTable::new(self.config.bucket_size, *local.kad_id(), max_latency)
            })
            .collect();

        let providers = ProviderManager::new(
            local.id().clone(),
            self.config.provider_ttl,
            self.config.max_provider_keys,
            self.config.max_providers_per_key,
        );

        Ok(Dht(Arc::new(DhtInner {
            routing_tables,
            peerstore,
            datastore: Mutex::new(
                self.datastore
                    .unwrap_or_else(|| Box::new(MemoryDatastore::new())),
            ),
            providers,
            dialer: self.dialer,
            sender: self.sender,
            birth: Instant::now(),
            running: Mutex::new(None),
            config: self.config,
            local,
        })))
    }
}

/// Build a PING request.
pub(crate) fn ping_message() -> Message {
    Message::new(MessageType::Ping, Key::from(Vec::new()), 0)
}
