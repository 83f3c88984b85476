//! Peer identity and the shared, mutable liveness record behind it.
use std::{
    fmt::{self, Debug, Display, Formatter},
    net::SocketAddr,
    str::FromStr,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use bytes::Bytes;
use ed25519_dalek::VerifyingKey;
use rand::Rng;

use crate::common::{
    id::{from_hex, to_hex},
    Id,
};
use crate::{Error, Result};

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Peer identity: the SHA-1 digest of the peer's public key.
pub struct PeerId(Bytes);

impl PeerId {
    pub fn new<T: Into<Bytes>>(bytes: T) -> Self {
        PeerId(bytes.into())
    }

    pub fn from_public_key(key: &VerifyingKey) -> Self {
        let mut hasher = sha1_smol::Sha1::new();
        hasher.update(key.as_bytes());

        PeerId(Bytes::copy_from_slice(&hasher.digest().bytes()))
    }

    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 20] = rng.gen();

        PeerId(Bytes::copy_from_slice(&bytes))
    }

    /// The routing [Id] of this peer.
    pub fn kad_id(&self) -> Id {
        Id::hash(&self.0)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_hex(&self.0))
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<PeerId> {
        Ok(PeerId(from_hex(s)?.into()))
    }
}

#[derive(Debug, Default)]
struct PeerState {
    addresses: Vec<SocketAddr>,
    latency: Duration,
    public_key: Option<VerifyingKey>,
}

#[derive(Debug)]
struct PeerInner {
    id: PeerId,
    kad_id: Id,
    state: RwLock<PeerState>,
}

#[derive(Clone)]
/// Handle to a peer owned by a [crate::Peerstore].
///
/// Cloning is cheap, and every clone observes the same addresses and latency,
/// so routing tables hold clones without duplicating the peer's state.
pub struct Peer(Arc<PeerInner>);

impl Peer {
    pub fn new(id: PeerId) -> Peer {
        let kad_id = id.kad_id();

        Peer(Arc::new(PeerInner {
            id,
            kad_id,
            state: RwLock::new(PeerState::default()),
        }))
    }

    pub fn from_public_key(key: VerifyingKey) -> Peer {
        let peer = Peer::new(PeerId::from_public_key(&key));
        peer.write_state(|state| state.public_key = Some(key));

        peer
    }

    /// Creates a peer with a random id, useful for testing.
    pub fn random() -> Peer {
        Peer::new(PeerId::random())
    }

    pub fn with_address(self, address: SocketAddr) -> Self {
        self.add_address(address);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.write_state(|state| state.latency = latency);
        self
    }

    // === Getters ===

    pub fn id(&self) -> &PeerId {
        &self.0.id
    }

    /// The routing [Id] of this peer.
    pub fn kad_id(&self) -> &Id {
        &self.0.kad_id
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.read_state(|state| state.addresses.clone())
    }

    pub fn latency(&self) -> Duration {
        self.read_state(|state| state.latency)
    }

    pub fn public_key(&self) -> Option<VerifyingKey> {
        self.read_state(|state| state.public_key)
    }

    // === Public Methods ===

    /// Add an address if it is not already known.
    pub fn add_address(&self, address: SocketAddr) {
        self.write_state(|state| {
            if !state.addresses.contains(&address) {
                state.addresses.push(address);
            }
        })
    }

    /// Record a round trip measurement.
    ///
    /// The first sample is taken as is, later samples are folded into a
    /// moving average weighted 9:1 towards history.
    pub fn set_latency(&self, sample: Duration) {
        self.write_state(|state| {
            if state.latency.is_zero() {
                state.latency = sample;
            } else {
                state.latency = (state.latency * 9 + sample) / 10;
            }
        })
    }

    // === Private Methods ===

    fn read_state<T>(&self, f: impl FnOnce(&PeerState) -> T) -> T {
        let state = self.0.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write_state<T>(&self, f: impl FnOnce(&mut PeerState) -> T) -> T {
        let mut state = self.0.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Peer {}

impl Debug for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.0.id)
            .field("addresses", &self.addresses())
            .field("latency", &self.latency())
            .finish()
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let id = self.0.id.to_string();
        // Short form, like most p2p logs print peer ids.
        write!(f, "<peer {}>", id.get(..8).unwrap_or(&id))
    }
}
