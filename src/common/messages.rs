//! Serialize and deserialize DHT RPC messages.

mod internal;

use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use serde_bytes::ByteBuf;

use crate::common::{Key, Peer, PeerId};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// DHT RPC type, with its stable wire tag.
pub enum MessageType {
    Ping = 0,
    FindNode = 1,
    GetValue = 2,
    PutValue = 3,
    GetProviders = 4,
    AddProvider = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => MessageType::Ping,
            1 => MessageType::FindNode,
            2 => MessageType::GetValue,
            3 => MessageType::PutValue,
            4 => MessageType::GetProviders,
            5 => MessageType::AddProvider,
            other => return Err(Error::InvalidMessageType(other)),
        })
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Ping => "PING",
            MessageType::FindNode => "FIND_NODE",
            MessageType::GetValue => "GET_VALUE",
            MessageType::PutValue => "PUT_VALUE",
            MessageType::GetProviders => "GET_PROVIDERS",
            MessageType::AddProvider => "ADD_PROVIDER",
        };

        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A peer as described on the wire: its id and the addresses it can be dialed at.
pub struct PeerInfo {
    pub id: PeerId,
    pub addresses: Vec<SocketAddr>,
}

impl From<&Peer> for PeerInfo {
    fn from(peer: &Peer) -> Self {
        PeerInfo {
            id: peer.id().clone(),
            addresses: peer.addresses(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// DHT RPC message, used for both requests and responses.
pub struct Message {
    pub message_type: MessageType,
    pub key: Key,
    /// Which routing table shard the responder should consult.
    pub cluster_level: u32,
    pub value: Option<Bytes>,
    pub closer_peers: Vec<PeerInfo>,
    pub provider_peers: Vec<PeerInfo>,
}

impl Message {
    pub fn new(message_type: MessageType, key: Key, cluster_level: u32) -> Self {
        Message {
            message_type,
            key,
            cluster_level,
            value: None,
            closer_peers: Vec::new(),
            provider_peers: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: Bytes) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_closer_peers(mut self, peers: &[Peer]) -> Self {
        self.closer_peers = peers.iter().map(PeerInfo::from).collect();
        self
    }

    pub fn with_provider_peers(mut self, peers: &[Peer]) -> Self {
        self.provider_peers = peers.iter().map(PeerInfo::from).collect();
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.to_serde_message().to_bytes()?)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Message::from_serde_message(internal::DHTMessage::from_bytes(bytes.as_ref())?)
    }

    fn to_serde_message(&self) -> internal::DHTMessage {
        internal::DHTMessage {
            message_type: self.message_type as u8,
            key: self.key.as_bytes().to_vec(),
            cluster_level: self.cluster_level,
            value: self.value.as_ref().map(|v| ByteBuf::from(v.to_vec())),
            closer_peers: peers_to_serde(&self.closer_peers),
            provider_peers: peers_to_serde(&self.provider_peers),
        }
    }

    fn from_serde_message(msg: internal::DHTMessage) -> Result<Message> {
        Ok(Message {
            message_type: MessageType::try_from(msg.message_type)?,
            key: Key::from(msg.key),
            cluster_level: msg.cluster_level,
            value: msg.value.map(|v| Bytes::from(v.into_vec())),
            closer_peers: serde_to_peers(msg.closer_peers)?,
            provider_peers: serde_to_peers(msg.provider_peers)?,
        })
    }
}

fn peers_to_serde(peers: &[PeerInfo]) -> Vec<internal::DHTPeer> {
    peers
        .iter()
        .map(|peer| internal::DHTPeer {
            id: peer.id.as_bytes().to_vec(),
            addresses: peer
                .addresses
                .iter()
                .map(|address| ByteBuf::from(sockaddr_to_bytes(address)))
                .collect(),
        })
        .collect()
}

fn serde_to_peers(peers: Vec<internal::DHTPeer>) -> Result<Vec<PeerInfo>> {
    peers
        .into_iter()
        .map(|peer| {
            Ok(PeerInfo {
                id: PeerId::new(peer.id),
                addresses: peer
                    .addresses
                    .iter()
                    .map(bytes_to_sockaddr)
                    .collect::<Result<Vec<_>>>()?,
            })
        })
        .collect()
}

pub fn bytes_to_sockaddr<T: AsRef<[u8]>>(bytes: T) -> Result<SocketAddr> {
    let bytes = bytes.as_ref();

    let (ip, port_bytes) = match bytes.len() {
        6 => {
            let mut octets = [0_u8; 4];
            octets.copy_from_slice(&bytes[..4]);

            (IpAddr::V4(Ipv4Addr::from(octets)), &bytes[4..6])
        }
        18 => {
            let mut octets = [0_u8; 16];
            octets.copy_from_slice(&bytes[..16]);

            (IpAddr::V6(Ipv6Addr::from(octets)), &bytes[16..18])
        }
        other => return Err(Error::InvalidAddress(other)),
    };

    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);

    Ok(SocketAddr::new(ip, port))
}

pub fn sockaddr_to_bytes(sockaddr: &SocketAddr) -> Vec<u8> {
    let mut bytes = match sockaddr {
        SocketAddr::V4(v4) => v4.ip().octets().to_vec(),
        SocketAddr::V6(v6) => v6.ip().octets().to_vec(),
    };

    bytes.extend(sockaddr.port().to_be_bytes());

    bytes
}
