use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTMessage {
    #[serde(rename = "t")]
    pub message_type: u8,

    #[serde(rename = "k", with = "serde_bytes")]
    pub key: Vec<u8>,

    #[serde(default)]
    #[serde(rename = "l")]
    pub cluster_level: u32,

    #[serde(default)]
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    pub value: Option<ByteBuf>,

    #[serde(default)]
    #[serde(rename = "c", skip_serializing_if = "Vec::is_empty")]
    pub closer_peers: Vec<DHTPeer>,

    #[serde(default)]
    #[serde(rename = "p", skip_serializing_if = "Vec::is_empty")]
    pub provider_peers: Vec<DHTPeer>,
}

impl DHTMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<DHTMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTPeer {
    #[serde(rename = "i", with = "serde_bytes")]
    pub id: Vec<u8>,

    /// Compact addresses, 6 bytes for IPv4 and 18 bytes for IPv6.
    #[serde(default)]
    #[serde(rename = "a")]
    pub addresses: Vec<ByteBuf>,
}
