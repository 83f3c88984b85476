//! Content keys addressed in the DHT.

use std::fmt::{self, Debug, Display, Formatter};

use bytes::Bytes;

use crate::common::{id::to_hex, Id};

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Opaque content key, usually the multihash of a block.
pub struct Key(Bytes);

impl Key {
    pub fn new<T: Into<Bytes>>(bytes: T) -> Self {
        Key(bytes.into())
    }

    /// The routing [Id] this key is stored under.
    pub fn id(&self) -> Id {
        Id::hash(&self.0)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Key(value.into())
    }
}

impl From<&[u8]> for Key {
    fn from(value: &[u8]) -> Self {
        Key(Bytes::copy_from_slice(value))
    }
}

impl From<Bytes> for Key {
    fn from(value: Bytes) -> Self {
        Key(value)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_hex(&self.0))
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}
