//! Kademlia routing identifier and the XOR metric over it.
use rand::Rng;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of routing identifiers in bytes.
pub const ID_SIZE: usize = 20;
/// The size of routing identifiers in bits.
pub const ID_BITS: usize = ID_SIZE * 8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia routing identifier or a lookup target.
///
/// Peers and content keys are both mapped into this space by hashing,
/// see [Id::hash].
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Map arbitrary bytes (a peer id or a content key) into the identifier space.
    pub fn hash<T: AsRef<[u8]>>(bytes: T) -> Id {
        let mut hasher = sha1_smol::Sha1::new();
        hasher.update(bytes.as_ref());

        Id(hasher.digest().bytes())
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// XOR distance between this Id and `other`.
    ///
    /// The result is itself an [Id], ordered as a big-endian unsigned integer,
    /// so `a.xor(t) < b.xor(t)` means `a` is closer to `t` than `b`.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            result[i] = a ^ b;
        }

        Id(result)
    }

    /// Number of leading bits shared with `other`.
    ///
    /// Returns [ID_BITS] for identical ids.
    pub fn common_prefix_len(&self, other: &Id) -> usize {
        for i in 0..ID_SIZE {
            let diff = self.0[i] ^ other.0[i];

            if diff != 0 {
                return i * 8 + diff.leading_zeros() as usize;
            }
        }

        ID_BITS
    }

    /// Returns `true` if `a` is strictly closer to `self` than `b` is.
    pub fn closer(&self, a: &Id, b: &Id) -> bool {
        a.xor(self) < b.xor(self)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn from_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::InvalidHex(s.to_string()));
    }

    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::InvalidHex(s.to_string()))
        })
        .collect()
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_hex(&self.0))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        Id::from_bytes(from_hex(s)?)
    }
}
