//! Main Crate Error

use crate::common::ID_SIZE;

#[derive(thiserror::Error, Debug)]
/// Kadmux crate error enum.
pub enum Error {
    /// For errors with no better home yet.
    #[error("Static error: {0}")]
    Static(&'static str),

    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    /// Id bytes were not exactly [ID_SIZE] long.
    #[error("Invalid Id size, expected {expected}, got {0}", expected = ID_SIZE)]
    InvalidIdSize(usize),

    /// Hex string could not be decoded into an identifier.
    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    /// The message type tag is not one of the known DHT message types.
    #[error("Unknown message type: {0}")]
    InvalidMessageType(u8),

    /// The envelope carries a protocol id this node doesn't know.
    #[error("Unknown protocol id: {0}")]
    UnknownProtocol(u8),

    /// Compact address bytes were neither 6 (IPv4) nor 18 (IPv6) bytes long.
    #[error("Invalid compact address of length {0}")]
    InvalidAddress(usize),

    /// Dialing a peer at the transport layer failed.
    #[error("Failed to dial peer {peer}: {reason}")]
    Dial { peer: String, reason: String },

    /// No response arrived before the context deadline.
    #[error("Request timed out")]
    Timeout,

    /// The context was cancelled while waiting.
    #[error("Operation cancelled")]
    Cancelled,

    /// The other end of a channel or pipe went away.
    #[error("Channel disconnected")]
    Disconnected,

    /// The transport returned without a response message.
    #[error("No response to request")]
    NoResponse,

    /// A peer record pointed at the local node.
    #[error("Found self")]
    FoundSelf,

    /// The remote node did not echo back what we asked it to store.
    #[error("Value not stored correctly by {0}")]
    NotStored(String),

    /// `start` was called on a running muxer, service or node.
    #[error("Muxer is already running")]
    AlreadyRunning,
}

impl Error {
    /// Returns `true` for failures of the network path (dial, timeouts, cancellation,
    /// closed channels, missing responses), which lookups retry against a different peer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Dial { .. }
                | Error::Timeout
                | Error::Cancelled
                | Error::Disconnected
                | Error::NoResponse
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transport_errors() {
        let dial = Error::Dial {
            peer: "peer".to_string(),
            reason: "offline".to_string(),
        };

        for error in [dial, Error::Timeout, Error::Cancelled, Error::Disconnected, Error::NoResponse] {
            assert!(error.is_transport(), "{error}");
        }

        for error in [
            Error::InvalidMessageType(9),
            Error::FoundSelf,
            Error::NotStored("peer".to_string()),
            Error::AlreadyRunning,
        ] {
            assert!(!error.is_transport(), "{error}");
        }
    }
}
