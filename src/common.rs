//! Miscellaneous common structs used throughout the library.

mod closest_peers;
mod id;
mod kbucket;
mod key;
pub mod messages;
mod peer;
mod routing_table;

pub use closest_peers::*;
pub use id::*;
pub use kbucket::*;
pub use key::*;
pub use messages::{Message, MessageType, PeerInfo};
pub use peer::*;
pub use routing_table::*;
