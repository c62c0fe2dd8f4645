#![deny(missing_docs)]

//! An implementation of the Chord distributed hash table.
//!
//! Each process runs one [`Node`]. Nodes arrange themselves on an `m`-bit
//! identifier ring, keep a successor list and finger table per node, and
//! converge after churn through periodic stabilization. A replicated
//! key/value store rides on the overlay: every key lives at its owner and
//! in the replica slots of the owner's `r` closest successors.
//!
//! The crate is generic over the [`Transport`](transport::Transport) that
//! carries peer messages; [`UdpNode`] wires in the bundled datagram
//! transport.
//!
//! # Examples
//! Create a fresh ring and store a value:
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), chord_ring::Error> {
//! use chord_ring::{Config, UdpNode};
//!
//! let node = UdpNode::new(Config::new("127.0.0.1:4000")).start().await?;
//! node.put("name".into(), "alice".into()).await?;
//! assert_eq!(node.get("name").await?, Some("alice".into()));
//! # Ok(()) }
//! ```
//!
//! Join an existing ring through any live peer:
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), chord_ring::Error> {
//! use chord_ring::{Config, UdpNode};
//!
//! let config = Config::new("127.0.0.1:4001").with_bootstrap("127.0.0.1:4000");
//! let node = UdpNode::new(config).start().await?;
//! let owner = node.lookup("name").await?;
//! println!("name lives at {owner:?}");
//! # Ok(()) }
//! ```

/// Runtime parameters.
pub mod config;
/// Error kinds surfaced to callers.
pub mod error;
/// Ring identifiers and circular arithmetic.
pub mod id;
/// The logical messages peers exchange.
pub mod message;
/// The node itself: overlay protocol, store and admin surface.
pub mod node;
/// Per-node routing state: predecessor, successors, fingers.
pub mod routing;
/// The primary and replica key/value stores.
pub mod store;
/// The request/response channel between peers.
pub mod transport;

pub use config::Config;
pub use error::Error;
pub use id::{Id, IdSpace};
pub use message::NodeRef;
pub use node::{Node, NodeHandle, NodeInfo};
pub use transport::UdpTransport;

/// A node over the bundled UDP transport.
pub type UdpNode = Node<UdpTransport>;
