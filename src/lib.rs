//! # meshfs - Peer-to-Peer File Replication Mesh
//!
//! meshfs nodes discover each other, maintain a live peer set via
//! heartbeats, and replicate files across connected peers without a central
//! coordinator. Two pieces make up the core:
//!
//! - **Peer membership**: connection lifecycle, identity verification
//!   handshake, heartbeat failure detection, one-hop gossip of newly
//!   verified hosts
//! - **Replica catalog**: file metadata bookkeeping, replica placement,
//!   upload/download orchestration, catalog merge on handshake
//!
//! ## Architecture
//!
//! Shared state is owned by internally synchronized registries: every public
//! method on [`membership::Membership`] takes and releases one lock, and
//! broadcast paths always iterate a point-in-time snapshot. Outbound writes
//! go through a per-peer queue drained by a writer task, so no lock is held
//! across a socket operation. One reader task per connection preserves
//! per-connection message order.
//!
//! ## Trust Model
//!
//! Identity is a shared logical id string checked against a persisted
//! known-identities table. There is no wire encryption, no Byzantine fault
//! tolerance, and no consistency guarantee across replicas beyond
//! best-effort merge.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `node` | High-level API combining all components |
//! | `identity` | This process's address and logical id |
//! | `wire` | Length-prefixed frame codec and typed messages |
//! | `peer` | One live socket per remote host, heartbeat timestamps |
//! | `membership` | Seen/connected/verified sets, handshake, gossip |
//! | `catalog` | Filename -> uploader + replica-holder bookkeeping |
//! | `replica` | Upload/download/delete orchestration, placement policy |
//! | `storage` | Chunked local storage collaborator |
//! | `directory` | Persisted host/identity directory |

pub mod catalog;
pub mod directory;
pub mod identity;
pub mod membership;
pub mod node;
pub mod peer;
pub mod replica;
pub mod storage;
pub mod wire;

pub use catalog::FileRecord;
pub use identity::{resolve_self_host, SelfIdentity};
pub use node::{NetInfo, Node, NodeConfig, PeerInfo, DEFAULT_PORT};
pub use peer::Timing;
pub use replica::{PlacementPolicy, ReplicaError, ReplicateToAll};
