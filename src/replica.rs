//! # Replica Manager
//!
//! Orchestrates upload, download, and delete across the mesh. The manager
//! never touches sockets: it asks the membership registry who is connected
//! and queues messages through it. Local bytes go through the [`ChunkStore`]
//! collaborator.
//!
//! ## Acknowledgment flow
//!
//! Storing IS acknowledging: a peer that writes a `ReplicaStore` chunk adds
//! itself to the file's replica set and broadcasts the updated record as a
//! one-record `CatalogSync`. The uploader (and everyone else) merges it and
//! learns who holds the file, which is what makes downloads work after the
//! uploader goes offline.
//!
//! ## Known gaps (inherited from the baseline design)
//!
//! - Downloads go to exactly one active replica, no retry across alternates.
//! - Deletes propagate as messages with no tombstone, so a stale snapshot
//!   merged later can resurrect a deleted record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, FileRecord};
use crate::identity::SelfIdentity;
use crate::membership::Membership;
use crate::storage::{ChunkStore, StorageError};
use crate::wire::{Message, ReplicaChunk, ReplicaFetch, MAX_REPLICA_BYTES};

/// How long a download waits for the requested replica chunk to arrive.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Errors
// ============================================================================

/// Application-level failures reported to the caller. None of these mutate
/// the catalog partially; an operation either commits or leaves state as it
/// found it.
#[derive(Debug)]
pub enum ReplicaError {
    /// A record with this filename and uploader already exists locally.
    DuplicateUpload(String),
    /// The filename is already cataloged under a different uploader.
    /// Filenames are the catalog's unique key; clobbering another upload
    /// would silently discard its replica set.
    FilenameTaken { filename: String, uploader: String },
    /// The file exceeds the per-replica transfer limit.
    TooLarge(String),
    /// Upload requires at least one connected peer.
    NoPeers,
    /// The filename is not in the catalog.
    UnknownFile(String),
    /// The file has holders, but none of them are currently connected.
    NoActiveReplicas(String),
    /// The chosen replica never answered the request.
    DownloadTimeout(String),
    /// A download of this filename is already in flight.
    DownloadInProgress(String),
    /// Queueing the message to a peer failed (writer dead or queue full).
    Transport(String),
    /// Local storage failure.
    Storage(StorageError),
}

impl std::fmt::Display for ReplicaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaError::DuplicateUpload(name) => write!(f, "{name} is already uploaded"),
            ReplicaError::FilenameTaken { filename, uploader } => {
                write!(f, "{filename} is already uploaded by {uploader}")
            }
            ReplicaError::TooLarge(name) => {
                write!(f, "{name} exceeds the replica size limit")
            }
            ReplicaError::NoPeers => write!(f, "no connected peers to replicate to"),
            ReplicaError::UnknownFile(name) => write!(f, "unknown file: {name}"),
            ReplicaError::NoActiveReplicas(name) => {
                write!(f, "no active replicas for {name}")
            }
            ReplicaError::DownloadTimeout(name) => {
                write!(f, "timed out waiting for replica of {name}")
            }
            ReplicaError::DownloadInProgress(name) => {
                write!(f, "a download of {name} is already in flight")
            }
            ReplicaError::Transport(host) => write!(f, "send to {host} failed"),
            ReplicaError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for ReplicaError {}

impl From<StorageError> for ReplicaError {
    fn from(e: StorageError) -> Self {
        ReplicaError::Storage(e)
    }
}

// ============================================================================
// Placement policy
// ============================================================================

/// Chooses which connected peers receive replicas of an upload. Pluggable so
/// the protocol stays independent of the placement decision.
pub trait PlacementPolicy: Send + Sync {
    fn choose(&self, priority: u8, connected: &[String]) -> Vec<String>;
}

/// Baseline policy: replicate to every currently connected peer, whatever
/// the priority says.
pub struct ReplicateToAll;

impl PlacementPolicy for ReplicateToAll {
    fn choose(&self, _priority: u8, connected: &[String]) -> Vec<String> {
        connected.to_vec()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Download responses in flight, keyed by filename. A `ReplicaStore` that
/// matches a pending entry fulfills the download instead of being stored.
type PendingDownloads = HashMap<String, oneshot::Sender<ReplicaChunk>>;

pub struct ReplicaManager {
    me: SelfIdentity,
    membership: Membership,
    catalog: Mutex<Catalog>,
    store: Arc<dyn ChunkStore>,
    policy: Arc<dyn PlacementPolicy>,
    pending: Mutex<PendingDownloads>,
    download_timeout: Duration,
}

impl ReplicaManager {
    pub fn new(
        me: SelfIdentity,
        membership: Membership,
        store: Arc<dyn ChunkStore>,
        policy: Arc<dyn PlacementPolicy>,
    ) -> Self {
        Self {
            me,
            membership,
            catalog: Mutex::new(Catalog::new()),
            store,
            policy,
            pending: Mutex::new(HashMap::new()),
            download_timeout: DOWNLOAD_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, PendingDownloads> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Local operations
    // ------------------------------------------------------------------

    /// Upload a local file into the mesh.
    ///
    /// The filename is the final path component and the catalog's unique
    /// key: an upload is refused if any record exists for it, whether ours
    /// or another uploader's. Fails before any catalog mutation if the
    /// filename is taken, no peers are connected, the source cannot be read,
    /// or the file exceeds the replica size limit. Returns the replica
    /// targets chosen.
    pub async fn upload(&self, path: &Path, priority: u8) -> Result<Vec<String>, ReplicaError> {
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| ReplicaError::Storage(StorageError::InvalidName(
                path.display().to_string(),
            )))?
            .to_string();

        if let Some(existing) = self.catalog().get(&filename) {
            return Err(if existing.uploader == self.me.id {
                ReplicaError::DuplicateUpload(filename)
            } else {
                ReplicaError::FilenameTaken {
                    filename,
                    uploader: existing.uploader.clone(),
                }
            });
        }

        let connected = self.membership.connected_ids();
        let targets = self.policy.choose(priority, &connected);
        if targets.is_empty() {
            return Err(ReplicaError::NoPeers);
        }

        let data = self.store.read_whole_file(path).await?;
        if data.len() > MAX_REPLICA_BYTES {
            return Err(ReplicaError::TooLarge(filename));
        }

        // Commit the record (empty replica set, filled by acknowledgments),
        // then push the data. Baseline chunking: the whole payload as 1/1.
        self.catalog()
            .insert(FileRecord::new(filename.clone(), self.me.id.clone()));

        let chunk = ReplicaChunk {
            filename: filename.clone(),
            uploader: self.me.id.clone(),
            index: 1,
            total: 1,
            data,
        };
        for id in &targets {
            if !self
                .membership
                .send_to_id(id, &Message::ReplicaStore(chunk.clone()))
            {
                warn!(filename = %filename, target = %id, "replica push failed");
            }
        }
        info!(filename = %filename, targets = targets.len(), "upload initiated");
        Ok(targets)
    }

    /// Download `filename` into `dest`.
    ///
    /// Served from local storage when we hold a replica ourselves; otherwise
    /// requested from exactly the first active replica found. No fan-out and
    /// no retry across alternates. At most one network download per filename
    /// may be in flight at a time.
    pub async fn download(&self, filename: &str, dest: &Path) -> Result<(), ReplicaError> {
        let record = self
            .catalog()
            .get(filename)
            .cloned()
            .ok_or_else(|| ReplicaError::UnknownFile(filename.to_string()))?;

        if record.holds_replica(&self.me.id) {
            let data = self.store.read_replica(filename).await?;
            tokio::fs::write(dest, data)
                .await
                .map_err(|e| ReplicaError::Storage(e.into()))?;
            info!(filename, "download served from local replica");
            return Ok(());
        }

        let connected = self.membership.connected_ids();
        let source = record
            .replicas
            .iter()
            .find(|id| connected.contains(id))
            .cloned()
            .ok_or_else(|| ReplicaError::NoActiveReplicas(filename.to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            // One in-flight download per filename; a second would displace
            // the first waiter's channel and strand it until timeout.
            let mut pending = self.pending();
            if pending.contains_key(filename) {
                return Err(ReplicaError::DownloadInProgress(filename.to_string()));
            }
            pending.insert(filename.to_string(), tx);
        }

        let request = Message::ReplicaRequest(ReplicaFetch {
            filename: filename.to_string(),
            index: 1,
            total: 1,
        });
        if !self.membership.send_to_id(&source, &request) {
            self.pending().remove(filename);
            return Err(ReplicaError::Transport(source));
        }
        info!(filename, source = %source, "requested replica");

        let chunk = match tokio::time::timeout(self.download_timeout, rx).await {
            Ok(Ok(chunk)) => chunk,
            _ => {
                self.pending().remove(filename);
                return Err(ReplicaError::DownloadTimeout(filename.to_string()));
            }
        };

        tokio::fs::write(dest, chunk.data)
            .await
            .map_err(|e| ReplicaError::Storage(e.into()))?;
        info!(filename, dest = %dest.display(), "download complete");
        Ok(())
    }

    /// Delete `filename` locally and tell the network so remote holders can
    /// clean up their own catalog and storage.
    pub async fn delete(&self, filename: &str) -> Result<(), ReplicaError> {
        let record = self
            .catalog()
            .get(filename)
            .cloned()
            .ok_or_else(|| ReplicaError::UnknownFile(filename.to_string()))?;

        if record.holds_replica(&self.me.id) {
            self.store.remove_file(filename).await?;
        }
        self.catalog().remove(filename);
        self.membership.broadcast(&Message::Delete {
            filename: filename.to_string(),
        });
        info!(filename, "deleted and propagated");
        Ok(())
    }

    /// Catalog snapshot for display and for the post-handshake exchange.
    pub fn files(&self) -> Vec<FileRecord> {
        self.catalog().snapshot()
    }

    // ------------------------------------------------------------------
    // Network-driven operations (called from reader loops)
    // ------------------------------------------------------------------

    /// Handle an inbound `ReplicaStore`.
    ///
    /// If a download is pending for this filename the chunk fulfills it and
    /// nothing else changes. Otherwise we store the chunk, add ourselves to
    /// the record's replica set, and broadcast the updated record; that
    /// broadcast is the acknowledgment.
    pub async fn store_replica(&self, chunk: ReplicaChunk) -> Result<(), ReplicaError> {
        if let Some(waiter) = self.pending().remove(&chunk.filename) {
            debug!(filename = %chunk.filename, "replica chunk fulfills pending download");
            let _ = waiter.send(chunk);
            return Ok(());
        }

        self.store
            .write_chunk(&chunk.filename, chunk.index, chunk.total, &chunk.data)
            .await?;

        let record = self
            .catalog()
            .add_replica(&chunk.filename, &chunk.uploader, &self.me.id);
        info!(filename = %chunk.filename, uploader = %chunk.uploader, "replica stored");

        self.membership
            .broadcast(&Message::CatalogSync(vec![record]));
        Ok(())
    }

    /// Handle an inbound `ReplicaRequest`: read our replica and push it back
    /// to the requester as a `ReplicaStore`.
    pub async fn handle_fetch(
        &self,
        from_host: &str,
        fetch: ReplicaFetch,
    ) -> Result<(), ReplicaError> {
        let uploader = self
            .catalog()
            .get(&fetch.filename)
            .map(|r| r.uploader.clone())
            .ok_or_else(|| ReplicaError::UnknownFile(fetch.filename.clone()))?;

        let data = self.store.read_replica(&fetch.filename).await?;
        let reply = Message::ReplicaStore(ReplicaChunk {
            filename: fetch.filename.clone(),
            uploader,
            index: fetch.index,
            total: fetch.total,
            data,
        });
        if !self.membership.send(from_host, &reply) {
            return Err(ReplicaError::Transport(from_host.to_string()));
        }
        debug!(filename = %fetch.filename, to = from_host, "served replica request");
        Ok(())
    }

    /// Handle an inbound `Delete`: drop our storage copy and catalog record.
    pub async fn handle_delete(&self, filename: &str) {
        let held = self
            .catalog()
            .get(filename)
            .is_some_and(|r| r.holds_replica(&self.me.id));
        if held {
            if let Err(e) = self.store.remove_file(filename).await {
                warn!(filename, error = %e, "failed to remove deleted replica");
            }
        }
        if self.catalog().remove(filename).is_some() {
            info!(filename, "remote delete applied");
        }
    }

    /// Merge a remote catalog snapshot (`CatalogSync`).
    pub fn merge(&self, records: Vec<FileRecord>) {
        debug!(records = records.len(), "merging catalog snapshot");
        self.catalog().merge(records);
    }
}
