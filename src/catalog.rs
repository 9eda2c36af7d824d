//! # Replica Catalog
//!
//! The catalog maps each filename to its [`FileRecord`]: who uploaded it and
//! which logical ids currently hold a replica. Every node keeps its own
//! catalog and reconciles it with peers through [`Catalog::merge`], which is
//! idempotent and commutative so snapshots can arrive twice or out of order
//! without corrupting the replica sets.
//!
//! The catalog is pure bookkeeping. It never touches sockets or disk; the
//! replica manager drives it and owns the locking.
//!
//! Known gap: deletes are propagated as explicit messages with no tombstone
//! recorded here, so a snapshot merged after a delete can resurrect the
//! record. The consistency model of the original system leaves this open.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Catalog entry for one replicated file.
///
/// The uploader is eligible to hold a replica but is not added to the
/// replica set automatically; it appears there only once it actually stores
/// a chunk like any other peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub uploader: String,
    /// Logical ids known to hold a replica. Ordered so snapshots serialize
    /// deterministically.
    pub replicas: BTreeSet<String>,
}

impl FileRecord {
    pub fn new(filename: impl Into<String>, uploader: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            uploader: uploader.into(),
            replicas: BTreeSet::new(),
        }
    }

    pub fn with_replica(mut self, id: impl Into<String>) -> Self {
        self.replicas.insert(id.into());
        self
    }

    pub fn holds_replica(&self, id: &str) -> bool {
        self.replicas.contains(id)
    }
}

/// Filename-keyed catalog of file records.
#[derive(Debug, Default)]
pub struct Catalog {
    files: HashMap<String, FileRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, filename: &str) -> Option<&FileRecord> {
        self.files.get(filename)
    }

    /// Insert a fresh record, replacing any prior record for the filename.
    pub fn insert(&mut self, record: FileRecord) {
        self.files.insert(record.filename.clone(), record);
    }

    /// Record that `id` now holds a replica of `filename`. Creates the
    /// record if this is the first sighting of the file.
    ///
    /// Returns a snapshot of the updated record for acknowledgment gossip.
    pub fn add_replica(&mut self, filename: &str, uploader: &str, id: &str) -> FileRecord {
        let record = self
            .files
            .entry(filename.to_string())
            .or_insert_with(|| FileRecord::new(filename, uploader));
        record.replicas.insert(id.to_string());
        record.clone()
    }

    pub fn remove(&mut self, filename: &str) -> Option<FileRecord> {
        self.files.remove(filename)
    }

    /// Merge one remote record: create it if the filename+uploader pair is
    /// unknown, otherwise union the replica sets. A record whose filename is
    /// present locally under a different uploader is kept local-side and the
    /// remote copy ignored; clobbering an existing upload on merge would lose
    /// replica information silently.
    pub fn merge_record(&mut self, remote: FileRecord) {
        match self.files.get_mut(&remote.filename) {
            None => {
                self.files.insert(remote.filename.clone(), remote);
            }
            Some(local) if local.uploader == remote.uploader => {
                local.replicas.extend(remote.replicas);
            }
            Some(local) => {
                tracing::warn!(
                    filename = %remote.filename,
                    local_uploader = %local.uploader,
                    remote_uploader = %remote.uploader,
                    "catalog merge: uploader conflict, keeping local record"
                );
            }
        }
    }

    /// Merge a remote snapshot. Idempotent and commutative for records that
    /// agree on uploader.
    pub fn merge(&mut self, records: Vec<FileRecord>) {
        for record in records {
            self.merge_record(record);
        }
    }

    /// Point-in-time copy of every record, sorted by filename.
    pub fn snapshot(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.files.values().cloned().collect();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        records
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(filename: &str, uploader: &str, replicas: &[&str]) -> FileRecord {
        let mut r = FileRecord::new(filename, uploader);
        for id in replicas {
            r.replicas.insert(id.to_string());
        }
        r
    }

    #[test]
    fn add_replica_creates_then_extends() {
        let mut catalog = Catalog::new();
        let first = catalog.add_replica("report.txt", "ryan", "bob");
        assert_eq!(first.replicas.len(), 1);
        let second = catalog.add_replica("report.txt", "ryan", "carol");
        assert!(second.holds_replica("bob"));
        assert!(second.holds_replica("carol"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let snapshot = vec![record("a.txt", "ryan", &["bob", "carol"])];
        let mut catalog = Catalog::new();
        catalog.merge(snapshot.clone());
        catalog.merge(snapshot.clone());
        assert_eq!(catalog.snapshot(), snapshot);
    }

    #[test]
    fn merge_is_commutative() {
        let s1 = vec![
            record("a.txt", "ryan", &["bob"]),
            record("b.txt", "alice", &["carol"]),
        ];
        let s2 = vec![
            record("a.txt", "ryan", &["dave"]),
            record("c.txt", "bob", &[]),
        ];

        let mut forward = Catalog::new();
        forward.merge(s1.clone());
        forward.merge(s2.clone());

        let mut reverse = Catalog::new();
        reverse.merge(s2);
        reverse.merge(s1);

        assert_eq!(forward.snapshot(), reverse.snapshot());
        let merged = forward.get("a.txt").unwrap();
        assert!(merged.holds_replica("bob") && merged.holds_replica("dave"));
    }

    #[test]
    fn merge_unions_replica_sets() {
        let mut catalog = Catalog::new();
        catalog.insert(record("a.txt", "ryan", &["bob"]));
        catalog.merge(vec![record("a.txt", "ryan", &["carol"])]);
        let r = catalog.get("a.txt").unwrap();
        assert_eq!(r.replicas.len(), 2);
    }

    #[test]
    fn merge_keeps_local_on_uploader_conflict() {
        let mut catalog = Catalog::new();
        catalog.insert(record("a.txt", "ryan", &["bob"]));
        catalog.merge(vec![record("a.txt", "impostor", &["eve"])]);
        let r = catalog.get("a.txt").unwrap();
        assert_eq!(r.uploader, "ryan");
        assert!(!r.holds_replica("eve"));
    }

    #[test]
    fn remove_then_merge_resurrects_without_tombstones() {
        // Documents the known gap: no tombstones, so a stale snapshot brings
        // a deleted record back.
        let mut catalog = Catalog::new();
        catalog.insert(record("a.txt", "ryan", &["bob"]));
        catalog.remove("a.txt");
        assert!(catalog.is_empty());
        catalog.merge(vec![record("a.txt", "ryan", &["bob"])]);
        assert!(catalog.get("a.txt").is_some());
    }
}
