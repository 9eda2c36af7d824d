//! # Peer Directory Store
//!
//! Persisted list of known hosts and known logical identities, read once at
//! startup to seed the membership registry and appended to whenever a newly
//! verified or newly gossiped host (or a newly learned identity) should be
//! remembered across restarts.
//!
//! The file is plain JSON so operators can hand-edit the bootstrap list:
//!
//! ```json
//! { "hosts": ["10.0.0.7"], "identities": ["ryan", "alice"] }
//! ```
//!
//! Appends are read-modify-write of the whole file. That is fine at this
//! scale; the directory changes a handful of times per run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    identities: Vec<String>,
}

/// Handle to the on-disk peer directory.
pub struct PeerDirectory {
    path: PathBuf,
    /// Serializes read-modify-write cycles from concurrent appends.
    write_lock: tokio::sync::Mutex<()>,
}

impl PeerDirectory {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load `(hosts, identities)`. A missing file is an empty directory, not
    /// an error; a corrupt file is an error so a typo does not silently wipe
    /// the peer list.
    pub async fn load(&self) -> Result<(Vec<String>, Vec<String>)> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Vec::new(), Vec::new()));
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read peer directory {}", self.path.display())
                });
            }
        };
        let file: DirectoryFile = serde_json::from_slice(&raw).with_context(|| {
            format!("peer directory {} is not valid JSON", self.path.display())
        })?;
        Ok((file.hosts, file.identities))
    }

    /// Remember a host across restarts. Duplicate appends are ignored.
    pub async fn append_host(&self, host: &str) -> Result<()> {
        let added = self
            .append(|file| {
                if file.hosts.iter().any(|h| h == host) {
                    false
                } else {
                    file.hosts.push(host.to_string());
                    true
                }
            })
            .await?;
        if added {
            info!(host, "added host to peer directory");
        }
        Ok(())
    }

    /// Remember a logical identity across restarts. Duplicates are ignored.
    pub async fn append_identity(&self, id: &str) -> Result<()> {
        self.append(|file| {
            if file.identities.iter().any(|i| i == id) {
                false
            } else {
                file.identities.push(id.to_string());
                true
            }
        })
        .await?;
        Ok(())
    }

    async fn append(&self, mutate: impl FnOnce(&mut DirectoryFile) -> bool) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let (hosts, identities) = self.load().await?;
        let mut file = DirectoryFile { hosts, identities };
        if !mutate(&mut file) {
            return Ok(false);
        }
        let raw = serde_json::to_vec_pretty(&file).context("serializing peer directory")?;
        tokio::fs::write(&self.path, raw).await.with_context(|| {
            format!("failed to write peer directory {}", self.path.display())
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let directory = PeerDirectory::open(dir.path().join("peers.json"));
        let (hosts, ids) = directory.load().await.unwrap();
        assert!(hosts.is_empty() && ids.is_empty());
    }

    #[tokio::test]
    async fn appends_persist_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        let directory = PeerDirectory::open(&path);

        directory.append_host("10.0.0.7").await.unwrap();
        directory.append_host("10.0.0.7").await.unwrap();
        directory.append_identity("ryan").await.unwrap();

        let reopened = PeerDirectory::open(&path);
        let (hosts, ids) = reopened.load().await.unwrap();
        assert_eq!(hosts, vec!["10.0.0.7"]);
        assert_eq!(ids, vec!["ryan"]);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        assert!(PeerDirectory::open(&path).load().await.is_err());
    }
}
