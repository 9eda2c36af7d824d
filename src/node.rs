//! # High-Level Node API
//!
//! A [`Node`] wires the components into one running process: the TCP
//! listener, one reader loop per connection, the periodic heartbeat and
//! liveness workers, and the startup mesh-join. The interactive CLI and the
//! integration tests both drive the mesh exclusively through this facade.
//!
//! ## Workers
//!
//! | Worker | Job |
//! |--------|-----|
//! | accept loop | register inbound sockets, spawn their reader loops |
//! | reader loop (per connection) | decode frames, dispatch messages |
//! | heartbeat | `broadcast_heartbeats` every heartbeat interval |
//! | sweep | disconnect dead / never-verified peers |
//!
//! Within one connection messages are processed strictly in arrival order
//! (one reader per socket). There is no cross-connection ordering; a `Host`
//! gossip and a `CatalogSync` from different peers may interleave
//! arbitrarily, which the idempotent catalog merge absorbs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::FileRecord;
use crate::directory::PeerDirectory;
use crate::identity::SelfIdentity;
use crate::membership::{ConnectError, Membership};
use crate::peer::{Origin, Timing};
use crate::replica::{PlacementPolicy, ReplicaError, ReplicaManager, ReplicateToAll};
use crate::storage::FsStore;
use crate::wire::{Frame, Message};

/// Default mesh listen port.
pub const DEFAULT_PORT: u16 = 8889;

/// Everything a node needs to start.
pub struct NodeConfig {
    pub me: SelfIdentity,
    /// Address the listener binds to; the advertised host may differ (NAT).
    pub bind_host: String,
    /// Peer directory file (hosts + identities persisted across restarts).
    pub directory_path: PathBuf,
    /// Root directory for stored replicas.
    pub data_dir: PathBuf,
    pub timing: Timing,
}

impl NodeConfig {
    pub fn new(me: SelfIdentity, directory_path: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            me,
            bind_host: "0.0.0.0".to_string(),
            directory_path,
            data_dir,
            timing: Timing::default(),
        }
    }
}

/// One row of the `nodes` listing.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub host: String,
    pub id: Option<String>,
    pub connected: bool,
    pub verified: bool,
}

/// Aggregate counts for the `netinfo` command.
#[derive(Clone, Debug)]
pub struct NetInfo {
    pub seen: usize,
    pub connected: usize,
    pub verified: usize,
    pub identities: Vec<String>,
}

/// A running mesh node.
pub struct Node {
    membership: Membership,
    replicas: Arc<ReplicaManager>,
    workers: Vec<JoinHandle<()>>,
}

impl Node {
    /// Start a node with the baseline replicate-to-all placement policy.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        Self::start_with_policy(config, Arc::new(ReplicateToAll)).await
    }

    pub async fn start_with_policy(
        config: NodeConfig,
        policy: Arc<dyn PlacementPolicy>,
    ) -> Result<Self> {
        let directory = Arc::new(PeerDirectory::open(&config.directory_path));
        // A listener pinned to one interface means outbound sockets should
        // carry that same source address.
        let source_ip = config
            .bind_host
            .parse::<std::net::IpAddr>()
            .ok()
            .filter(|ip| !ip.is_unspecified());
        let membership = Membership::new(config.me.clone(), config.timing, directory)
            .with_source_ip(source_ip);
        membership
            .load_directory()
            .await
            .context("loading peer directory")?;

        let store = Arc::new(
            FsStore::open(&config.data_dir)
                .await
                .context("opening replica storage")?,
        );
        let replicas = Arc::new(ReplicaManager::new(
            config.me.clone(),
            membership.clone(),
            store,
            policy,
        ));

        let listener = bind_listener(&config.bind_host, config.me.port)
            .await
            .with_context(|| {
                format!("binding listener on {}:{}", config.bind_host, config.me.port)
            })?;
        info!(
            host = %config.me.host,
            port = config.me.port,
            id = %config.me.id,
            "node listening"
        );

        let mut workers = Vec::new();

        // Accept loop: every inbound socket gets registered and a reader.
        {
            let membership = membership.clone();
            let replicas = replicas.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let (stream, addr) = match listener.accept().await {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let host = addr.ip().to_string();
                    info!(host = %host, "contacted by node");
                    match membership.register(&host, Origin::Inbound, stream) {
                        Some(read) => {
                            spawn_reader(membership.clone(), replicas.clone(), host, read);
                        }
                        None => debug!(host = %host, "inbound connection rejected, already connected"),
                    }
                }
            }));
        }

        // Heartbeat broadcast worker.
        {
            let membership = membership.clone();
            let interval = config.timing.heartbeat_interval;
            workers.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    membership.broadcast_heartbeats();
                }
            }));
        }

        // Liveness / verification-deadline sweep worker.
        {
            let membership = membership.clone();
            let interval = config.timing.verify_deadline;
            workers.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    membership.sweep();
                }
            }));
        }

        Ok(Self {
            membership,
            replicas,
            workers,
        })
    }

    /// Connect to every previously seen host (the startup mesh-join).
    /// Failures are logged; a host that stays down is retried on the next
    /// explicit `join`.
    pub async fn join(&self) {
        let hosts = self.membership.seen_hosts();
        if hosts.is_empty() {
            info!("no previously seen hosts to join");
        }
        for host in hosts {
            if let Err(e) = self.connect(&host).await {
                info!(host = %host, error = %e, "join attempt failed");
            }
        }
    }

    /// Connect to one host and start its reader loop.
    pub async fn connect(&self, host: &str) -> Result<()> {
        match self.membership.connect_to_host(host).await {
            Ok(Some(read)) => {
                spawn_reader(
                    self.membership.clone(),
                    self.replicas.clone(),
                    host.to_string(),
                    read,
                );
                Ok(())
            }
            Ok(None) => Ok(()), // already connected
            Err(e) => Err(e.into()),
        }
    }

    pub fn me(&self) -> &SelfIdentity {
        self.membership.me()
    }

    pub async fn upload(&self, path: &std::path::Path, priority: u8) -> Result<Vec<String>, ReplicaError> {
        self.replicas.upload(path, priority).await
    }

    pub async fn download(&self, filename: &str, dest: &std::path::Path) -> Result<(), ReplicaError> {
        self.replicas.download(filename, dest).await
    }

    pub async fn delete(&self, filename: &str) -> Result<(), ReplicaError> {
        self.replicas.delete(filename).await
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.replicas.files()
    }

    /// Every seen host with its current standing.
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .membership
            .seen_hosts()
            .into_iter()
            .map(|host| PeerInfo {
                id: self.membership.id_of(&host),
                connected: self.membership.is_connected(&host),
                verified: self.membership.is_verified(&host),
                host,
            })
            .collect();
        peers.sort_by(|a, b| a.host.cmp(&b.host));
        peers
    }

    pub fn netinfo(&self) -> NetInfo {
        let mut identities = self.membership.known_identities();
        identities.sort();
        NetInfo {
            seen: self.membership.seen_hosts().len(),
            connected: self.membership.connected_hosts().len(),
            verified: self.membership.verified_hosts().len(),
            identities,
        }
    }

    /// Stop the workers and drop every connection. The process-wide
    /// equivalent is just exiting; this exists for orderly shutdown and for
    /// tests that take nodes offline.
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
        self.membership.disconnect_all();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind the mesh listener with SO_REUSEADDR so a restarted node can reclaim
/// the port while old connections sit in TIME_WAIT.
async fn bind_listener(bind_host: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr = tokio::net::lookup_host((bind_host, port))
        .await?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address for {bind_host}"),
            )
        })?;
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// Spawn the reader loop for one registered connection.
fn spawn_reader(
    membership: Membership,
    replicas: Arc<ReplicaManager>,
    host: String,
    read: OwnedReadHalf,
) {
    tokio::spawn(run_reader(membership, replicas, host, read));
}

/// Blocking read loop for one connection: decode a frame, dispatch, repeat.
/// Any transport or protocol error tears the connection down; nothing here
/// is fatal to the process.
async fn run_reader(
    membership: Membership,
    replicas: Arc<ReplicaManager>,
    host: String,
    mut read: OwnedReadHalf,
) {
    loop {
        let frame = match Frame::read(&mut read).await {
            Ok(frame) => frame,
            Err(e) if e.is_protocol_error() => {
                warn!(host = %host, error = %e, "protocol error, closing connection");
                membership.disconnect(&host);
                return;
            }
            Err(e) => {
                debug!(host = %host, error = %e, "connection closed");
                membership.disconnect(&host);
                return;
            }
        };

        // Any decodable traffic counts as liveness.
        membership.record_heartbeat(&host);

        let msg = match Message::from_frame(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(host = %host, error = %e, "undecodable payload, closing connection");
                membership.disconnect(&host);
                return;
            }
        };

        if !dispatch(&membership, &replicas, &host, msg).await {
            return;
        }
    }
}

/// Handle one inbound message. Returns false when the connection must stop.
async fn dispatch(
    membership: &Membership,
    replicas: &Arc<ReplicaManager>,
    host: &str,
    msg: Message,
) -> bool {
    // Everything beyond the handshake and liveness requires a verified peer.
    if !matches!(msg, Message::Verify { .. } | Message::Heartbeat)
        && !membership.is_verified(host)
    {
        warn!(host, tag = ?msg.tag(), "message from unverified peer, closing");
        membership.disconnect(host);
        return false;
    }

    match msg {
        Message::Verify { id } => match membership.verify_host(host, &id).await {
            Ok(outcome) => {
                if outcome.newly_verified {
                    if outcome.reply_with_verify {
                        // Callee side: announce our own identity back over
                        // the same socket, completing the bidirectional link.
                        membership.send(
                            host,
                            &Message::Verify {
                                id: membership.me().id.clone(),
                            },
                        );
                    }
                    post_handshake_exchange(membership, replicas, host);
                }
            }
            Err(e) => {
                info!(host, id, error = %e, "verification failed, closing connection");
                membership.disconnect(host);
                return false;
            }
        },
        Message::Heartbeat => {
            debug!(host, "heartbeat received");
        }
        Message::Host { host: new_host } => {
            let me = membership.me().host.clone();
            if new_host != me && !membership.is_connected(&new_host) {
                info!(from = host, new_host = %new_host, "gossiped host, connecting");
                let membership = membership.clone();
                let replicas = replicas.clone();
                tokio::spawn(async move {
                    match membership.connect_to_host(&new_host).await {
                        Ok(Some(read)) => {
                            spawn_reader(membership.clone(), replicas, new_host, read);
                        }
                        Ok(None) => {}
                        Err(ConnectError::SelfConnection) => {}
                        Err(e) => info!(host = %new_host, error = %e, "gossip connect failed"),
                    }
                });
            }
        }
        Message::ReplicaStore(chunk) => {
            if let Err(e) = replicas.store_replica(chunk).await {
                warn!(host, error = %e, "failed to store replica");
            }
        }
        Message::ReplicaRequest(fetch) => {
            if let Err(e) = replicas.handle_fetch(host, fetch).await {
                warn!(host, error = %e, "failed to serve replica request");
            }
        }
        Message::Delete { filename } => {
            replicas.handle_delete(&filename).await;
        }
        Message::CatalogSync(records) => {
            replicas.merge(records);
        }
        Message::IdList(ids) => {
            membership.add_identities(ids).await;
        }
    }
    true
}

/// After verifying a peer, share what we know: the identity table and our
/// catalog snapshot. Both are idempotent on the receiving side, so it does
/// not matter that each side sends its own copy.
fn post_handshake_exchange(membership: &Membership, replicas: &Arc<ReplicaManager>, host: &str) {
    membership.send(host, &Message::IdList(membership.known_identities()));
    let snapshot = replicas.files();
    if !snapshot.is_empty() {
        membership.send(host, &Message::CatalogSync(snapshot));
    }
}
