//! # Membership Registry & Gossip
//!
//! The authoritative, concurrently-accessed view of the mesh: every host
//! ever encountered (`seen`), hosts with a live socket (`connected`), hosts
//! whose identity has been confirmed (`verified`), and the host <-> id
//! bindings for verified peers. The registry owns the verification
//! handshake, the one-hop gossip broadcast, heartbeat fan-out, and the
//! liveness/verification sweeps.
//!
//! ## Invariants
//!
//! - `verified ⊆ connected ⊆ seen`
//! - `host_to_id[h] == id` iff `id_to_host[id] == h`, for every verified host
//! - removing a host from `connected` atomically removes it from `verified`
//!   and clears both map entries
//!
//! ## Locking discipline
//!
//! All state lives behind one mutex with short, await-free critical
//! sections. Broadcasts snapshot `(host, sender)` pairs under the lock and
//! send after releasing it, so a disconnect triggered concurrently by
//! another connection's reader can never deadlock or invalidate the
//! iteration. Sends go through each peer's bounded outbound queue and never
//! block on the socket.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::directory::PeerDirectory;
use crate::identity::SelfIdentity;
use crate::peer::{self, Origin, PeerConnection, PeerState, Timing, OUTBOUND_QUEUE};
use crate::wire::{Frame, Message};

// ============================================================================
// Errors
// ============================================================================

/// Why a verification handshake was refused. Either way the connection is
/// closed and the host never enters `verified`.
#[derive(Debug)]
pub enum VerifyError {
    /// The announced id is not in the known-identities table.
    UnknownIdentity(String),
    /// The id is already bound to a different live host.
    IdentityInUse { id: String, bound_to: String },
    /// No live connection exists for the host being verified.
    NotConnected(String),
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::UnknownIdentity(id) => write!(f, "identity {id} not recognized"),
            VerifyError::IdentityInUse { id, bound_to } => {
                write!(f, "identity {id} already bound to {bound_to}")
            }
            VerifyError::NotConnected(host) => write!(f, "host {host} is not connected"),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Why an outbound connection attempt produced no reader loop.
#[derive(Debug)]
pub enum ConnectError {
    /// Refusing to connect to our own advertised host.
    SelfConnection,
    /// TCP connect failed or timed out. The host stays in `seen` and remains
    /// eligible for retry; there is no automatic backoff.
    Transport(std::io::Error),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::SelfConnection => write!(f, "refusing to connect to self"),
            ConnectError::Transport(e) => write!(f, "connect failed: {e}"),
        }
    }
}

impl std::error::Error for ConnectError {}

// ============================================================================
// Registry
// ============================================================================

/// Result of a successful verification, consumed by the connection's reader
/// loop to finish the handshake.
#[derive(Debug)]
pub struct VerifyOutcome {
    /// False when the host was already verified under the same id (a
    /// redundant `Verify` is harmless).
    pub newly_verified: bool,
    /// The callee answers with its own `Verify` so the link verifies in both
    /// directions over the one socket.
    pub reply_with_verify: bool,
}

#[derive(Default)]
struct State {
    seen: HashSet<String>,
    connected: HashSet<String>,
    verified: HashSet<String>,
    host_to_id: HashMap<String, String>,
    id_to_host: HashMap<String, String>,
    /// Known-identities table: ids allowed to verify, seeded from the peer
    /// directory. Bound ids additionally appear in `id_to_host`.
    identities: HashSet<String>,
    /// Hosts already persisted to the peer directory.
    persisted: HashSet<String>,
    peers: HashMap<String, PeerConnection>,
}

/// Cheap-to-clone handle to the shared membership registry.
#[derive(Clone)]
pub struct Membership {
    me: SelfIdentity,
    timing: Timing,
    /// Source address for outbound connects, when the node is bound to a
    /// specific interface.
    source_ip: Option<std::net::IpAddr>,
    state: Arc<Mutex<State>>,
    directory: Arc<PeerDirectory>,
}

impl Membership {
    pub fn new(me: SelfIdentity, timing: Timing, directory: Arc<PeerDirectory>) -> Self {
        let mut state = State::default();
        // Our own id is a known identity by definition.
        state.identities.insert(me.id.clone());
        Self {
            me,
            timing,
            source_ip: None,
            state: Arc::new(Mutex::new(state)),
            directory,
        }
    }

    /// Bind outbound connections to this source address. Set when the
    /// listener is bound to a specific interface rather than 0.0.0.0.
    pub fn with_source_ip(mut self, ip: Option<std::net::IpAddr>) -> Self {
        self.source_ip = ip;
        self
    }

    /// Read the peer directory once and seed `seen` plus the identity table.
    pub async fn load_directory(&self) -> anyhow::Result<()> {
        let (hosts, identities) = self.directory.load().await?;
        let mut st = self.state();
        for host in hosts {
            if host != self.me.host {
                st.seen.insert(host.clone());
            }
            st.persisted.insert(host);
        }
        for id in identities {
            st.identities.insert(id);
        }
        info!(
            seen = st.seen.len(),
            identities = st.identities.len(),
            "membership seeded from peer directory"
        );
        Ok(())
    }

    pub fn me(&self) -> &SelfIdentity {
        &self.me
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Register a live socket for `host` and hand back the read half for the
    /// caller's reader loop. One live connection per host: a second attempt
    /// for an already-connected host is rejected and its socket dropped.
    pub fn register(
        &self,
        host: &str,
        origin: Origin,
        stream: TcpStream,
    ) -> Option<OwnedReadHalf> {
        let (read, write) = stream.into_split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        {
            let mut st = self.state();
            if st.connected.contains(host) {
                debug!(host, "rejecting duplicate connection");
                return None;
            }
            st.seen.insert(host.to_string());
            st.connected.insert(host.to_string());
            st.peers.insert(
                host.to_string(),
                PeerConnection::new(host.to_string(), self.me.port, origin, tx),
            );
        }
        peer::spawn_writer(host.to_string(), write, rx);
        Some(read)
    }

    /// Initiate an outbound connection and immediately announce our id.
    ///
    /// `Ok(None)` means the host was already connected (or became connected
    /// while we were dialing); `Ok(Some(read))` hands the caller the read
    /// half to drive. Transport failure leaves the host in `seen` only.
    pub async fn connect_to_host(
        &self,
        host: &str,
    ) -> Result<Option<OwnedReadHalf>, ConnectError> {
        if host == self.me.host {
            return Err(ConnectError::SelfConnection);
        }
        {
            let mut st = self.state();
            st.seen.insert(host.to_string());
            if st.connected.contains(host) {
                return Ok(None);
            }
        }

        info!(host, "attempting to connect");
        let stream = peer::connect(
            host,
            self.me.port,
            self.timing.connect_timeout,
            self.source_ip,
        )
        .await
        .map_err(ConnectError::Transport)?;

        let Some(read) = self.register(host, Origin::Outbound, stream) else {
            return Ok(None);
        };
        // The initiator speaks first: send credentials right away.
        self.send(
            host,
            &Message::Verify {
                id: self.me.id.clone(),
            },
        );
        info!(host, "connection succeeded, awaiting verification");
        Ok(Some(read))
    }

    /// Tear down the connection for `host`. Atomically drops it from
    /// `connected` and `verified` and clears both map entries; the peer's
    /// writer task exits once its queue sender is dropped, closing the
    /// socket.
    pub fn disconnect(&self, host: &str) {
        let mut st = self.state();
        let had_connection = st.connected.remove(host);
        st.verified.remove(host);
        st.peers.remove(host);
        if let Some(id) = st.host_to_id.remove(host) {
            st.id_to_host.remove(&id);
        }
        drop(st);
        if had_connection {
            info!(host, "disconnected");
        }
    }

    /// Drop every live connection. Used at shutdown.
    pub fn disconnect_all(&self) {
        let hosts: Vec<String> = self.state().connected.iter().cloned().collect();
        for host in hosts {
            self.disconnect(&host);
        }
    }

    // ------------------------------------------------------------------
    // Verification handshake & gossip
    // ------------------------------------------------------------------

    /// Handle a `Verify(id)` received from `host`.
    ///
    /// Succeeds only if the id is in the known-identities table and not
    /// currently bound to a different live host. On success the host is
    /// marked verified, the bindings committed, the host persisted if newly
    /// seen this run, and `Host(host)` gossiped to every other verified
    /// peer. On failure the connection is closed; the host stays in `seen`.
    pub async fn verify_host(&self, host: &str, id: &str) -> Result<VerifyOutcome, VerifyError> {
        let (outcome, persist, gossip_to) = {
            let mut st = self.state();
            if !st.connected.contains(host) || !st.peers.contains_key(host) {
                return Err(VerifyError::NotConnected(host.to_string()));
            }
            if !st.identities.contains(id) {
                return Err(VerifyError::UnknownIdentity(id.to_string()));
            }
            match st.id_to_host.get(id) {
                Some(bound) if bound != host => {
                    return Err(VerifyError::IdentityInUse {
                        id: id.to_string(),
                        bound_to: bound.clone(),
                    });
                }
                _ => {}
            }

            if st.verified.contains(host) {
                // Redundant Verify under the same id; nothing to commit.
                return Ok(VerifyOutcome {
                    newly_verified: false,
                    reply_with_verify: false,
                });
            }

            st.verified.insert(host.to_string());
            st.host_to_id.insert(host.to_string(), id.to_string());
            st.id_to_host.insert(id.to_string(), host.to_string());

            let peer = st
                .peers
                .get_mut(host)
                .ok_or_else(|| VerifyError::NotConnected(host.to_string()))?;
            peer.mark_verified();
            peer.record_heartbeat();
            let reply_with_verify = peer.origin == Origin::Inbound;

            let persist = st.persisted.insert(host.to_string());

            // Snapshot gossip targets under the lock, send after releasing.
            let gossip_to: Vec<(String, mpsc::Sender<Frame>)> = st
                .verified
                .iter()
                .filter(|h| h.as_str() != host)
                .filter_map(|h| st.peers.get(h).map(|p| (h.clone(), p.sender())))
                .collect();

            (
                VerifyOutcome {
                    newly_verified: true,
                    reply_with_verify,
                },
                persist,
                gossip_to,
            )
        };

        info!(host, id, "host identity verified");

        if persist {
            if let Err(e) = self.directory.append_host(host).await {
                warn!(host, error = %e, "failed to persist host to peer directory");
            }
        }

        // Host payloads are plain UTF-8 and always encode.
        let Ok(frame) = (Message::Host {
            host: host.to_string(),
        })
        .to_frame() else {
            return Ok(outcome);
        };
        for (peer_host, sender) in gossip_to {
            debug!(new_host = host, to = %peer_host, "gossiping verified host");
            if sender.try_send(frame.clone()).is_err() {
                debug!(to = %peer_host, "gossip send failed, peer queue closed");
            }
        }

        Ok(outcome)
    }

    /// Learn identities shared by a verified peer (`IdList`). New ids are
    /// appended to the peer directory so they survive restarts.
    pub async fn add_identities(&self, ids: Vec<String>) {
        let new_ids: Vec<String> = {
            let mut st = self.state();
            ids.into_iter()
                .filter(|id| st.identities.insert(id.clone()))
                .collect()
        };
        for id in &new_ids {
            debug!(id = %id, "learned new identity");
            if let Err(e) = self.directory.append_identity(id).await {
                warn!(id = %id, error = %e, "failed to persist identity");
            }
        }
    }

    // ------------------------------------------------------------------
    // Heartbeats & liveness
    // ------------------------------------------------------------------

    /// Record liveness traffic from `host`.
    pub fn record_heartbeat(&self, host: &str) {
        let mut st = self.state();
        match st.peers.get_mut(host) {
            Some(peer) => peer.record_heartbeat(),
            None => debug!(host, "liveness traffic from unregistered host"),
        }
    }

    /// Send a heartbeat to every verified peer. Iterates a point-in-time
    /// snapshot; a send failure means the writer died, so the peer is
    /// disconnected immediately.
    pub fn broadcast_heartbeats(&self) {
        let targets: Vec<(String, mpsc::Sender<Frame>)> = {
            let st = self.state();
            st.verified
                .iter()
                .filter_map(|h| st.peers.get(h).map(|p| (h.clone(), p.sender())))
                .collect()
        };

        // Heartbeats are empty frames and always encode.
        let Ok(frame) = Message::Heartbeat.to_frame() else {
            return;
        };
        for (host, sender) in targets {
            if sender.try_send(frame.clone()).is_ok() {
                debug!(host = %host, "heartbeat sent");
            } else {
                info!(host = %host, "heartbeat failed, disconnecting");
                self.disconnect(&host);
            }
        }
    }

    /// Disconnect peers with no liveness traffic past the dead timeout, and
    /// force-close connections that sat unverified past the verification
    /// deadline.
    pub fn sweep(&self) {
        let (dead, expired): (Vec<String>, Vec<String>) = {
            let st = self.state();
            let dead = st
                .peers
                .values()
                .filter(|p| p.state == PeerState::Verified && !p.is_alive(self.timing.dead_after))
                .map(|p| p.host.clone())
                .collect();
            let expired = st
                .peers
                .values()
                .filter(|p| p.verification_expired(self.timing.verify_deadline))
                .map(|p| p.host.clone())
                .collect();
            (dead, expired)
        };

        for host in dead {
            info!(host = %host, "peer dead (heartbeat timeout), disconnecting");
            self.disconnect(&host);
        }
        for host in expired {
            info!(host = %host, "peer never verified, force-closing");
            self.disconnect(&host);
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Queue a message for `host`. Returns false if the host is not
    /// connected or its writer has died; the caller decides whether that is
    /// worth a disconnect.
    pub fn send(&self, host: &str, msg: &Message) -> bool {
        let frame = match msg.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(host, tag = ?msg.tag(), error = %e, "failed to encode outbound message");
                return false;
            }
        };
        let sender = {
            let st = self.state();
            st.peers.get(host).map(|p| p.sender())
        };
        match sender {
            Some(sender) => sender.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Queue a message for the host currently bound to `id`.
    pub fn send_to_id(&self, id: &str, msg: &Message) -> bool {
        match self.host_of(id) {
            Some(host) => self.send(&host, msg),
            None => false,
        }
    }

    /// Queue a message for every verified peer (snapshot iteration).
    pub fn broadcast(&self, msg: &Message) {
        let frame = match msg.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(tag = ?msg.tag(), error = %e, "failed to encode broadcast");
                return;
            }
        };
        let targets: Vec<mpsc::Sender<Frame>> = {
            let st = self.state();
            st.verified
                .iter()
                .filter_map(|h| st.peers.get(h).map(|p| p.sender()))
                .collect()
        };
        for sender in targets {
            let _ = sender.try_send(frame.clone());
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_connected(&self, host: &str) -> bool {
        self.state().connected.contains(host)
    }

    pub fn is_verified(&self, host: &str) -> bool {
        self.state().verified.contains(host)
    }

    pub fn seen_hosts(&self) -> Vec<String> {
        self.state().seen.iter().cloned().collect()
    }

    pub fn connected_hosts(&self) -> Vec<String> {
        self.state().connected.iter().cloned().collect()
    }

    pub fn verified_hosts(&self) -> Vec<String> {
        self.state().verified.iter().cloned().collect()
    }

    /// Logical ids of verified peers, the candidate set for replica
    /// placement. Enumeration order is not deterministic across runs.
    pub fn connected_ids(&self) -> Vec<String> {
        let st = self.state();
        st.verified
            .iter()
            .filter_map(|h| st.host_to_id.get(h).cloned())
            .collect()
    }

    pub fn id_of(&self, host: &str) -> Option<String> {
        self.state().host_to_id.get(host).cloned()
    }

    pub fn host_of(&self, id: &str) -> Option<String> {
        self.state().id_to_host.get(id).cloned()
    }

    pub fn known_identities(&self) -> Vec<String> {
        self.state().identities.iter().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Test hooks
    // ------------------------------------------------------------------

    /// Insert a socketless peer for state-machine tests.
    #[cfg(test)]
    pub(crate) fn register_test_peer(&self, host: &str, origin: Origin) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let mut st = self.state();
        st.seen.insert(host.to_string());
        st.connected.insert(host.to_string());
        st.peers.insert(
            host.to_string(),
            PeerConnection::new(host.to_string(), self.me.port, origin, tx),
        );
        rx
    }

    #[cfg(test)]
    pub(crate) fn backdate_peer_heartbeat(&self, host: &str, age: std::time::Duration) {
        if let Some(peer) = self.state().peers.get_mut(host) {
            peer.backdate_heartbeat(age);
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_peer_connection(&self, host: &str, age: std::time::Duration) {
        if let Some(peer) = self.state().peers.get_mut(host) {
            peer.backdate_connection(age);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Tag;
    use std::time::Duration;

    fn registry(dir: &tempfile::TempDir) -> Membership {
        let me = SelfIdentity::new("10.0.0.1", 8889, "ryan");
        let directory = Arc::new(PeerDirectory::open(dir.path().join("peers.json")));
        Membership::new(me, Timing::default(), directory)
    }

    #[tokio::test]
    async fn unknown_identity_never_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        let _rx = reg.register_test_peer("10.0.0.2", Origin::Inbound);

        let err = reg.verify_host("10.0.0.2", "stranger").await.unwrap_err();
        assert!(matches!(err, VerifyError::UnknownIdentity(_)));
        assert!(!reg.is_verified("10.0.0.2"));
    }

    #[tokio::test]
    async fn successful_verification_binds_maps() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add_identities(vec!["alice".into()]).await;
        let _rx = reg.register_test_peer("10.0.0.2", Origin::Inbound);

        let outcome = reg.verify_host("10.0.0.2", "alice").await.unwrap();
        assert!(outcome.newly_verified);
        assert!(outcome.reply_with_verify);
        assert!(reg.is_verified("10.0.0.2"));
        assert_eq!(reg.id_of("10.0.0.2").as_deref(), Some("alice"));
        assert_eq!(reg.host_of("alice").as_deref(), Some("10.0.0.2"));
        assert_eq!(reg.connected_ids(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn identity_bound_elsewhere_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add_identities(vec!["alice".into()]).await;
        let _rx1 = reg.register_test_peer("10.0.0.2", Origin::Inbound);
        let _rx2 = reg.register_test_peer("10.0.0.3", Origin::Inbound);

        reg.verify_host("10.0.0.2", "alice").await.unwrap();
        let err = reg.verify_host("10.0.0.3", "alice").await.unwrap_err();
        assert!(matches!(err, VerifyError::IdentityInUse { .. }));
        assert!(!reg.is_verified("10.0.0.3"));
    }

    #[tokio::test]
    async fn redundant_verify_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add_identities(vec!["alice".into()]).await;
        let _rx = reg.register_test_peer("10.0.0.2", Origin::Outbound);

        assert!(reg.verify_host("10.0.0.2", "alice").await.unwrap().newly_verified);
        let again = reg.verify_host("10.0.0.2", "alice").await.unwrap();
        assert!(!again.newly_verified);
        assert!(!again.reply_with_verify);
    }

    #[tokio::test]
    async fn verification_gossips_to_other_verified_peers() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add_identities(vec!["alice".into(), "bob".into()]).await;
        let mut rx_alice = reg.register_test_peer("10.0.0.2", Origin::Inbound);
        let _rx_bob = reg.register_test_peer("10.0.0.3", Origin::Inbound);

        reg.verify_host("10.0.0.2", "alice").await.unwrap();
        reg.verify_host("10.0.0.3", "bob").await.unwrap();

        // Alice should have been told about bob's host.
        let mut host_frames = Vec::new();
        while let Ok(frame) = rx_alice.try_recv() {
            if frame.tag == Tag::Host {
                host_frames.push(Message::from_frame(frame).unwrap());
            }
        }
        assert!(host_frames.contains(&Message::Host {
            host: "10.0.0.3".into()
        }));
    }

    #[tokio::test]
    async fn disconnect_clears_all_membership_state() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add_identities(vec!["alice".into()]).await;
        let _rx = reg.register_test_peer("10.0.0.2", Origin::Inbound);
        reg.verify_host("10.0.0.2", "alice").await.unwrap();

        reg.disconnect("10.0.0.2");
        assert!(!reg.is_connected("10.0.0.2"));
        assert!(!reg.is_verified("10.0.0.2"));
        assert!(reg.id_of("10.0.0.2").is_none());
        assert!(reg.host_of("alice").is_none());
        // Still seen: eligible for reconnect.
        assert!(reg.seen_hosts().contains(&"10.0.0.2".to_string()));
        // The identity is free to bind to a new host now.
        let _rx2 = reg.register_test_peer("10.0.0.4", Origin::Inbound);
        assert!(reg.verify_host("10.0.0.4", "alice").await.is_ok());
    }

    #[tokio::test]
    async fn sweep_kills_dead_and_unverified_peers() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        reg.add_identities(vec!["alice".into(), "bob".into()]).await;
        let _rx1 = reg.register_test_peer("10.0.0.2", Origin::Inbound);
        let _rx2 = reg.register_test_peer("10.0.0.3", Origin::Inbound);
        let _rx3 = reg.register_test_peer("10.0.0.4", Origin::Inbound);
        reg.verify_host("10.0.0.2", "alice").await.unwrap();
        reg.verify_host("10.0.0.3", "bob").await.unwrap();

        // One missed heartbeat cycle: still alive.
        reg.backdate_peer_heartbeat("10.0.0.2", Duration::from_secs(10));
        // Past the dead timeout.
        reg.backdate_peer_heartbeat("10.0.0.3", Duration::from_secs(13));
        // Unverified past the deadline.
        reg.backdate_peer_connection("10.0.0.4", Duration::from_secs(3));

        reg.sweep();
        assert!(reg.is_connected("10.0.0.2"));
        assert!(!reg.is_connected("10.0.0.3"));
        assert!(!reg.is_connected("10.0.0.4"));
    }

    #[tokio::test]
    async fn verified_hosts_persist_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        let me = SelfIdentity::new("10.0.0.1", 8889, "ryan");
        let directory = Arc::new(PeerDirectory::open(&path));
        let reg = Membership::new(me, Timing::default(), directory.clone());
        reg.add_identities(vec!["alice".into()]).await;
        let _rx = reg.register_test_peer("10.0.0.2", Origin::Inbound);
        reg.verify_host("10.0.0.2", "alice").await.unwrap();

        let (hosts, ids) = directory.load().await.unwrap();
        assert!(hosts.contains(&"10.0.0.2".to_string()));
        assert!(ids.contains(&"alice".to_string()));
    }
}
