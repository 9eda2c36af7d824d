//! # Peer Connection
//!
//! One live socket to one remote host. The read half is driven by the
//! per-connection reader loop in `node`; the write half is owned by a writer
//! task fed through a bounded mpsc queue, so senders never block on the
//! socket and no registry lock is ever held across a network write.
//!
//! A connection moves `Pending -> Verified` exactly once and never back. A
//! closed connection is simply dropped from the registry; reconnecting the
//! same host produces a fresh [`PeerConnection`].

use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::wire::Frame;

/// Outbound frames queued per peer before sends start failing. A peer that
/// cannot drain this many frames is effectively dead.
pub const OUTBOUND_QUEUE: usize = 64;

/// Protocol timing knobs. Defaults follow the deployed constants; tests
/// compress them to keep wall-clock time down.
#[derive(Clone, Copy, Debug)]
pub struct Timing {
    /// TCP connect timeout for outbound attempts.
    pub connect_timeout: Duration,
    /// Interval between heartbeat broadcasts to verified peers.
    pub heartbeat_interval: Duration,
    /// No liveness traffic for longer than this marks the peer dead.
    /// Tolerates exactly one missed heartbeat cycle without flapping.
    pub dead_after: Duration,
    /// A connection still unverified this long after first contact is
    /// force-closed, bounding resource use from unauthenticated peers.
    pub verify_deadline: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
            dead_after: Duration::from_secs(12),
            verify_deadline: Duration::from_secs(2),
        }
    }
}

/// One-way connection lifecycle. `Closed` has no variant: a closed
/// connection is removed from the registry entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    PendingVerification,
    Verified,
}

/// Which side opened the socket. The callee of a successful handshake must
/// answer with its own `Verify` so the link verifies in both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Inbound,
    Outbound,
}

/// Registry entry for one live remote host.
#[derive(Debug)]
pub struct PeerConnection {
    pub host: String,
    pub port: u16,
    pub state: PeerState,
    pub origin: Origin,
    outbound: mpsc::Sender<Frame>,
    connected_at: Instant,
    last_heartbeat: Instant,
}

impl PeerConnection {
    pub fn new(host: String, port: u16, origin: Origin, outbound: mpsc::Sender<Frame>) -> Self {
        let now = Instant::now();
        Self {
            host,
            port,
            state: PeerState::PendingVerification,
            origin,
            outbound,
            connected_at: now,
            last_heartbeat: now,
        }
    }

    /// Reset the last-seen timestamp to now. Any decoded frame counts as
    /// liveness, not just explicit heartbeats.
    pub fn record_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn is_alive(&self, dead_after: Duration) -> bool {
        self.last_heartbeat.elapsed() < dead_after
    }

    /// True once the connection has sat unverified past the deadline.
    pub fn verification_expired(&self, deadline: Duration) -> bool {
        self.state == PeerState::PendingVerification && self.connected_at.elapsed() > deadline
    }

    pub fn mark_verified(&mut self) {
        self.state = PeerState::Verified;
    }

    /// Queue a frame for the writer task. Fails if the writer has died
    /// (transport error) or the queue is full (peer not draining).
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    /// Handle for sending after the registry lock is released.
    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.outbound.clone()
    }

    #[cfg(test)]
    pub(crate) fn backdate_heartbeat(&mut self, age: Duration) {
        self.last_heartbeat = Instant::now() - age;
    }

    #[cfg(test)]
    pub(crate) fn backdate_connection(&mut self, age: Duration) {
        self.connected_at = Instant::now() - age;
    }
}

/// Drain the outbound queue onto the socket. Exits on write failure or when
/// every sender is dropped; either way the write half closes, which the
/// remote observes as EOF.
pub fn spawn_writer(host: String, mut write: OwnedWriteHalf, mut rx: mpsc::Receiver<Frame>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let bytes = frame.encode();
            if let Err(e) = write.write_all(&bytes).await {
                debug!(host = %host, error = %e, "peer write failed, writer exiting");
                return;
            }
            trace!(host = %host, tag = ?frame.tag, len = bytes.len(), "frame sent");
        }
        let _ = write.shutdown().await;
        debug!(host = %host, "writer drained and closed");
    });
}

/// Outbound TCP connect with the configured timeout. Timeout and refusal are
/// both transport errors; the caller decides retry policy.
///
/// When `source` is given the socket binds to it first, so the remote's
/// accept loop sees our advertised address instead of whatever the OS picks
/// for the route.
pub async fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
    source: Option<std::net::IpAddr>,
) -> std::io::Result<TcpStream> {
    let attempt = async move {
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address for {host}"),
                )
            })?;
        match source {
            None => TcpStream::connect(addr).await,
            Some(ip) => {
                let socket = if addr.is_ipv4() {
                    tokio::net::TcpSocket::new_v4()?
                } else {
                    tokio::net::TcpSocket::new_v6()?
                };
                socket.bind(std::net::SocketAddr::new(ip, 0))?;
                socket.connect(addr).await
            }
        }
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connect to {host}:{port} timed out"),
        )),
    }
}
