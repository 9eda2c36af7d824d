//! Integration tests for the membership protocol: verification handshake,
//! gossip-driven mesh healing, and failure detection over real sockets.
//!
//! Each test gets a unique port; nodes within a test share it but bind
//! distinct loopback aliases (127.0.0.2, 127.0.0.3, ...), mirroring the
//! production setup where the whole mesh listens on one well-known port.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use meshfs::{Node, NodeConfig, SelfIdentity, Timing};
use tokio::time::sleep;

/// Atomic port counter for unique port allocation across parallel tests.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(30500);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Compressed protocol timing so liveness tests finish quickly. Ratios match
/// production: the dead timeout tolerates one missed heartbeat cycle.
fn fast_timing() -> Timing {
    Timing {
        connect_timeout: Duration::from_secs(1),
        heartbeat_interval: Duration::from_millis(300),
        dead_after: Duration::from_millis(800),
        verify_deadline: Duration::from_millis(500),
    }
}

async fn start_node(host: &str, port: u16, id: &str, identities: &[&str]) -> (Node, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let directory_path = dir.path().join("peers.json");
    let seed = serde_json::json!({ "hosts": [], "identities": identities });
    std::fs::write(&directory_path, seed.to_string()).unwrap();

    let me = SelfIdentity::new(host, port, id);
    let mut config = NodeConfig::new(me, directory_path, dir.path().join("data"));
    config.bind_host = host.to_string();
    config.timing = fast_timing();
    let node = Node::start(config).await.expect("node failed to start");
    (node, dir)
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {what}");
}

fn verified(node: &Node, host: &str, id: &str) -> bool {
    node.peers()
        .iter()
        .any(|p| p.host == host && p.verified && p.id.as_deref() == Some(id))
}

#[tokio::test]
async fn two_nodes_verify_each_other() {
    let port = next_port();
    let ids = ["alice", "bob"];
    let (a, _da) = start_node("127.0.0.2", port, "alice", &ids).await;
    let (b, _db) = start_node("127.0.0.3", port, "bob", &ids).await;

    a.connect("127.0.0.3").await.expect("connect failed");

    wait_until("a verifies b", || verified(&a, "127.0.0.3", "bob")).await;
    wait_until("b verifies a", || verified(&b, "127.0.0.2", "alice")).await;

    assert_eq!(a.netinfo().verified, 1);
    assert_eq!(b.netinfo().verified, 1);
}

#[tokio::test]
async fn gossip_connects_the_third_peer() {
    let port = next_port();
    let ids = ["alice", "bob", "carol"];
    let (a, _da) = start_node("127.0.0.2", port, "alice", &ids).await;
    let (b, _db) = start_node("127.0.0.3", port, "bob", &ids).await;
    let (c, _dc) = start_node("127.0.0.4", port, "carol", &ids).await;

    // A and B become mutually verified first.
    a.connect("127.0.0.3").await.unwrap();
    wait_until("a-b verified", || {
        verified(&a, "127.0.0.3", "bob") && verified(&b, "127.0.0.2", "alice")
    })
    .await;

    // A verifies C; gossip should drive B and C together without any
    // explicit connect between them.
    a.connect("127.0.0.4").await.unwrap();
    wait_until("mesh fully connected", || {
        verified(&b, "127.0.0.4", "carol") && verified(&c, "127.0.0.3", "bob")
    })
    .await;

    assert_eq!(a.netinfo().verified, 2);
    assert_eq!(b.netinfo().verified, 2);
    assert_eq!(c.netinfo().verified, 2);
}

#[tokio::test]
async fn unknown_identity_never_verifies() {
    let port = next_port();
    // Alice's directory does not contain "mallory".
    let (a, _da) = start_node("127.0.0.2", port, "alice", &["alice"]).await;
    let (m, _dm) = start_node("127.0.0.3", port, "mallory", &["alice", "mallory"]).await;

    m.connect("127.0.0.2").await.expect("tcp connect should succeed");

    // Alice must reject the handshake and drop the connection.
    wait_until("alice drops mallory", || {
        !a.peers().iter().any(|p| p.host == "127.0.0.3" && p.connected)
    })
    .await;
    assert!(!verified(&a, "127.0.0.3", "mallory"));
    assert_eq!(a.netinfo().verified, 0);

    // Mallory observes the closed socket and gives up the connection too.
    wait_until("mallory sees the disconnect", || {
        !m.peers().iter().any(|p| p.host == "127.0.0.2" && p.connected)
    })
    .await;
}

#[tokio::test]
async fn offline_peer_is_removed_from_connected() {
    let port = next_port();
    let ids = ["alice", "bob"];
    let (a, _da) = start_node("127.0.0.2", port, "alice", &ids).await;
    let (b, _db) = start_node("127.0.0.3", port, "bob", &ids).await;

    a.connect("127.0.0.3").await.unwrap();
    wait_until("a-b verified", || {
        verified(&a, "127.0.0.3", "bob") && verified(&b, "127.0.0.2", "alice")
    })
    .await;

    b.shutdown();

    wait_until("a drops b", || a.netinfo().connected == 0).await;
    // The host stays seen: eligible for reconnect later.
    assert!(a.peers().iter().any(|p| p.host == "127.0.0.3"));
}

#[tokio::test]
async fn reconnect_after_disconnect_produces_fresh_verification() {
    let port = next_port();
    let ids = ["alice", "bob"];
    let (a, _da) = start_node("127.0.0.2", port, "alice", &ids).await;

    {
        let (b, _db) = start_node("127.0.0.3", port, "bob", &ids).await;
        a.connect("127.0.0.3").await.unwrap();
        wait_until("first verification", || verified(&a, "127.0.0.3", "bob")).await;
        b.shutdown();
        wait_until("a drops b", || a.netinfo().connected == 0).await;
    }

    // A fresh node reuses bob's identity from the same host; the binding was
    // cleared on disconnect so verification must succeed again.
    let (_b2, _db2) = start_node("127.0.0.3", port, "bob", &ids).await;
    a.connect("127.0.0.3").await.unwrap();
    wait_until("second verification", || verified(&a, "127.0.0.3", "bob")).await;
}
