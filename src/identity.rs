//! # Self Identity
//!
//! Every meshfs process carries a [`SelfIdentity`]: the externally reachable
//! host it advertises to peers, the mesh listen port, and the logical id it
//! announces during verification. The identity is created once at startup and
//! never mutated afterwards.
//!
//! The externally reachable address is an external concern (the original
//! deployment queried an HTTP echo service). Here it is resolved through
//! [`resolve_self_host`], which accepts an explicit value or falls back to the
//! `MESHFS_HOST` environment variable. A missing address aborts startup: a
//! node that does not know its own address would verify peers against a wrong
//! host key and corrupt the membership maps.

use anyhow::{Context, Result};

/// Environment variable consulted when no explicit host is given.
pub const HOST_ENV_VAR: &str = "MESHFS_HOST";

/// Immutable record of this process's address and logical id.
#[derive(Clone, Debug)]
pub struct SelfIdentity {
    /// Externally reachable address peers use to connect back to us.
    pub host: String,
    /// Mesh listen port (the whole mesh shares one port).
    pub port: u16,
    /// Logical id announced in the verification handshake.
    pub id: String,
}

impl SelfIdentity {
    pub fn new(host: impl Into<String>, port: u16, id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            id: id.into(),
        }
    }

    /// `host:port` form, used for display only.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolve the externally reachable host for this process.
///
/// Order: explicit value (CLI flag), then the `MESHFS_HOST` environment
/// variable. A node that cannot resolve its own address does not start.
pub fn resolve_self_host(explicit: Option<String>) -> Result<String> {
    if let Some(host) = explicit {
        return Ok(host);
    }
    std::env::var(HOST_ENV_VAR)
        .with_context(|| format!("self address unknown: pass --host or set {HOST_ENV_VAR}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_host_wins() {
        let host = resolve_self_host(Some("10.0.0.7".into())).unwrap();
        assert_eq!(host, "10.0.0.7");
    }

    #[test]
    fn endpoint_formatting() {
        let me = SelfIdentity::new("192.168.1.4", 8889, "ryan");
        assert_eq!(me.endpoint(), "192.168.1.4:8889");
        assert_eq!(me.id, "ryan");
    }
}
