/// STUN discovery seam
///
/// The discovery handshake itself lives outside this crate. Anything that can
/// answer "what is my public address and NAT type" through one blocking call
/// plugs in via [`Discover`].
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Public STUN servers used when none is configured
pub const DEFAULT_STUN_SERVERS: &[(&str, u16)] = &[
    ("stun.l.google.com", 19302),
    ("stun1.l.google.com", 19302),
    ("stun2.l.google.com", 19302),
    ("stun3.l.google.com", 19302),
    ("stun4.l.google.com", 19302),
    ("stun.cloudflare.com", 3478),
];

/// Local address the discovery socket binds to
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_BIND_PORT: u16 = 54320;

/// What the discovery server reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub nat_type: String,
    pub ip: String,
    pub port: u16,
}

/// Blocking external discovery call
///
/// Called from a blocking worker thread, never from an async task directly.
pub trait Discover: Send + Sync + 'static {
    fn discover(
        &self,
        bind_address: &str,
        bind_port: u16,
        server_host: &str,
        server_port: u16,
    ) -> anyhow::Result<Discovery>;
}

impl<F> Discover for F
where
    F: Fn(&str, u16, &str, u16) -> anyhow::Result<Discovery> + Send + Sync + 'static,
{
    fn discover(
        &self,
        bind_address: &str,
        bind_port: u16,
        server_host: &str,
        server_port: u16,
    ) -> anyhow::Result<Discovery> {
        self(bind_address, bind_port, server_host, server_port)
    }
}

/// A STUN server endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StunServer {
    pub host: String,
    pub port: u16,
}

impl StunServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Pick one of the built-in public servers at random
    pub fn random_default() -> Self {
        let mut rng = rand::thread_rng();
        let (host, port) = DEFAULT_STUN_SERVERS
            .choose(&mut rng)
            .copied()
            .unwrap_or(DEFAULT_STUN_SERVERS[0]);
        Self::new(host, port)
    }
}

impl fmt::Display for StunServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Local socket the discovery call binds to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddress {
    pub address: String,
    pub port: u16,
}

impl Default for BindAddress {
    fn default() -> Self {
        Self {
            address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_BIND_PORT,
        }
    }
}
