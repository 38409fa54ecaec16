/// Configuration management for the STUN resolver
use crate::cache::{BackendKind, CacheConfig, MAX_TTL_SECS};
use crate::discovery::{BindAddress, StunServer, DEFAULT_BIND_ADDRESS, DEFAULT_BIND_PORT};
use crate::error::{ResolverError, ResolverResult};
use crate::identity::MachineIdentity;
use std::env;
use std::path::PathBuf;

/// Standard STUN port, used when only a host is configured
const STUN_DEFAULT_PORT: u16 = 3478;

/// Main resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub stun: StunConfig,
    pub cache: CacheConfig,
    pub identity: IdentityConfig,
}

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct StunConfig {
    pub server: StunServer,
    pub bind: BindAddress,
    /// Upper bound on one discovery call, in seconds
    pub discovery_timeout_secs: Option<u64>,
}

/// Identity configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub machine_id_file: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            stun: StunConfig {
                server: StunServer::random_default(),
                bind: BindAddress::default(),
                discovery_timeout_secs: None,
            },
            cache: CacheConfig::default(),
            identity: IdentityConfig {
                machine_id_file: MachineIdentity::default_path(),
            },
        }
    }
}

impl ResolverConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ResolverResult<Self> {
        dotenv::dotenv().ok();

        let server = match env::var("STUN_SERVER") {
            Ok(host) => {
                let port = env::var("STUN_PORT")
                    .unwrap_or_else(|_| STUN_DEFAULT_PORT.to_string())
                    .parse()
                    .map_err(|_| ResolverError::Configuration("Invalid STUN_PORT".to_string()))?;
                StunServer::new(host, port)
            }
            Err(_) => StunServer::random_default(),
        };

        let bind = BindAddress {
            address: env::var("STUN_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            port: env::var("STUN_BIND_PORT")
                .unwrap_or_else(|_| DEFAULT_BIND_PORT.to_string())
                .parse()
                .map_err(|_| ResolverError::Configuration("Invalid STUN_BIND_PORT".to_string()))?,
        };

        let discovery_timeout_secs = match env::var("STUN_DISCOVERY_TIMEOUT_SECS") {
            Ok(value) => Some(value.parse().map_err(|_| {
                ResolverError::Configuration("Invalid STUN_DISCOVERY_TIMEOUT_SECS".to_string())
            })?),
            Err(_) => None,
        };

        let machine_id_file = env::var("STUN_MACHINE_ID_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| MachineIdentity::default_path());

        Ok(ResolverConfig {
            stun: StunConfig {
                server,
                bind,
                discovery_timeout_secs,
            },
            cache: CacheConfig::from_env()?,
            identity: IdentityConfig { machine_id_file },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ResolverResult<()> {
        if self.stun.server.host.trim().is_empty() {
            return Err(ResolverError::Configuration(
                "STUN server host cannot be empty".to_string(),
            ));
        }

        if self.stun.discovery_timeout_secs == Some(0) {
            return Err(ResolverError::Configuration(
                "Discovery timeout must be greater than zero".to_string(),
            ));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ResolverError::Configuration(
                "Cache TTL must be greater than zero".to_string(),
            ));
        }

        if self.cache.ttl_secs > MAX_TTL_SECS {
            return Err(ResolverError::Configuration(format!(
                "Cache TTL cannot exceed {} seconds",
                MAX_TTL_SECS
            )));
        }

        if self.cache.backend == BackendKind::Memory && self.cache.options.max_entries == 0 {
            return Err(ResolverError::Configuration(
                "Memory cache max entries must be greater than zero".to_string(),
            ));
        }

        if self.cache.backend == BackendKind::Redis && self.cache.options.redis_url.is_empty() {
            return Err(ResolverError::Configuration(
                "Redis URL required for the redis backend".to_string(),
            ));
        }

        Ok(())
    }
}
