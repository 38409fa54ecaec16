/// Resolution record - the unit stored by every cache backend
use crate::error::{ResolverError, ResolverResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Result of one STUN resolution for a caller identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub identity: String,
    pub ip: String,
    pub port: u16,
    pub nat_type: String,
    pub recorded_at: DateTime<Utc>,
}

impl ResolutionRecord {
    /// Create a record stamped with the current time
    pub fn new(
        identity: impl Into<String>,
        ip: impl Into<String>,
        port: u16,
        nat_type: impl Into<String>,
    ) -> ResolverResult<Self> {
        Self::recorded(identity, ip, port, nat_type, Utc::now())
    }

    /// Create a record with an explicit timestamp
    pub fn recorded(
        identity: impl Into<String>,
        ip: impl Into<String>,
        port: u16,
        nat_type: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> ResolverResult<Self> {
        let identity = identity.into();
        if identity.is_empty() {
            return Err(ResolverError::Validation(
                "Record identity cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            identity,
            ip: ip.into(),
            port,
            nat_type: nat_type.into(),
            recorded_at,
        })
    }

    /// Whether the record is still within `ttl` of its recording time
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.is_fresh_at(ttl, Utc::now())
    }

    pub fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.recorded_at < ttl
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn nat_type(&self) -> &str {
        &self.nat_type
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}
