//! STUN Resolver
//!
//! Resolves a caller's public IP, public port and NAT type through an external
//! STUN discovery call, caching the result per caller identity in one of four
//! pluggable backends (memory, file, sqlite, redis).

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod resolver;

pub use cache::{BackendKind, BackendOptions, CacheConfig, ResolutionCache, ResolutionRecord};
pub use config::ResolverConfig;
pub use discovery::{BindAddress, Discover, Discovery, StunServer};
pub use error::{ResolverError, ResolverResult};
pub use identity::{AuthenticatedPrincipal, CallerContext, IdentityResolver, MachineIdentity};
pub use middleware::StunInfo;
pub use resolver::StunResolver;
