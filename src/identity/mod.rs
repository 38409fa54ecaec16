/// Caller identity resolution
///
/// The cache key for a resolution is either the authenticated principal of the
/// caller or, for unauthenticated and standalone use, the persisted machine
/// identity.

pub mod machine;

pub use machine::MachineIdentity;

use crate::error::ResolverResult;
use std::path::Path;
use std::sync::Arc;

/// Authenticated principal attached to a request by upstream auth middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal(pub String);

/// What the resolver knows about the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    principal: Option<String>,
}

impl CallerContext {
    /// Caller with no authenticated principal
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Caller authenticated as `principal`
    pub fn authenticated(principal: impl ToString) -> Self {
        Self {
            principal: Some(principal.to_string()),
        }
    }

    /// Principal id, if the caller is authenticated
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref().filter(|p| !p.is_empty())
    }
}

impl From<Option<&AuthenticatedPrincipal>> for CallerContext {
    fn from(principal: Option<&AuthenticatedPrincipal>) -> Self {
        match principal {
            Some(AuthenticatedPrincipal(id)) => Self::authenticated(id),
            None => Self::anonymous(),
        }
    }
}

/// Derives the cache identity for a caller
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    machine: Arc<MachineIdentity>,
}

impl IdentityResolver {
    /// Establish the machine identity at `path`
    ///
    /// Fails with `ResolverError::Identity` when the identity can neither be
    /// read nor persisted; callers should treat that as a startup failure.
    pub async fn new(path: &Path) -> ResolverResult<Self> {
        let machine = MachineIdentity::load_or_create(path).await?;
        Ok(Self::with_machine_identity(machine))
    }

    pub fn with_machine_identity(machine: MachineIdentity) -> Self {
        Self {
            machine: Arc::new(machine),
        }
    }

    pub fn machine_identity(&self) -> &MachineIdentity {
        &self.machine
    }

    /// Principal id when authenticated, machine identity otherwise
    pub fn resolve_identity(&self, caller: &CallerContext) -> String {
        match caller.principal() {
            Some(principal) => principal.to_string(),
            None => self.machine.id().to_string(),
        }
    }
}
