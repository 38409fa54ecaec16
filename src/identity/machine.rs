/// Persisted machine identity for unauthenticated callers
use crate::error::{ResolverError, ResolverResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A UUID created once per host and reused for every later run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    id: String,
    path: PathBuf,
}

impl MachineIdentity {
    /// Default location: `~/.stun_resolver_config`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stun_resolver_config")
    }

    /// Read the identity at `path`, creating and persisting a new one if absent
    pub async fn load_or_create(path: &Path) -> ResolverResult<Self> {
        match Self::read(path).await? {
            Some(identity) => Ok(identity),
            None => Self::create(path).await,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted identity; `None` when the file is absent or empty
    async fn read(path: &Path) -> ResolverResult<Option<Self>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ResolverError::Identity(format!(
                    "Failed to read machine identity {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let id = content.trim();
        if id.is_empty() {
            warn!(
                "Machine identity file {} is empty, generating a new identity",
                path.display()
            );
            return Ok(None);
        }

        debug!("Loaded machine identity from {}", path.display());
        Ok(Some(Self {
            id: id.to_string(),
            path: path.to_path_buf(),
        }))
    }

    async fn create(path: &Path) -> ResolverResult<Self> {
        let id = Uuid::new_v4().to_string();

        let target = path.to_path_buf();
        let content = id.clone();
        let persisted = tokio::task::spawn_blocking(move || persist(&target, &content))
            .await
            .map_err(|e| {
                ResolverError::Identity(format!("Machine identity task failed: {}", e))
            })??;

        if !persisted {
            // Adopt whatever identity is now on disk
            return Self::read(path).await?.ok_or_else(|| {
                ResolverError::Identity(format!(
                    "Machine identity {} vanished while loading",
                    path.display()
                ))
            });
        }

        info!("Created machine identity at {}", path.display());
        Ok(Self {
            id,
            path: path.to_path_buf(),
        })
    }
}

/// Write `content` to a sibling temp file and move it into place
///
/// Returns `true` when `content` became the identity. Returns `false` when
/// another identity already exists at `path`, or after replacing an empty file,
/// where concurrent repairs may race and the caller must re-read.
fn persist(path: &Path, content: &str) -> ResolverResult<bool> {
    let identity_error = |action: &str, e: &dyn std::fmt::Display| {
        ResolverError::Identity(format!(
            "Failed to {} machine identity {}: {}",
            action,
            path.display(),
            e
        ))
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| identity_error("create directory for", &e))?;

    let mut file = NamedTempFile::new_in(parent).map_err(|e| identity_error("stage", &e))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| identity_error("write", &e))?;

    match file.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            let existing = std::fs::read_to_string(path).unwrap_or_default();
            if !existing.trim().is_empty() {
                return Ok(false);
            }
            // Leftover empty file: replace it atomically
            e.file
                .persist(path)
                .map_err(|e| identity_error("replace", &e.error))?;
            Ok(false)
        }
        Err(e) => Err(identity_error("persist", &e.error)),
    }
}
