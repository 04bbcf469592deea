//! # Workspace provisioning.
//!
//! Every daemon owns an isolated directory for the life of the slot. The
//! [`WorkspaceProvider`] trait is the seam to whatever prepares that
//! directory — repository checkouts, template files, richer identity
//! material all live behind it.
//!
//! [`LocalWorkspaces`] is the built-in provider: it creates a directory
//! under a configured root and mints an identity whose `agent_id` is the
//! first 8 hex characters of a SHA-256 digest over a random 32-byte seed.
//! Two provisions never share an id or a seed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::SwarmError;

/// Stable identity of one daemon slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Short stable id derived from the identity key.
    pub agent_id: String,
    /// Human name, `swarm-<role>-<NNN>`.
    pub name: String,
    /// Role the daemon serves.
    pub role: String,
}

/// A provisioned workspace: identity plus owned directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Identity minted for this slot.
    pub identity: AgentIdentity,
    /// Directory owned exclusively by the daemon.
    pub dir: PathBuf,
}

/// Capability to provision and tear down per-daemon workspaces.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    /// Creates a workspace and identity for a daemon named `name` with the
    /// given role.
    async fn provision(&self, name: &str, role: &str) -> Result<Workspace, SwarmError>;

    /// Removes the workspace directory.
    async fn teardown(&self, workspace: &Workspace) -> Result<(), SwarmError>;
}

/// Filesystem-backed provider rooted at one directory.
pub struct LocalWorkspaces {
    root: PathBuf,
}

impl LocalWorkspaces {
    /// Creates a provider rooted at `root`. The root is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl WorkspaceProvider for LocalWorkspaces {
    async fn provision(&self, name: &str, role: &str) -> Result<Workspace, SwarmError> {
        let seed: [u8; 32] = rand::random();
        let digest = Sha256::digest(seed);
        let agent_id = hex(&digest[..4]);

        let dir = self.root.join(format!("{name}-{agent_id}"));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SwarmError::Workspace {
                reason: format!("create {}: {e}", dir.display()),
            })?;

        // The identity file is opaque to the rest of the crate; richer
        // providers put real key material here.
        let identity_path = dir.join("identity.key");
        let identity_body = format!("seed={}\nfingerprint={}\n", hex(&seed), hex(&digest));
        tokio::fs::write(&identity_path, identity_body)
            .await
            .map_err(|e| SwarmError::Workspace {
                reason: format!("write {}: {e}", identity_path.display()),
            })?;

        Ok(Workspace {
            identity: AgentIdentity {
                agent_id,
                name: name.to_string(),
                role: role.to_string(),
            },
            dir,
        })
    }

    async fn teardown(&self, workspace: &Workspace) -> Result<(), SwarmError> {
        match tokio::fs::remove_dir_all(&workspace.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SwarmError::Workspace {
                reason: format!("remove {}: {e}", workspace.dir.display()),
            }),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::new(), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Writes the per-workspace context record.
///
/// Context is best-effort: failures are swallowed after a debug log and must
/// never fail the daemon.
pub(crate) async fn write_context(dir: &Path, body: &str) {
    let path = dir.join("context.txt");
    if let Err(e) = tokio::fs::write(&path, body).await {
        tracing::debug!(event = "context_write_failed", path = %path.display(), error = %e);
    }
}
