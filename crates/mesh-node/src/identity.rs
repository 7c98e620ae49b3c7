use std::fs;
use std::path::{Path, PathBuf};

use mesh_protocol::NodeId;

use crate::error::InstanceError;

const MAX_HOSTNAME_CHARS: usize = 20;
const NODE_ID_FILE_NAME: &str = "node-id";

/// This process's identity on the mesh: a [`NodeId`] plus a human-readable
/// name derived from the local hostname and the node id's first 8 hex
/// digits. Constructed once at startup and passed by value/reference to
/// whatever needs it as a process-scoped handle constructed at startup.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub name: String,
}

impl NodeIdentity {
    /// Load a persisted node id from `<config_dir>/node-id`, or generate and
    /// persist a fresh one if none exists yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, InstanceError> {
        let path = node_id_path(config_dir);
        let id = match fs::read_to_string(&path) {
            Ok(contents) => contents
                .trim()
                .parse::<NodeId>()
                .map_err(|e| InstanceError::CorruptNodeId(path.clone(), e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let id = NodeId::new_random();
                persist(&path, id)?;
                id
            }
            Err(e) => return Err(InstanceError::Io(path, e)),
        };
        Ok(Self::from_id(id))
    }

    /// Build an identity from a fresh, unpersisted [`NodeId`] (used by tests
    /// and by transient/ephemeral processes that opt out of persistence).
    pub fn ephemeral() -> Self {
        Self::from_id(NodeId::new_random())
    }

    fn from_id(id: NodeId) -> Self {
        let name = format!("{}-{}", sanitized_hostname(), &id.to_string().replace('-', "")[..8]);
        Self { id, name }
    }
}

fn node_id_path(config_dir: &Path) -> PathBuf {
    config_dir.join(NODE_ID_FILE_NAME)
}

fn persist(path: &Path, id: NodeId) -> Result<(), InstanceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| InstanceError::Io(parent.to_path_buf(), e))?;
    }
    fs::write(path, id.to_string()).map_err(|e| InstanceError::Io(path.to_path_buf(), e))
}

#[cfg(unix)]
fn raw_hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(not(unix))]
fn raw_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

/// Hostname, lowercased, with anything but ASCII alphanumerics and `-`
/// collapsed to `-`, truncated to [`MAX_HOSTNAME_CHARS`].
fn sanitized_hostname() -> String {
    let lower = raw_hostname().to_lowercase();
    let sanitized: String = lower
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    sanitized.chars().take(MAX_HOSTNAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let first = NodeIdentity::load_or_create(dir.path()).unwrap();
        let second = NodeIdentity::load_or_create(dir.path()).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn load_or_create_writes_a_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let identity = NodeIdentity::load_or_create(dir.path()).unwrap();
        let contents = fs::read_to_string(node_id_path(dir.path())).unwrap();
        assert_eq!(contents.trim().parse::<NodeId>().unwrap(), identity.id);
    }

    #[test]
    fn corrupt_node_id_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(node_id_path(dir.path()), "not-a-uuid").unwrap();
        assert!(matches!(
            NodeIdentity::load_or_create(dir.path()),
            Err(InstanceError::CorruptNodeId(_, _))
        ));
    }

    #[test]
    fn name_combines_hostname_and_uuid_prefix() {
        let identity = NodeIdentity::ephemeral();
        let prefix = &identity.id.to_string().replace('-', "")[..8];
        assert!(identity.name.ends_with(prefix));
    }

    #[test]
    fn sanitized_hostname_has_no_dots() {
        assert!(!sanitized_hostname().contains('.'));
    }
}
