use std::fs;
use std::path::{Path, PathBuf};

use mesh_protocol::NodeId;

use crate::error::InstanceError;

const LOCK_FILE_NAME: &str = ".lock";

/// Per-process workspace at `<temp_dir>/midi-network-<uuid>/`, guarded by a
/// `.lock` file holding this process's PID. Refuses to start if another
/// live process already owns the same node id's workspace, and cleans up
/// orphaned workspaces left behind by a process that died without
/// unwinding.
pub struct InstanceManager {
    workspace: PathBuf,
}

impl InstanceManager {
    /// Claim the workspace for `node_id` under `temp_dir`, creating it (and
    /// cleaning up a stale predecessor) as needed.
    pub fn acquire(temp_dir: &Path, node_id: NodeId) -> Result<Self, InstanceError> {
        let workspace = temp_dir.join(format!("midi-network-{}", node_id));
        let lock_path = workspace.join(LOCK_FILE_NAME);

        if workspace.exists() {
            match read_lock_pid(&lock_path)? {
                Some(pid) if process_is_alive(pid) => {
                    return Err(InstanceError::AlreadyRunning(workspace, pid));
                }
                Some(pid) => {
                    tracing::info!(pid, workspace = %workspace.display(), "removing orphaned instance workspace");
                    remove_workspace(&workspace)?;
                }
                None => {
                    tracing::info!(workspace = %workspace.display(), "removing workspace with no lock file");
                    remove_workspace(&workspace)?;
                }
            }
        }

        fs::create_dir_all(&workspace).map_err(|e| InstanceError::Io(workspace.clone(), e))?;
        fs::write(&lock_path, std::process::id().to_string())
            .map_err(|e| InstanceError::Io(lock_path, e))?;

        Ok(Self { workspace })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Path composition only; does not touch the filesystem.
    pub fn state_file(&self, name: &str) -> PathBuf {
        self.workspace.join(name)
    }

    /// Remove the lock file, then the workspace directory. Safe to call
    /// more than once.
    pub fn cleanup(&self) -> Result<(), InstanceError> {
        let lock_path = self.workspace.join(LOCK_FILE_NAME);
        if lock_path.exists() {
            fs::remove_file(&lock_path).map_err(|e| InstanceError::Io(lock_path, e))?;
        }
        if self.workspace.exists() {
            remove_workspace(&self.workspace)?;
        }
        Ok(())
    }
}

impl Drop for InstanceManager {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::warn!(error = %e, "failed to clean up instance workspace on drop");
        }
    }
}

fn remove_workspace(workspace: &Path) -> Result<(), InstanceError> {
    fs::remove_dir_all(workspace).map_err(|e| InstanceError::Io(workspace.to_path_buf(), e))
}

fn read_lock_pid(lock_path: &Path) -> Result<Option<i32>, InstanceError> {
    match fs::read_to_string(lock_path) {
        Ok(contents) => contents
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|e| InstanceError::CorruptLockFile(lock_path.to_path_buf(), e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(InstanceError::Io(lock_path.to_path_buf(), e)),
    }
}

/// Zero-signal liveness probe on POSIX. Conservative "alive" assumption
/// elsewhere.
#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u128) -> NodeId {
        NodeId::from_uuid(uuid::Uuid::from_u128(n))
    }

    #[test]
    fn acquire_creates_workspace_and_lock_file() {
        let temp = tempfile::tempdir().unwrap();
        let manager = InstanceManager::acquire(temp.path(), node(1)).unwrap();
        assert!(manager.workspace().exists());
        assert!(manager.workspace().join(".lock").exists());
    }

    #[test]
    fn lock_file_contains_current_pid() {
        let temp = tempfile::tempdir().unwrap();
        let manager = InstanceManager::acquire(temp.path(), node(2)).unwrap();
        let pid: i32 = fs::read_to_string(manager.workspace().join(".lock")).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id() as i32);
    }

    #[test]
    fn second_acquire_of_live_process_fails() {
        let temp = tempfile::tempdir().unwrap();
        let id = node(3);
        let workspace = temp.path().join(format!("midi-network-{id}"));
        fs::create_dir_all(&workspace).unwrap();
        fs::write(workspace.join(".lock"), std::process::id().to_string()).unwrap();

        let result = InstanceManager::acquire(temp.path(), id);
        assert!(matches!(result, Err(InstanceError::AlreadyRunning(_, _))));
    }

    #[test]
    fn stale_lock_is_cleaned_up_and_reacquired() {
        let temp = tempfile::tempdir().unwrap();
        let id = node(4);
        let workspace = temp.path().join(format!("midi-network-{id}"));
        fs::create_dir_all(&workspace).unwrap();
        // A pid essentially guaranteed to be dead in this sandbox.
        fs::write(workspace.join(".lock"), "999999").unwrap();
        fs::write(workspace.join("stale-state"), "leftover").unwrap();

        let manager = InstanceManager::acquire(temp.path(), id).unwrap();
        assert!(!manager.workspace().join("stale-state").exists());
    }

    #[test]
    fn double_cleanup_is_a_no_op() {
        let temp = tempfile::tempdir().unwrap();
        let manager = InstanceManager::acquire(temp.path(), node(5)).unwrap();
        manager.cleanup().unwrap();
        manager.cleanup().unwrap();
        assert!(!manager.workspace().exists());
    }

    #[test]
    fn state_file_is_pure_path_composition() {
        let temp = tempfile::tempdir().unwrap();
        let manager = InstanceManager::acquire(temp.path(), node(6)).unwrap();
        let path = manager.state_file("routes.json");
        assert_eq!(path, manager.workspace().join("routes.json"));
        assert!(!path.exists());
    }
}
