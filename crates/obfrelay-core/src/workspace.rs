//! Per-user workspace directories.
//!
//! Each accepted upload is staged under `<root>/<user_id>/` with the
//! transformer writing into `<root>/<user_id>/dist/`. Requests from the same
//! user share that path, so [`Workspaces::lock`] serializes them; requests
//! from different users run concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// Name of the transformer output subdirectory.
pub const OUTPUT_DIR: &str = "dist";

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type LockTable = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Workspace root plus the per-user lock table.
pub struct Workspaces {
    root: PathBuf,
    locks: LockTable,
}

impl Workspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive use of `user_id`'s workspace.
    pub async fn lock(&self, user_id: &str) -> UserLock {
        let slot = {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(user_id.to_string()).or_default())
        };
        let guard = slot.lock_owned().await;
        UserLock {
            user_id: user_id.to_string(),
            guard: Some(guard),
            table: Arc::clone(&self.locks),
        }
    }

    /// Number of users with a held or awaited lock.
    pub fn active_users(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Create the workspace for `user_id` (create-if-absent).
    pub async fn create(&self, user_id: &str) -> Result<WorkspaceDir, WorkspaceError> {
        WorkspaceDir::create(&self.root, user_id).await
    }
}

/// Exclusive hold on one user's workspace. Released on drop.
pub struct UserLock {
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl Drop for UserLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the table's own reference left: nobody holds or awaits the lock.
        if table
            .get(&self.user_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            table.remove(&self.user_id);
        }
    }
}

/// A created `<root>/<user_id>` directory.
///
/// Dropping it without a completed [`WorkspaceDir::remove`] (for example when
/// the handling task is cancelled) deletes the directory synchronously.
#[derive(Debug)]
pub struct WorkspaceDir {
    path: PathBuf,
    removed: bool,
}

/// A user id must be usable as a single path component.
fn validate_user_id(user_id: &str) -> Result<(), WorkspaceError> {
    if user_id.is_empty() {
        return Err(WorkspaceError::InvalidName("user id cannot be empty".into()));
    }
    if user_id == "." || user_id == ".." {
        return Err(WorkspaceError::InvalidName(format!(
            "user id cannot be {user_id:?}"
        )));
    }
    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(WorkspaceError::InvalidName(format!(
            "user id contains invalid characters: {user_id}"
        )));
    }
    Ok(())
}

impl WorkspaceDir {
    /// Create `<root>/<user_id>`, reusing it if it already exists.
    pub async fn create(root: &Path, user_id: &str) -> Result<Self, WorkspaceError> {
        validate_user_id(user_id)?;
        let path = root.join(user_id);
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Workspace created");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where an upload named `file_name` is staged.
    ///
    /// Only the final path component of `file_name` is used.
    pub fn input_path(&self, file_name: &str) -> Result<PathBuf, WorkspaceError> {
        let base = Path::new(file_name)
            .file_name()
            .ok_or_else(|| WorkspaceError::InvalidName(format!("bad file name: {file_name:?}")))?;
        Ok(self.path.join(base))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path.join(OUTPUT_DIR)
    }

    /// Recursively delete the workspace. A missing directory is not an error.
    pub async fn remove(mut self) -> Result<(), WorkspaceError> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                self.removed = true;
                debug!(path = %self.path.display(), "Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.removed = true;
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove workspace");
                Err(e.into())
            }
        }
    }
}

impl Drop for WorkspaceDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Abandoned workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove abandoned workspace");
            }
        }
    }
}

/// Find the first file under `dir` whose name ends with `extension`.
///
/// Traversal order is whatever the filesystem yields; callers rely on the
/// transformer producing exactly one matching file. A missing `dir` yields
/// `None`; any other I/O error, including one on a single entry, is returned.
/// The walk runs on the blocking pool.
pub async fn find_output(dir: &Path, extension: &str) -> std::io::Result<Option<PathBuf>> {
    let dir = dir.to_path_buf();
    let extension = extension.to_string();
    tokio::task::spawn_blocking(move || walk_for_output(&dir, &extension))
        .await
        .map_err(std::io::Error::other)?
}

fn walk_for_output(dir: &Path, extension: &str) -> std::io::Result<Option<PathBuf>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut subdirs = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            subdirs.push(path);
        } else if file_type.is_file()
            && entry.file_name().to_string_lossy().ends_with(extension)
        {
            return Ok(Some(path));
        }
    }

    for sub in subdirs {
        if let Some(found) = walk_for_output(&sub, extension)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}
