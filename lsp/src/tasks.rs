//! Default build-task file for workspaces that have none.

use std::io;
use std::path::{Path, PathBuf};

use warden_utils::{
    AtomicWriteOptions, FileSyncPolicy, ParentDirSyncPolicy, atomic_write_new_with_options,
};

/// Location of the task file relative to the workspace root.
pub const TASKS_FILE: &str = ".warden/tasks.json";

/// The task file is the first entry in a fresh `.warden/` directory, so the
/// new directory entry is synced too.
const TASKS_WRITE_OPTIONS: AtomicWriteOptions = AtomicWriteOptions {
    file_sync: FileSyncPolicy::SyncAll,
    parent_dir_sync: ParentDirSyncPolicy::SyncBestEffort,
    create_parents: true,
};

#[must_use]
pub fn tasks_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(TASKS_FILE)
}

fn task(label: &str, args: &[&str], group: &str) -> serde_json::Value {
    serde_json::json!({
        "label": label,
        "type": "shell",
        "command": "cargo",
        "args": args,
        "group": group,
        "problemMatcher": ["$rustc"]
    })
}

fn default_tasks() -> serde_json::Value {
    serde_json::json!({
        "version": "2.0.0",
        "tasks": [
            task("cargo build", &["build"], "build"),
            task("cargo run", &["run"], "build"),
            task("cargo test", &["test"], "test"),
        ]
    })
}

/// Write the default task file unless one is already present.
///
/// Returns `Ok(true)` if a file was written.
pub fn ensure_default_tasks(workspace_root: &Path) -> io::Result<bool> {
    let path = tasks_path(workspace_root);
    if path.exists() {
        return Ok(false);
    }

    let mut body = serde_json::to_vec_pretty(&default_tasks()).map_err(io::Error::other)?;
    body.push(b'\n');
    match atomic_write_new_with_options(&path, &body, TASKS_WRITE_OPTIONS) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Wrote default build tasks");
            Ok(true)
        }
        // Raced with someone else creating it; theirs wins.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}
