use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::store::SqliteStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state. The store is opened by `workspace.select` (or at startup)
/// and dropped by `workspace.close`.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<SqliteStore>,
    pub busy_timeout: Duration,
}

impl AppState {
    pub fn new(busy_timeout: Duration) -> Self {
        AppState {
            workspace: None,
            store: None,
            busy_timeout,
        }
    }

    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        // Release the previous handle before opening, the new path may be the same file.
        self.close_workspace();
        let store = SqliteStore::open(path, self.busy_timeout)?;
        self.workspace = Some(path.to_path_buf());
        self.store = Some(store);
        tracing::info!(workspace = %path.display(), "workspace opened");
        Ok(())
    }

    /// Returns true when a workspace was open.
    pub fn close_workspace(&mut self) -> bool {
        let was_open = self.store.take().is_some();
        if let Some(path) = self.workspace.take() {
            tracing::info!(workspace = %path.display(), "workspace closed");
        }
        was_open
    }
}
