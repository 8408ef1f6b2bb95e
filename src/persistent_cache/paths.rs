//! On-disk locations for cache files and local clones.

use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "commitcensus";

/// Per-user state directory for this application.
///
/// Resolution order: the platform state dir (`$XDG_STATE_HOME` on Linux),
/// then `~/.local/state`, then a relative `.commitcensus` directory.
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .map(|base| base.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".commitcensus"))
}

/// Resolve the state root (honouring an explicit override) and create it.
pub fn ensure_state_dir(override_dir: Option<&Path>) -> std::io::Result<PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(default_state_dir);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
