//! Where the coach stores its own data (config, retriever bundles).
//!
//! FAQ source files stay wherever the user keeps them. We only store app state here.

use std::path::PathBuf;

/// Returns the directory where the coach stores config and fitted bundles.
/// On Linux: `~/.local/share/coach/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Coach", "Coach")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
