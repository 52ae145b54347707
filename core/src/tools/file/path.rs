//! Shared path resolution for file tools: expands `~` and resolves
//! relative paths against the process's current directory.

use std::path::{Path, PathBuf};

pub fn resolve_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}
