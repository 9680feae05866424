use std::path::{Path, PathBuf};

/// Expands a leading `~` to `$HOME`; other paths are returned unchanged.
pub fn expand_home_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let Ok(home) = std::env::var("HOME") else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => PathBuf::from(home).join(rest),
        Err(_) => path.to_path_buf(),
    }
}
