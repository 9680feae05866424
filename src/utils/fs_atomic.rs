use std::io;
use std::path::{Path, PathBuf};

pub async fn ensure_dir_for_file(path: impl AsRef<Path>) -> io::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Path next to `path` used while a download is in flight, so a failed
/// transfer never leaves a truncated file at the final location.
pub fn temp_sibling_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    let token = uuid::Uuid::new_v4().simple().to_string();
    parent.join(format!(".{}.{}.part", file_name, &token[..8]))
}

pub async fn persist(tmp: impl AsRef<Path>, path: impl AsRef<Path>) -> io::Result<()> {
    tokio::fs::rename(tmp, path).await
}

pub async fn discard(tmp: impl AsRef<Path>) {
    let _ = tokio::fs::remove_file(tmp).await;
}

#[cfg(test)]
mod tests {
    use super::temp_sibling_path;
    use std::path::Path;

    #[test]
    fn temp_sibling_stays_in_the_same_directory() {
        let tmp = temp_sibling_path("/srv/mirror/a/agent.tar.gz");
        assert_eq!(tmp.parent(), Some(Path::new("/srv/mirror/a")));
        let name = tmp.file_name().and_then(|s| s.to_str()).unwrap_or("");
        assert!(name.starts_with(".agent.tar.gz."));
        assert!(name.ends_with(".part"));
    }
}
