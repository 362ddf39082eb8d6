use std::path::Path;

/// Writes `data` to `path`, creating any missing parent directories first.
pub async fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, data).await
}
