//! Atomic file replacement for the project state files.

use std::path::Path;

use llmcode_core::StoreError;

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::Storage(format!("create {}: {e}", parent.display())))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::Storage(format!("write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::Storage(format!("rename onto {}: {e}", path.display())))?;
    Ok(())
}
