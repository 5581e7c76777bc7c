//! Durable JSON persistence shared by the write-behind stores.
//!
//! Each store serializes its full entry set to one JSON array file. Writes
//! go to a sibling temp file which is renamed over the target, so a failed
//! write never corrupts the existing file. Readers only ever touch the
//! in-memory caches; these helpers run on the sync job, off the request
//! path.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Create the data directory if missing and restrict it to the owner.
pub async fn ensure_data_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    set_mode(dir, 0o700).await
}

/// Load a JSON array file. A missing file is an empty store, not an error;
/// a malformed file is an error the caller decides how to tolerate.
pub async fn load_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&raw).map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))
}

/// Atomically replace `path` with the serialized entries: write a temp file
/// alongside it, fix permissions, then rename into place.
pub async fn save_array<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let data = serde_json::to_vec_pretty(items)
        .map_err(|e| Error::Storage(format!("serialize {}: {}", path.display(), e)))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, &data).await?;
    set_mode(&tmp, 0o600).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
