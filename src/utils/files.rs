use std::{fs, io, path::Path};

use serde::{de::DeserializeOwned, Serialize};

/// Read and deserialize a JSON file
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow!("Unable to read {}: {}", path.display(), e))?;

    serde_json::from_slice(&bytes).map_err(|e| anyhow!("Unable to parse {}: {}", path.display(), e))
}

/// Serialize a value into a pretty-printed JSON file
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;

    tokio::fs::write(path, json)
        .await
        .map_err(|e| anyhow!("Unable to write {}: {}", path.display(), e))
}

/// Returns true if the path does not exist or is an empty directory
pub fn is_missing_or_empty(path: &Path) -> io::Result<bool> {
    if !path.exists() {
        return Ok(true);
    }

    Ok(fs::read_dir(path)?.next().is_none())
}
