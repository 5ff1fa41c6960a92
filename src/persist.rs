//! TB-013: YAML document persistence with atomic saves.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Read and parse a YAML document.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_yaml_ng::from_str(&content).map_err(|e| Error::yaml(path.display().to_string(), e))
}

/// Read a YAML document, falling back to `T::default()` when the file is absent.
pub fn read_yaml_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    read_yaml(path)
}

/// Serialize to a YAML string.
pub fn to_yaml<T: Serialize>(value: &T, origin: &str) -> Result<String> {
    serde_yaml_ng::to_string(value).map_err(|e| Error::yaml(origin, e))
}

/// Save atomically (write to temp, then rename).
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, content).map_err(|e| Error::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Serialize and save atomically.
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let yaml = to_yaml(value, &path.display().to_string())?;
    write_atomic(path, &yaml)
}
