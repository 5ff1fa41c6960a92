//! TB-021: Append-only JSONL index of step profiles.

use super::resolver::DataLayout;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One profiled step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// RFC 3339 start time (UTC).
    pub ts: String,
    pub stage: String,
    pub step: String,
    pub namespace: String,
    pub read_env: String,
    pub write_env: String,
    pub duration_ms: u64,
    pub ok: bool,
}

/// Derive the profile index path for a project.
pub fn profile_index_path(root: &Path) -> PathBuf {
    root.join(DataLayout::report_dir()).join("profiles.jsonl")
}

/// Append a record to the project's profile index.
pub fn append_profile(root: &Path, record: &ProfileRecord) -> Result<()> {
    let path = profile_index_path(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let json = serde_json::to_string(record)
        .map_err(|e| Error::setup(format!("cannot serialize profile record: {}", e)))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;
    writeln!(file, "{}", json).map_err(|e| Error::io(&path, e))?;
    Ok(())
}

/// Read every record of the profile index; a missing index is empty.
pub fn read_profiles(root: &Path) -> Result<Vec<ProfileRecord>> {
    let path = profile_index_path(root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(&path).map_err(|e| Error::io(&path, e))?;
    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(&path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            Error::setup(format!("{}:{}: bad profile record: {}", path.display(), n + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}
