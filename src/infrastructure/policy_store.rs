//! Loaders for the role access policy and the optional data dictionary.

use crate::domain::access_policy::RoleAccessPolicy;
use crate::domain::error::{AppError, Result};
use crate::domain::schema::DictionaryEntry;
use std::fs;
use std::path::Path;
use tracing::info;

fn read_file(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        AppError::IoError(format!("Failed to read {} '{}': {}", what, path.display(), e))
    })
}

pub fn load_policy(path: &Path) -> Result<RoleAccessPolicy> {
    let policy = RoleAccessPolicy::from_json(&read_file(path, "role access policy")?)?;
    info!(path = %path.display(), roles = policy.roles().len(), "Role access policy loaded");
    Ok(policy)
}

pub fn load_dictionary(path: &Path) -> Result<Vec<DictionaryEntry>> {
    let entries: Vec<DictionaryEntry> = serde_json::from_str(&read_file(path, "data dictionary")?)
        .map_err(|e| AppError::ParseError(format!("Invalid data dictionary: {}", e)))?;
    info!(path = %path.display(), entries = entries.len(), "Data dictionary loaded");
    Ok(entries)
}
