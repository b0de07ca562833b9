//! Runtime-configuration loading for tools embedding the estimator.
//!
//! The core never touches the filesystem on its own; these helpers exist
//! for callers that keep estimator parameters in a JSON file next to their
//! capture setup. Every field falls back to its default, so a partial
//! config is fine.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::estimator::VolumeParams;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub params: VolumeParams,
}

pub fn parse_config(json: &str) -> Result<RuntimeConfig, String> {
    serde_json::from_str(json).map_err(|e| format!("Failed to parse config: {e}"))
}

pub fn load_config(path: &Path) -> Result<RuntimeConfig, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    parse_config(&contents)
}
