//! Generation metadata written next to each delivered artifact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vstage_core::task::TaskCategory;

/// Contents of `<artifact>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub prompt: String,
    /// Free-text room description the prompt was derived from, if any.
    pub description: Option<String>,
    /// File name of the input image.
    pub input_image: String,
    pub resolution_setting: u32,
    pub task_type: TaskCategory,
    pub seed: u64,
    pub prompt_id: String,
    pub created_at: DateTime<Utc>,
}

/// `staged_00001.png` -> `staged_00001.json`.
pub fn sidecar_path(artifact: &Path) -> PathBuf {
    artifact.with_extension("json")
}

/// Write the metadata file. Failures are logged and reported as `None`.
pub async fn write_sidecar(artifact: &Path, metadata: &GenerationMetadata) -> Option<PathBuf> {
    let path = sidecar_path(artifact);
    let json = match serde_json::to_vec_pretty(metadata) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialise generation metadata");
            return None;
        }
    };

    match tokio::fs::write(&path, json).await {
        Ok(()) => Some(path),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write sidecar");
            None
        }
    }
}
