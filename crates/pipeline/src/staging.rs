//! Input staging.
//!
//! ComfyUI's `LoadImage` node only reads from the engine's input
//! directory, so each request copies its input there. The copy lives
//! exactly as long as the [`StagedArtifact`] guard.

use std::path::{Path, PathBuf};

/// A request-owned copy of the input inside the engine's input directory.
///
/// Dropping the guard deletes the copy.
#[derive(Debug)]
pub struct StagedArtifact {
    path: PathBuf,
    file_name: String,
}

impl StagedArtifact {
    /// Copy `source` into `engine_input_dir` as `staged_name`.
    pub async fn stage(
        source: &Path,
        engine_input_dir: &Path,
        staged_name: &str,
    ) -> std::io::Result<Self> {
        let path = engine_input_dir.join(staged_name);
        if let Err(e) = tokio::fs::copy(source, &path).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        tracing::debug!(
            source = %source.display(),
            staged = %path.display(),
            "Input staged for engine",
        );
        Ok(Self {
            path,
            file_name: staged_name.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name the engine's `LoadImage` node should reference.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(staged = %self.path.display(), "Staged input removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                staged = %self.path.display(),
                error = %e,
                "Failed to remove staged input",
            ),
        }
    }
}
