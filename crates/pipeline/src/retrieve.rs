//! Locating and delivering generated artifacts.
//!
//! The history entry names the saved file, but the engine occasionally
//! mangles names (counter collisions, sanitised characters). Lookup
//! therefore tries the reported name first and then falls back to any
//! file carrying the request's temporary prefix.

use std::path::{Component, Path, PathBuf};

use vstage_comfyui::history::OutputImage;

/// Find the generated file for a request in `output_dir`.
///
/// 1. `output_dir/<subfolder>/<filename>` as reported by the engine.
/// 2. The lexicographically first file in `output_dir` whose name starts
///    with `temp_prefix`.
pub async fn locate_artifact(
    output_dir: &Path,
    reported: Option<&OutputImage>,
    temp_prefix: &str,
) -> std::io::Result<Option<PathBuf>> {
    if let Some(image) = reported {
        if is_plain_relative(&image.subfolder) && is_plain_relative(&image.filename) {
            let exact = output_dir.join(&image.subfolder).join(&image.filename);
            if is_file(&exact).await {
                return Ok(Some(exact));
            }
            tracing::debug!(
                expected = %exact.display(),
                "Reported artifact not found, falling back to prefix match",
            );
        } else {
            tracing::warn!(
                filename = %image.filename,
                subfolder = %image.subfolder,
                "Ignoring engine-reported path outside the output directory",
            );
        }
    }

    if temp_prefix.is_empty() {
        return Ok(None);
    }

    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(temp_prefix) && entry.file_type().await?.is_file() {
            matches.push(entry.path());
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}

/// Copy `source` to `destination`, then delete `source` best-effort.
///
/// Only the copy can fail the delivery.
pub async fn deliver(source: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, destination).await?;

    if let Err(e) = tokio::fs::remove_file(source).await {
        tracing::warn!(
            source = %source.display(),
            error = %e,
            "Failed to remove engine output after delivery",
        );
    }
    Ok(())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Relative path made only of normal components (no `..`, no root).
fn is_plain_relative(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(filename: &str, subfolder: &str) -> OutputImage {
        OutputImage {
            filename: filename.into(),
            subfolder: subfolder.into(),
            kind: "output".into(),
        }
    }

    #[tokio::test]
    async fn exact_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vs_temp_1_00001_.png"), b"a").unwrap();
        std::fs::write(dir.path().join("vs_temp_1_00000_.png"), b"b").unwrap();

        let found = locate_artifact(dir.path(), Some(&image("vs_temp_1_00001_.png", "")), "vs_temp_1_")
            .await
            .unwrap();
        assert_eq!(found, Some(dir.path().join("vs_temp_1_00001_.png")));
    }

    #[tokio::test]
    async fn exact_match_honours_subfolder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("staging")).unwrap();
        std::fs::write(dir.path().join("staging/out.png"), b"a").unwrap();

        let found = locate_artifact(dir.path(), Some(&image("out.png", "staging")), "vs_temp_9_")
            .await
            .unwrap();
        assert_eq!(found, Some(dir.path().join("staging").join("out.png")));
    }

    #[tokio::test]
    async fn falls_back_to_first_prefix_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vs_temp_1_00002_.png"), b"a").unwrap();
        std::fs::write(dir.path().join("vs_temp_1_00001_.png"), b"b").unwrap();
        std::fs::write(dir.path().join("other_00001_.png"), b"c").unwrap();

        let found = locate_artifact(dir.path(), Some(&image("renamed.png", "")), "vs_temp_1_")
            .await
            .unwrap();
        assert_eq!(found, Some(dir.path().join("vs_temp_1_00001_.png")));
    }

    #[tokio::test]
    async fn nothing_found_is_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("unrelated.png"), b"a").unwrap();

        let found = locate_artifact(dir.path(), Some(&image("gone.png", "")), "vs_temp_1_")
            .await
            .unwrap();
        assert_eq!(found, None);

        let missing_dir = dir.path().join("absent");
        assert_eq!(locate_artifact(&missing_dir, None, "vs_temp_1_").await.unwrap(), None);
    }

    #[tokio::test]
    async fn traversal_in_reported_name_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output");
        std::fs::create_dir(&output).unwrap();
        std::fs::write(dir.path().join("secret.png"), b"a").unwrap();

        let found = locate_artifact(&output, Some(&image("../secret.png", "")), "vs_temp_1_")
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn deliver_copies_then_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("vs_temp_1_00001_.png");
        std::fs::write(&source, b"staged").unwrap();
        let destination = dir.path().join("outputs/nested/staged_00001.png");

        deliver(&source, &destination).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), b"staged");
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn deliver_fails_when_source_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = deliver(&dir.path().join("nope.png"), &dir.path().join("out.png")).await;
        assert!(result.is_err());
    }
}
