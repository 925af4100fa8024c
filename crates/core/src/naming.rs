//! Artifact naming conventions.
//!
//! Inputs follow `empty_room_<NNNNN>.<ext>`. The trailing sequence number
//! is carried through to the final artifact and to the temporary names
//! used inside the engine's shared input/output directories.
//!
//! # Examples
//!
//! ```
//! use std::path::Path;
//! use vstage_core::naming::{final_artifact_filename, sequence_suffix, temp_prefix};
//!
//! let suffix = sequence_suffix(Path::new("data/inputs/empty_room_00012.png"));
//! assert_eq!(suffix, "00012");
//! assert_eq!(final_artifact_filename(None, &suffix), "staged_00012.png");
//! assert_eq!(temp_prefix(&suffix, 1_700_000_000_000, "a1b2c3d4"), "vs_temp_00012_1700000000000_a1b2c3d4_");
//! ```

use std::path::Path;

/// Suffix used when the input name carries no sequence number.
pub const DEFAULT_SEQUENCE_SUFFIX: &str = "00001";

/// Prefix of the final artifact when the request does not supply one.
pub const DEFAULT_OUTPUT_PREFIX: &str = "staged";

/// Prefix shared by every temporary engine-side file.
pub const TEMP_PREFIX_ROOT: &str = "vs_temp";

/// Last `_`-separated token of the file stem.
pub fn sequence_suffix(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match stem.rsplit('_').next() {
        Some(last) if !last.is_empty() => last.to_string(),
        _ => DEFAULT_SEQUENCE_SUFFIX.to_string(),
    }
}

/// Filename of the delivered artifact: `{prefix}_{suffix}.png`.
pub fn final_artifact_filename(prefix: Option<&str>, suffix: &str) -> String {
    let prefix = prefix
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_OUTPUT_PREFIX);
    format!("{prefix}_{suffix}.png")
}

/// Per-request prefix for intermediate engine-side filenames.
///
/// The nonce keeps two requests for the same input that start in the
/// same millisecond apart.
pub fn temp_prefix(suffix: &str, unix_millis: u128, nonce: &str) -> String {
    format!("{TEMP_PREFIX_ROOT}_{suffix}_{unix_millis}_{nonce}_")
}

/// Short random nonce for [`temp_prefix`].
pub fn new_nonce() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Name of the staged input copy inside the engine's input directory.
pub fn staged_input_filename(temp_prefix: &str, original_name: &str) -> String {
    format!("{temp_prefix}{original_name}")
}
