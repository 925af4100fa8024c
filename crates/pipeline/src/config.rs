//! Pipeline configuration.
//!
//! Everything the template engine and orchestrator need from the
//! deployment is carried here and injected at construction, so several
//! pipelines (e.g. one per mock engine in tests) can coexist in a process.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Default ComfyUI HTTP endpoint.
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:8188";

/// Default ComfyUI installation directory.
pub const DEFAULT_ENGINE_BASE_DIR: &str = "~/ComfyUI";

/// Default directory for delivered artifacts.
pub const DEFAULT_OUTPUT_DIR: &str = "data/outputs";

/// Default workflow template location.
pub const DEFAULT_TEMPLATE_PATH: &str = "workflows/virtual_staging_workflow.json";

/// Default base model checkpoint.
pub const DEFAULT_CHECKPOINT: &str = "juggernautxlRagnarok.k3mq.safetensors";

/// Default delay between history polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default total polling budget.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Default per-call timeout for engine HTTP requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration errors. Raised at startup only.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to load node map from {}: {reason}", path.display())]
    NodeMap { path: PathBuf, reason: String },

    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Keys of the template nodes the pipeline rewrites.
///
/// These are bound to the template file in use; every other node is
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeMap {
    /// `LoadImage` node receiving the staged input filename.
    pub load_image: String,
    /// Positive prompt text encoder.
    pub positive_prompt: String,
    /// Sampler carrying `seed` and `denoise`.
    pub sampler: String,
    /// Checkpoint loader.
    pub checkpoint: String,
    /// Resize node bringing the input to the native working resolution.
    pub pre_scale: String,
    /// `SaveImage` node.
    pub save: String,
    /// Structural conditioning nodes (lineart, depth, segmentation).
    pub control_nets: Vec<String>,
    /// Optional final upscale node.
    pub upscale: String,
    /// VAE decode feeding the upscale (or the save node when elided).
    pub decode: String,
}

impl Default for NodeMap {
    fn default() -> Self {
        Self {
            load_image: "2".into(),
            positive_prompt: "22".into(),
            sampler: "25".into(),
            checkpoint: "7".into(),
            pre_scale: "213".into(),
            save: "126".into(),
            control_nets: vec!["10".into(), "17".into(), "216".into()],
            upscale: "131".into(),
            decode: "26".into(),
        }
    }
}

impl NodeMap {
    /// Load a node map from a JSON file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let err = |reason: String| ConfigError::NodeMap {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| err(e.to_string()))
    }
}

/// Settings for the template engine and orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// ComfyUI HTTP base URL.
    pub engine_url: String,
    /// ComfyUI installation directory.
    pub engine_base_dir: PathBuf,
    /// Where ComfyUI reads `LoadImage` inputs from.
    pub engine_input_dir: PathBuf,
    /// Where ComfyUI writes `SaveImage` outputs.
    pub engine_output_dir: PathBuf,
    /// Destination for delivered artifacts.
    pub output_dir: PathBuf,
    pub template_path: PathBuf,
    pub checkpoint_name: String,
    pub poll_interval: Duration,
    pub generation_timeout: Duration,
    /// Timeout for each individual engine HTTP call.
    pub request_timeout: Duration,
    pub nodes: NodeMap,
    /// Write a `<artifact>.json` metadata file after each success.
    pub write_sidecar: bool,
}

impl PipelineConfig {
    /// Config for an engine installed at `engine_base_dir`, with every
    /// other setting at its default.
    pub fn new(
        engine_url: impl Into<String>,
        engine_base_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let engine_base_dir = engine_base_dir.into();
        Self {
            engine_url: engine_url.into(),
            engine_input_dir: engine_base_dir.join("input"),
            engine_output_dir: engine_base_dir.join("output"),
            engine_base_dir,
            output_dir: output_dir.into(),
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            checkpoint_name: DEFAULT_CHECKPOINT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            nodes: NodeMap::default(),
            write_sidecar: true,
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                                    |
    /// |---------------------------|--------------------------------------------|
    /// | `COMFYUI_URL`             | `http://127.0.0.1:8188`                    |
    /// | `COMFYUI_BASE_PATH`       | `~/ComfyUI`                                |
    /// | `OUTPUT_DIR`              | `data/outputs`                             |
    /// | `WORKFLOW_TEMPLATE_PATH`  | `workflows/virtual_staging_workflow.json`  |
    /// | `CHECKPOINT_NAME`         | `juggernautxlRagnarok.k3mq.safetensors`    |
    /// | `POLL_INTERVAL_MS`        | `1000`                                     |
    /// | `GENERATION_TIMEOUT_SECS` | `600`                                      |
    /// | `ENGINE_REQUEST_TIMEOUT_SECS` | `30`                                   |
    /// | `WRITE_SIDECAR`           | `true`                                     |
    /// | `NODE_MAP_PATH`           | unset (built-in node keys)                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let home = lookup("HOME");
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let base = expand_home(&var("COMFYUI_BASE_PATH", DEFAULT_ENGINE_BASE_DIR), home.as_deref());
        let mut config = Self::new(
            var("COMFYUI_URL", DEFAULT_ENGINE_URL),
            base,
            var("OUTPUT_DIR", DEFAULT_OUTPUT_DIR),
        );

        config.template_path = PathBuf::from(var("WORKFLOW_TEMPLATE_PATH", DEFAULT_TEMPLATE_PATH));
        config.checkpoint_name = var("CHECKPOINT_NAME", DEFAULT_CHECKPOINT);
        config.poll_interval = Duration::from_millis(parse_var(&lookup, "POLL_INTERVAL_MS", 1000)?);
        config.generation_timeout =
            Duration::from_secs(parse_var(&lookup, "GENERATION_TIMEOUT_SECS", 600)?);
        config.request_timeout =
            Duration::from_secs(parse_var(&lookup, "ENGINE_REQUEST_TIMEOUT_SECS", 30)?);
        config.write_sidecar = parse_var(&lookup, "WRITE_SIDECAR", true)?;

        if config.poll_interval.is_zero() {
            return Err(ConfigError::InvalidVar {
                var: "POLL_INTERVAL_MS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        if let Some(path) = lookup("NODE_MAP_PATH").filter(|p| !p.trim().is_empty()) {
            config.nodes = NodeMap::load(Path::new(&path))?;
        }

        Ok(config)
    }

    /// Create the engine input/output directories and the output directory.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [&self.engine_input_dir, &self.engine_output_dir, &self.output_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidVar {
                var,
                value,
                reason: e.to_string(),
            }),
    }
}

/// Expand a leading `~` to the home directory, when one is known.
fn expand_home(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => PathBuf::from(home),
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            Path::new(home).join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = PipelineConfig::from_lookup(lookup(&[("HOME", "/home/stager")])).unwrap();
        assert_eq!(config.engine_url, "http://127.0.0.1:8188");
        assert_eq!(config.engine_base_dir, PathBuf::from("/home/stager/ComfyUI"));
        assert_eq!(config.engine_input_dir, PathBuf::from("/home/stager/ComfyUI/input"));
        assert_eq!(config.engine_output_dir, PathBuf::from("/home/stager/ComfyUI/output"));
        assert_eq!(config.output_dir, PathBuf::from("data/outputs"));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.generation_timeout, Duration::from_secs(600));
        assert_eq!(config.checkpoint_name, DEFAULT_CHECKPOINT);
        assert_eq!(config.nodes, NodeMap::default());
        assert!(config.write_sidecar);
    }

    #[test]
    fn overrides_are_applied() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("COMFYUI_URL", "http://gpu-box:8188"),
            ("COMFYUI_BASE_PATH", "/srv/comfy"),
            ("POLL_INTERVAL_MS", "250"),
            ("GENERATION_TIMEOUT_SECS", "90"),
            ("WRITE_SIDECAR", "false"),
        ]))
        .unwrap();
        assert_eq!(config.engine_url, "http://gpu-box:8188");
        assert_eq!(config.engine_input_dir, PathBuf::from("/srv/comfy/input"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.generation_timeout, Duration::from_secs(90));
        assert!(!config.write_sidecar);
    }

    #[test]
    fn invalid_number_is_an_error_not_a_panic() {
        let err = PipelineConfig::from_lookup(lookup(&[("GENERATION_TIMEOUT_SECS", "ten")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar { var: "GENERATION_TIMEOUT_SECS", .. }
        ));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = PipelineConfig::from_lookup(lookup(&[("POLL_INTERVAL_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: "POLL_INTERVAL_MS", .. }));
    }

    #[test]
    fn tilde_without_home_is_left_alone() {
        assert_eq!(expand_home("~/ComfyUI", None), PathBuf::from("~/ComfyUI"));
        assert_eq!(expand_home("~", Some("/h")), PathBuf::from("/h"));
        assert_eq!(expand_home("/abs", Some("/h")), PathBuf::from("/abs"));
    }

    #[test]
    fn node_map_file_overrides_selected_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, r#"{"sampler": "3", "control_nets": ["40"]}"#).unwrap();

        let nodes = NodeMap::load(&path).unwrap();
        assert_eq!(nodes.sampler, "3");
        assert_eq!(nodes.control_nets, vec!["40".to_string()]);
        assert_eq!(nodes.save, "126");
    }

    #[test]
    fn shipped_node_map_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../workflows/node_map.json");
        assert_eq!(NodeMap::load(&path).unwrap(), NodeMap::default());
    }

    #[test]
    fn malformed_node_map_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(NodeMap::load(&path), Err(ConfigError::NodeMap { .. })));
    }

    #[test]
    fn ensure_directories_creates_all_three() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(DEFAULT_ENGINE_URL, dir.path().join("comfy"), dir.path().join("out"));
        config.ensure_directories().unwrap();
        assert!(config.engine_input_dir.is_dir());
        assert!(config.engine_output_dir.is_dir());
        assert!(config.output_dir.is_dir());
    }
}
