//! End-to-end driver for one generation request.
//!
//! `generate` runs strictly in sequence: validate, name, stage, instantiate,
//! submit, poll, retrieve. The staged input is an RAII guard, so it is
//! removed on every exit path including cancellation. Concurrent calls share
//! only the read-only template and the engine directories, where the
//! per-request temporary prefix keeps filenames apart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use vstage_comfyui::api::ComfyUIApi;
use vstage_comfyui::history::{prompt_outcome, OutputImage, PromptOutcome};
use vstage_core::{image_probe, naming, scaling};
use vstage_core::task::TaskCategory;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::retrieve;
use crate::sidecar::{self, GenerationMetadata};
use crate::staging::StagedArtifact;
use crate::template::{random_seed, GraphTemplate, ParameterBinding, TemplateParams};
use crate::wait::{self, Clock, PollBudget, Probe, TokioClock, WaitError};

/// Target resolution used when the caller does not choose one.
pub const DEFAULT_TARGET_RESOLUTION: u32 = 1024;

/// Caller-supplied parameters for one generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub input_path: PathBuf,
    /// Shortest side of the delivered image, in pixels.
    pub target_resolution: u32,
    pub task: TaskCategory,
    /// Prefix of the delivered filename; `staged` when unset.
    pub output_prefix: Option<String>,
    /// Room description recorded in the sidecar.
    pub description: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, input_path: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            input_path: input_path.into(),
            target_resolution: DEFAULT_TARGET_RESOLUTION,
            task: TaskCategory::default(),
            output_prefix: None,
            description: None,
        }
    }

    pub fn with_target_resolution(mut self, target_resolution: u32) -> Self {
        self.target_resolution = target_resolution;
        self
    }

    pub fn with_task(mut self, task: TaskCategory) -> Self {
        self.task = task;
        self
    }

    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = Some(prefix.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the parameters that do not need the filesystem.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.prompt.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("prompt must not be empty".into()));
        }
        if self.target_resolution == 0 {
            return Err(PipelineError::InvalidRequest(
                "target_resolution must be greater than zero".into(),
            ));
        }
        if let Some(prefix) = &self.output_prefix {
            if prefix.contains(['/', '\\']) || prefix.contains("..") {
                return Err(PipelineError::InvalidRequest(format!(
                    "output_prefix '{prefix}' must be a plain file name prefix"
                )));
            }
        }
        Ok(())
    }
}

/// A delivered artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub path: PathBuf,
    pub prompt_id: String,
    pub seed: u64,
    /// Name the engine reported for its own output file.
    pub engine_filename: String,
}

/// Drives generation requests against one ComfyUI instance.
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    template: Arc<GraphTemplate>,
    api: ComfyUIApi,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    /// Orchestrator talking to `config.engine_url` on the real clock.
    pub fn new(
        config: Arc<PipelineConfig>,
        template: Arc<GraphTemplate>,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let api = ComfyUIApi::with_client(client, config.engine_url.clone());
        Ok(Self::with_parts(config, template, api, Arc::new(TokioClock::new())))
    }

    pub fn with_parts(
        config: Arc<PipelineConfig>,
        template: Arc<GraphTemplate>,
        api: ComfyUIApi,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            template,
            api,
            clock,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Whether the engine answers `GET /system_stats`.
    pub async fn engine_reachable(&self) -> bool {
        self.api.system_stats().await.is_ok()
    }

    /// Run one request and return the path of the delivered artifact.
    pub async fn generate_path(
        &self,
        prompt: &str,
        input_path: &Path,
        target_resolution: u32,
        task: TaskCategory,
    ) -> Result<PathBuf, PipelineError> {
        let request = GenerationRequest::new(prompt, input_path)
            .with_target_resolution(target_resolution)
            .with_task(task);
        let artifact = self.generate(&request, &CancellationToken::new()).await?;
        Ok(artifact.path)
    }

    /// Run one request to a terminal state.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedArtifact, PipelineError> {
        request.validate()?;
        match tokio::fs::metadata(&request.input_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(PipelineError::InputNotFound(request.input_path.clone())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::InputNotFound(request.input_path.clone()))
            }
            Err(e) => return Err(PipelineError::io("reading input image")(e)),
        }

        let suffix = naming::sequence_suffix(&request.input_path);
        let final_path = self.config.output_dir.join(naming::final_artifact_filename(
            request.output_prefix.as_deref(),
            &suffix,
        ));
        let temp_prefix = naming::temp_prefix(&suffix, unix_millis(), &naming::new_nonce());
        let original_name = request
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("input_{suffix}.png"));

        tracing::info!(
            input = %request.input_path.display(),
            task = %request.task,
            target_resolution = request.target_resolution,
            temp_prefix = %temp_prefix,
            "Starting generation",
        );

        let staged = StagedArtifact::stage(
            &request.input_path,
            &self.config.engine_input_dir,
            &naming::staged_input_filename(&temp_prefix, &original_name),
        )
        .await
        .map_err(PipelineError::io("staging input image"))?;

        // `staged` is dropped on every return below, removing the copy.
        let result = self
            .run_job(request, cancel, &staged, &temp_prefix, &final_path)
            .await;
        drop(staged);
        result
    }

    async fn run_job(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        staged: &StagedArtifact,
        temp_prefix: &str,
        final_path: &Path,
    ) -> Result<GeneratedArtifact, PipelineError> {
        let params = TemplateParams {
            prompt: request.prompt.clone(),
            input_image: request.input_path.clone(),
            input_image_name: staged.file_name().to_string(),
            output_prefix: temp_prefix.to_string(),
            target_resolution: request.target_resolution,
            task: request.task,
        };
        let dimensions = measure_input(&request.input_path).await;
        let binding =
            ParameterBinding::derive(&params, self.template.checkpoint(), dimensions, random_seed());
        let workflow = self.template.apply(&binding)?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { prompt_id: None });
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        let submitted = self
            .api
            .submit_workflow(&workflow, &client_id)
            .await
            .map_err(|e| PipelineError::from_engine(self.api.api_url(), e))?;
        let prompt_id = submitted.prompt_id;

        tracing::info!(
            prompt_id = %prompt_id,
            queue_number = submitted.number,
            seed = binding.seed,
            "Workflow submitted to ComfyUI",
        );
        if has_node_errors(&submitted.node_errors) {
            tracing::warn!(
                prompt_id = %prompt_id,
                node_errors = %submitted.node_errors,
                "ComfyUI accepted the prompt with node errors",
            );
        }

        let image = self.wait_for_output(&prompt_id, cancel).await?;

        let found = retrieve::locate_artifact(&self.config.engine_output_dir, Some(&image), temp_prefix)
            .await
            .map_err(PipelineError::io("searching engine output"))?
            .ok_or_else(|| PipelineError::ArtifactMissing {
                output_dir: self.config.engine_output_dir.clone(),
                temp_prefix: temp_prefix.to_string(),
            })?;

        retrieve::deliver(&found, final_path)
            .await
            .map_err(PipelineError::io("delivering artifact"))?;

        tracing::info!(
            prompt_id = %prompt_id,
            engine_file = %found.display(),
            path = %final_path.display(),
            "Generation complete",
        );

        if self.config.write_sidecar {
            let metadata = GenerationMetadata {
                prompt: request.prompt.clone(),
                description: request.description.clone(),
                input_image: request
                    .input_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                resolution_setting: request.target_resolution,
                task_type: request.task,
                seed: binding.seed,
                prompt_id: prompt_id.clone(),
                created_at: chrono::Utc::now(),
            };
            sidecar::write_sidecar(final_path, &metadata).await;
        }

        Ok(GeneratedArtifact {
            path: final_path.to_path_buf(),
            prompt_id,
            seed: binding.seed,
            engine_filename: image.filename,
        })
    }

    /// Poll history until the prompt has a saved image.
    ///
    /// Transient history failures are retried on the next tick; only the
    /// budget, cancellation, or an engine-reported error end the wait early.
    async fn wait_for_output(
        &self,
        prompt_id: &str,
        cancel: &CancellationToken,
    ) -> Result<OutputImage, PipelineError> {
        let budget = PollBudget {
            interval: self.config.poll_interval,
            timeout: self.config.generation_timeout,
        };
        let api = &self.api;
        let started = self.clock.now();

        let outcome = wait::poll_until(self.clock.as_ref(), budget, cancel, |attempt| async move {
            match api.get_history(prompt_id).await {
                Ok(history) => match prompt_outcome(&history, prompt_id) {
                    PromptOutcome::Completed(image) => Probe::Ready(image),
                    PromptOutcome::Failed(reason) => Probe::Failed(reason),
                    PromptOutcome::Pending => Probe::Pending,
                },
                Err(e) => {
                    tracing::debug!(prompt_id, attempt, error = %e, "History poll failed, retrying");
                    Probe::Pending
                }
            }
        })
        .await;

        let elapsed_ms = self.clock.now().saturating_sub(started).as_millis() as u64;
        match outcome {
            Ok(image) => {
                tracing::debug!(prompt_id, elapsed_ms, filename = %image.filename, "Prompt finished");
                Ok(image)
            }
            Err(WaitError::TimedOut { elapsed, attempts }) => {
                tracing::warn!(prompt_id, elapsed_ms, attempts, "Generation timed out");
                self.cancel_remote(prompt_id).await;
                Err(PipelineError::GenerationTimeout {
                    prompt_id: prompt_id.to_string(),
                    elapsed,
                })
            }
            Err(WaitError::Cancelled) => {
                tracing::info!(prompt_id, elapsed_ms, "Generation cancelled by caller");
                self.cancel_remote(prompt_id).await;
                Err(PipelineError::Cancelled {
                    prompt_id: Some(prompt_id.to_string()),
                })
            }
            Err(WaitError::Failed(reason)) => {
                tracing::error!(prompt_id, elapsed_ms, reason = %reason, "ComfyUI reported an execution error");
                Err(PipelineError::GenerationFailed {
                    prompt_id: prompt_id.to_string(),
                    reason,
                })
            }
        }
    }

    /// Best-effort removal of an abandoned prompt from the engine queue.
    async fn cancel_remote(&self, prompt_id: &str) {
        if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id, error = %e, "Failed to cancel prompt on ComfyUI");
        }
    }
}

/// Whether a `node_errors` block from `POST /prompt` lists anything.
fn has_node_errors(node_errors: &serde_json::Value) -> bool {
    match node_errors {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Read the input's dimensions on the blocking pool.
async fn measure_input(path: &Path) -> (u32, u32) {
    let path = path.to_path_buf();
    match tokio::task::spawn_blocking(move || image_probe::dimensions_or_default(&path)).await {
        Ok(dimensions) => dimensions,
        Err(e) => {
            tracing::warn!(error = %e, "Dimension probe task failed, using defaults");
            scaling::DEFAULT_DIMENSIONS
        }
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
