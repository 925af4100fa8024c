use std::path::PathBuf;
use std::time::Duration;

use vstage_comfyui::api::ComfyUIApiError;

use crate::template::TemplateError;

/// Failures of a single generation request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Input image not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    /// The deployed template does not match the configured node keys.
    #[error("Workflow template has no '{role}' node with key '{node_key}'")]
    MissingTemplateNode { role: &'static str, node_key: String },

    #[error(transparent)]
    Template(TemplateError),

    #[error("Could not connect to ComfyUI at {url}. Is the service running?")]
    EngineUnreachable { url: String, reason: String },

    /// The engine answered the submission with a non-2xx status.
    #[error("ComfyUI rejected the workflow ({status}): {body}")]
    SubmissionError { status: u16, body: String },

    /// The engine answered, but not with anything usable.
    #[error("Unexpected response from ComfyUI: {0}")]
    EngineProtocol(String),

    #[error("Image generation timed out after {}s (prompt {prompt_id})", elapsed.as_secs())]
    GenerationTimeout { prompt_id: String, elapsed: Duration },

    #[error("ComfyUI failed to execute prompt {prompt_id}: {reason}")]
    GenerationFailed { prompt_id: String, reason: String },

    #[error("Generation cancelled")]
    Cancelled { prompt_id: Option<String> },

    #[error("Generated image not found in {} (prefix {temp_prefix})", output_dir.display())]
    ArtifactMissing {
        output_dir: PathBuf,
        temp_prefix: String,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl PipelineError {
    /// Whether the caller may reasonably retry the same request.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::EngineUnreachable { .. } | PipelineError::GenerationTimeout { .. }
        )
    }

    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InputNotFound(_) => "INPUT_NOT_FOUND",
            PipelineError::InvalidRequest(_) => "INVALID_REQUEST",
            PipelineError::MissingTemplateNode { .. } => "MISSING_TEMPLATE_NODE",
            PipelineError::Template(_) => "TEMPLATE_ERROR",
            PipelineError::EngineUnreachable { .. } => "ENGINE_UNREACHABLE",
            PipelineError::SubmissionError { .. } => "SUBMISSION_ERROR",
            PipelineError::EngineProtocol(_) => "ENGINE_PROTOCOL_ERROR",
            PipelineError::GenerationTimeout { .. } => "GENERATION_TIMEOUT",
            PipelineError::GenerationFailed { .. } => "GENERATION_FAILED",
            PipelineError::Cancelled { .. } => "CANCELLED",
            PipelineError::ArtifactMissing { .. } => "ARTIFACT_MISSING",
            PipelineError::Io { .. } => "IO_ERROR",
            PipelineError::HttpClient(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn io(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| PipelineError::Io { context, source }
    }

    /// Classify an engine call failure.
    pub(crate) fn from_engine(url: &str, err: ComfyUIApiError) -> Self {
        if err.is_connect() {
            return PipelineError::EngineUnreachable {
                url: url.to_string(),
                reason: err.to_string(),
            };
        }
        match err {
            ComfyUIApiError::ApiError { status, body } => {
                PipelineError::SubmissionError { status, body }
            }
            ComfyUIApiError::Request(e) => PipelineError::EngineProtocol(e.to_string()),
        }
    }
}

impl From<TemplateError> for PipelineError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::MissingTemplateNode { role, node_key } => {
                PipelineError::MissingTemplateNode { role, node_key }
            }
            other => PipelineError::Template(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_kinds() {
        assert!(PipelineError::EngineUnreachable {
            url: "http://x".into(),
            reason: "refused".into()
        }
        .is_retriable());
        assert!(PipelineError::GenerationTimeout {
            prompt_id: "p".into(),
            elapsed: Duration::from_secs(600)
        }
        .is_retriable());
        assert!(!PipelineError::SubmissionError {
            status: 400,
            body: String::new()
        }
        .is_retriable());
        assert!(!PipelineError::InputNotFound(PathBuf::from("a.png")).is_retriable());
    }

    #[test]
    fn missing_node_keeps_its_own_kind() {
        let err: PipelineError = TemplateError::MissingTemplateNode {
            role: "save",
            node_key: "126".into(),
        }
        .into();
        assert_eq!(err.code(), "MISSING_TEMPLATE_NODE");
        assert_eq!(
            err.to_string(),
            "Workflow template has no 'save' node with key '126'"
        );

        let err: PipelineError = TemplateError::InvalidGraph("cycle".into()).into();
        assert_eq!(err.code(), "TEMPLATE_ERROR");
    }

    #[test]
    fn rejected_submission_maps_status_and_body() {
        let err = PipelineError::from_engine(
            "http://x",
            ComfyUIApiError::ApiError {
                status: 400,
                body: "bad node".into(),
            },
        );
        assert!(matches!(
            err,
            PipelineError::SubmissionError { status: 400, ref body } if body == "bad node"
        ));
    }

    #[test]
    fn timeout_message_mentions_seconds() {
        let err = PipelineError::GenerationTimeout {
            prompt_id: "abc".into(),
            elapsed: Duration::from_secs(600),
        };
        assert_eq!(err.to_string(), "Image generation timed out after 600s (prompt abc)");
    }
}
