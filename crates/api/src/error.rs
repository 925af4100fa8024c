use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use vstage_pipeline::error::PipelineError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`PipelineError`] and adds an opaque internal variant. Implements
/// [`IntoResponse`] to produce consistent `{"error", "code"}` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Pipeline(err) => classify_pipeline_error(err),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map a pipeline failure onto an HTTP status, error code, and message.
fn classify_pipeline_error(err: &PipelineError) -> (StatusCode, &'static str, String) {
    let status = match err {
        PipelineError::InputNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PipelineError::EngineUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::SubmissionError { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::GenerationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    match err {
        PipelineError::Io { .. } | PipelineError::HttpClient(_) => {
            tracing::error!(error = %err, "Pipeline I/O failure");
            (status, "INTERNAL_ERROR", "An internal error occurred".to_string())
        }
        _ => {
            if status.is_server_error() {
                tracing::error!(error = %err, code = err.code(), "Generation failed");
            }
            (status, err.code(), err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn status_of(err: PipelineError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn pipeline_errors_map_to_statuses() {
        assert_eq!(
            status_of(PipelineError::InputNotFound(PathBuf::from("a.png"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(PipelineError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(PipelineError::EngineUnreachable {
                url: "http://x".into(),
                reason: "refused".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(PipelineError::SubmissionError {
                status: 400,
                body: "bad".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(PipelineError::GenerationTimeout {
                prompt_id: "p".into(),
                elapsed: Duration::from_secs(600)
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(PipelineError::ArtifactMissing {
                output_dir: PathBuf::from("out"),
                temp_prefix: "vs_temp_".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
