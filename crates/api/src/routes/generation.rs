//! Handler for `POST /api/v1/generate`.

use std::path::PathBuf;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use vstage_core::task::TaskCategory;
use vstage_pipeline::orchestrator::{GenerationRequest, DEFAULT_TARGET_RESOLUTION};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

fn default_target_resolution() -> u32 {
    DEFAULT_TARGET_RESOLUTION
}

/// Request body for `POST /api/v1/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub prompt: String,
    /// Path of the empty-room image on the server.
    pub image_path: PathBuf,
    #[serde(default = "default_target_resolution")]
    pub target_resolution: u32,
    /// Task label; unknown labels fall back to `style`.
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub room_description: Option<String>,
    #[serde(default)]
    pub output_prefix: Option<String>,
}

/// Response payload for a completed generation.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub image_path: String,
    pub prompt_id: String,
    pub seed: u64,
}

impl GenerateBody {
    fn into_request(self) -> GenerationRequest {
        let task = self
            .task_type
            .as_deref()
            .map(TaskCategory::from_label_or_default)
            .unwrap_or_default();

        GenerationRequest {
            prompt: self.prompt,
            input_path: self.image_path,
            target_resolution: self.target_resolution,
            task,
            output_prefix: self.output_prefix,
            description: self.room_description,
        }
    }
}

/// POST /api/v1/generate -- stage one room and return the artifact path.
///
/// The generation runs in its own task. If the client goes away (or the
/// request times out) this handler is dropped, the drop guard fires, and
/// the task cancels the prompt on ComfyUI and cleans up.
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> AppResult<Json<DataResponse<GenerateResponse>>> {
    let request = body.into_request();
    request.validate()?;

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.generate(&request, &cancel).await });

    let artifact = task
        .await
        .map_err(|e| AppError::InternalError(format!("Generation task failed: {e}")))??;

    Ok(Json(DataResponse {
        data: GenerateResponse {
            image_path: artifact.path.display().to_string(),
            prompt_id: artifact.prompt_id,
            seed: artifact.seed,
        },
    }))
}
