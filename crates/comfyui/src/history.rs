//! Typed model of the ComfyUI `/history/{prompt_id}` response.
//!
//! The response maps prompt IDs to their execution record. A prompt only
//! appears once the engine has finished with it (successfully or not):
//!
//! ```json
//! {
//!   "8d1c...": {
//!     "outputs": { "126": { "images": [{ "filename": "x_00001_.png", "subfolder": "", "type": "output" }] } },
//!     "status": { "status_str": "success", "completed": true, "messages": [] }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

/// Image type tag for files written to the engine's output directory.
pub const IMAGE_TYPE_OUTPUT: &str = "output";

/// Status string the engine reports for a failed prompt.
const STATUS_ERROR: &str = "error";

/// Message kind carrying the failure details.
const MSG_EXECUTION_ERROR: &str = "execution_error";

/// Full history response, keyed by prompt ID.
pub type History = HashMap<String, HistoryEntry>;

/// Execution record for a single prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Per-node outputs, keyed by node ID.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    /// Final execution status. Older engine builds omit it.
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

/// Outputs produced by one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputImage>,
}

/// A single file written by a node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    /// Subdirectory relative to the engine's output root; usually empty.
    #[serde(default)]
    pub subfolder: String,
    /// `"output"` for saved files, `"temp"` for previews.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Execution status block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[kind, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// What a single history lookup says about a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// Not in history yet, or finished without a saved image.
    Pending,
    /// Finished and saved this file.
    Completed(OutputImage),
    /// The engine reported an execution error.
    Failed(String),
}

impl HistoryEntry {
    /// First saved image across all nodes, scanning node keys in
    /// lexicographic order (`"126"` comes before `"9"`).
    pub fn first_output_image(&self) -> Option<&OutputImage> {
        self.outputs
            .values()
            .flat_map(|output| output.images.iter())
            .find(|image| image.kind == IMAGE_TYPE_OUTPUT)
    }

    /// Error reported by the engine, if execution failed.
    pub fn failure_reason(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        if status.status_str != STATUS_ERROR {
            return None;
        }

        let detail = status.messages.iter().find_map(|msg| {
            let pair = msg.as_array()?;
            if pair.first()?.as_str()? != MSG_EXECUTION_ERROR {
                return None;
            }
            let payload = pair.get(1)?;
            let message = payload.get("exception_message")?.as_str()?.trim();
            let node = payload.get("node_id").and_then(|n| n.as_str());
            Some(match node {
                Some(node) => format!("node {node}: {message}"),
                None => message.to_string(),
            })
        });

        Some(detail.unwrap_or_else(|| "execution failed".to_string()))
    }
}

/// Interpret a history response for one prompt.
pub fn prompt_outcome(history: &History, prompt_id: &str) -> PromptOutcome {
    let Some(entry) = history.get(prompt_id) else {
        return PromptOutcome::Pending;
    };

    if let Some(reason) = entry.failure_reason() {
        return PromptOutcome::Failed(reason);
    }

    match entry.first_output_image() {
        Some(image) => PromptOutcome::Completed(image.clone()),
        None => PromptOutcome::Pending,
    }
}
