//! Workflow template instantiation.
//!
//! A [`GraphTemplate`] is loaded and validated once, then shared read-only.
//! Each request works on its own deep copy: values are bound into the nodes
//! listed in the [`NodeMap`], and the upscale stage is either configured or
//! removed from the graph depending on the target resolution.

use std::path::{Path, PathBuf};

use rand::Rng;
use vstage_core::image_probe;
use vstage_core::scaling;
use vstage_core::task::{ControlTuning, TaskCategory};
use vstage_core::workflow::{NodeLink, Workflow, WorkflowNode};

use crate::config::NodeMap;

const SLOT_IMAGE: &str = "image";
const SLOT_TEXT: &str = "text";
const SLOT_SEED: &str = "seed";
const SLOT_DENOISE: &str = "denoise";
const SLOT_CKPT_NAME: &str = "ckpt_name";
const SLOT_FACTOR: &str = "factor";
const SLOT_FILENAME_PREFIX: &str = "filename_prefix";
const SLOT_IMAGES: &str = "images";
const SLOT_STRENGTH: &str = "strength";

/// Output index of the image on decode and upscale nodes.
const IMAGE_OUTPUT: u32 = 0;

/// Errors raised while loading or instantiating a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Failed to load workflow template {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("Workflow template has no '{role}' node with key '{node_key}'")]
    MissingTemplateNode { role: &'static str, node_key: String },

    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),
}

/// Per-request inputs to [`GraphTemplate::instantiate`].
#[derive(Debug, Clone)]
pub struct TemplateParams {
    pub prompt: String,
    /// Image measured for the pre-scale factor.
    pub input_image: PathBuf,
    /// Filename the engine's `LoadImage` node should read.
    pub input_image_name: String,
    /// `filename_prefix` for the save node.
    pub output_prefix: String,
    /// Shortest side of the delivered image, in pixels.
    pub target_resolution: u32,
    pub task: TaskCategory,
}

/// Every value bound into the template for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBinding {
    pub prompt: String,
    pub input_image_name: String,
    pub output_prefix: String,
    pub seed: u64,
    pub checkpoint: String,
    pub tuning: ControlTuning,
    pub input_scale: f64,
    pub final_scale: f64,
    /// Remove the upscale node and save straight from the decoder.
    pub bypass_upscale: bool,
}

impl ParameterBinding {
    /// Derive the binding from request parameters and measured input
    /// dimensions.
    pub fn derive(
        params: &TemplateParams,
        checkpoint: &str,
        dimensions: (u32, u32),
        seed: u64,
    ) -> Self {
        let (width, height) = dimensions;
        Self {
            prompt: params.prompt.clone(),
            input_image_name: params.input_image_name.clone(),
            output_prefix: params.output_prefix.clone(),
            seed,
            checkpoint: checkpoint.to_string(),
            tuning: params.task.tuning(),
            input_scale: scaling::input_scale(width, height),
            final_scale: scaling::final_scale(params.target_resolution),
            bypass_upscale: scaling::is_native_resolution(params.target_resolution),
        }
    }
}

/// Fresh sampler seed, uniform over `1..=u64::MAX`.
pub fn random_seed() -> u64 {
    rand::rng().random_range(1..=u64::MAX)
}

/// Immutable workflow template plus the node keys it is bound through.
#[derive(Debug, Clone)]
pub struct GraphTemplate {
    base: Workflow,
    nodes: NodeMap,
    checkpoint: String,
}

impl GraphTemplate {
    /// Load and validate a template file.
    pub fn load(
        path: &Path,
        nodes: NodeMap,
        checkpoint: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        let load_err = |reason: String| TemplateError::Load {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let base: Workflow = text.parse().map_err(|e: vstage_core::error::CoreError| {
            load_err(e.to_string())
        })?;

        let template = Self::from_workflow(base, nodes, checkpoint)?;
        tracing::info!(
            path = %path.display(),
            nodes = template.base.len(),
            "Workflow template loaded",
        );
        Ok(template)
    }

    /// Wrap an already-parsed workflow. The graph must be acyclic with no
    /// dangling references.
    pub fn from_workflow(
        base: Workflow,
        nodes: NodeMap,
        checkpoint: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        base.validate()
            .map_err(|e| TemplateError::InvalidGraph(e.to_string()))?;
        Ok(Self {
            base,
            nodes,
            checkpoint: checkpoint.into(),
        })
    }

    pub fn base(&self) -> &Workflow {
        &self.base
    }

    pub fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    pub fn checkpoint(&self) -> &str {
        &self.checkpoint
    }

    /// Measure the input and derive the binding for a request.
    ///
    /// Unreadable images fall back to the default dimensions with a
    /// warning; they never fail the request.
    pub fn bind(&self, params: &TemplateParams, seed: u64) -> ParameterBinding {
        let dimensions = image_probe::dimensions_or_default(&params.input_image);
        ParameterBinding::derive(params, &self.checkpoint, dimensions, seed)
    }

    /// Concrete graph for a request, with a freshly drawn seed.
    pub fn instantiate(&self, params: &TemplateParams) -> Result<Workflow, TemplateError> {
        self.instantiate_with_seed(params, random_seed())
    }

    /// Concrete graph for a request with a caller-chosen seed.
    pub fn instantiate_with_seed(
        &self,
        params: &TemplateParams,
        seed: u64,
    ) -> Result<Workflow, TemplateError> {
        self.apply(&self.bind(params, seed))
    }

    /// Apply a binding to a copy of the base graph.
    pub fn apply(&self, binding: &ParameterBinding) -> Result<Workflow, TemplateError> {
        let keys = &self.nodes;
        let mut graph = self.base.clone();

        required(&mut graph, "load_image", &keys.load_image)?
            .set_value(SLOT_IMAGE, binding.input_image_name.as_str());
        required(&mut graph, "positive_prompt", &keys.positive_prompt)?
            .set_value(SLOT_TEXT, binding.prompt.as_str());

        let sampler = required(&mut graph, "sampler", &keys.sampler)?;
        sampler.set_value(SLOT_SEED, binding.seed);
        sampler.set_value(SLOT_DENOISE, binding.tuning.denoise);

        required(&mut graph, "checkpoint", &keys.checkpoint)?
            .set_value(SLOT_CKPT_NAME, binding.checkpoint.as_str());
        required(&mut graph, "pre_scale", &keys.pre_scale)?
            .set_value(SLOT_FACTOR, binding.input_scale);
        required(&mut graph, "save", &keys.save)?
            .set_value(SLOT_FILENAME_PREFIX, binding.output_prefix.as_str());

        for key in &keys.control_nets {
            required(&mut graph, "control_net", key)?
                .set_value(SLOT_STRENGTH, binding.tuning.control_strength);
        }

        let image_source = if binding.bypass_upscale {
            if !graph.contains(&keys.decode) {
                return Err(missing("decode", &keys.decode));
            }
            if graph.remove_node(&keys.upscale).is_some() {
                tracing::debug!(node = %keys.upscale, "Upscale stage elided at native resolution");
            }
            NodeLink::new(keys.decode.as_str(), IMAGE_OUTPUT)
        } else {
            required(&mut graph, "upscale", &keys.upscale)?
                .set_value(SLOT_FACTOR, binding.final_scale);
            NodeLink::new(keys.upscale.as_str(), IMAGE_OUTPUT)
        };
        required(&mut graph, "save", &keys.save)?.set_link(SLOT_IMAGES, image_source);

        graph
            .validate()
            .map_err(|e| TemplateError::InvalidGraph(e.to_string()))?;
        Ok(graph)
    }
}

fn missing(role: &'static str, key: &str) -> TemplateError {
    TemplateError::MissingTemplateNode {
        role,
        node_key: key.to_string(),
    }
}

fn required<'g>(
    graph: &'g mut Workflow,
    role: &'static str,
    key: &str,
) -> Result<&'g mut WorkflowNode, TemplateError> {
    graph.node_mut(key).ok_or_else(|| missing(role, key))
}
