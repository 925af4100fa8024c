//! Typed ComfyUI workflow graph (API format).
//!
//! A workflow is a JSON object keyed by node ID. Every node carries a
//! `class_type` and an `inputs` object whose values are either literals
//! or links to another node's output, encoded by ComfyUI as a
//! two-element array `[source_node_id, output_index]`:
//!
//! ```json
//! {
//!   "26":  { "class_type": "VAEDecode", "inputs": { "samples": ["25", 0], "vae": ["7", 2] } },
//!   "126": { "class_type": "SaveImage", "inputs": { "filename_prefix": "out", "images": ["26", 0] } }
//! }
//! ```
//!
//! Only a handful of nodes are ever rewritten by the pipeline; everything
//! else passes through untouched, including unknown per-node fields such
//! as `_meta`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Reference to output slot `1` of node `0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeLink(pub String, pub u32);

impl NodeLink {
    pub fn new(node: impl Into<String>, output_index: u32) -> Self {
        Self(node.into(), output_index)
    }

    /// Key of the upstream node.
    pub fn node(&self) -> &str {
        &self.0
    }

    /// Output slot index on the upstream node.
    pub fn output_index(&self) -> u32 {
        self.1
    }
}

/// Value bound to a single input slot.
///
/// Deserialization tries [`NodeLink`] first, so any `[string, unsigned]`
/// pair is treated as a connection, matching ComfyUI's own convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeInput {
    Link(NodeLink),
    Value(serde_json::Value),
}

/// A single node in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// ComfyUI class type (e.g. "KSampler", "SaveImage").
    pub class_type: String,
    /// Input slots by name.
    #[serde(default)]
    pub inputs: BTreeMap<String, NodeInput>,
    /// Any other fields on the node (`_meta`, ...), kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowNode {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Raw input slot, link or literal.
    pub fn input(&self, slot: &str) -> Option<&NodeInput> {
        self.inputs.get(slot)
    }

    /// Literal value of a slot, `None` if absent or linked.
    pub fn value(&self, slot: &str) -> Option<&serde_json::Value> {
        match self.inputs.get(slot) {
            Some(NodeInput::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Link bound to a slot, `None` if absent or literal.
    pub fn link(&self, slot: &str) -> Option<&NodeLink> {
        match self.inputs.get(slot) {
            Some(NodeInput::Link(link)) => Some(link),
            _ => None,
        }
    }

    /// Bind a literal value, replacing whatever the slot held.
    pub fn set_value(&mut self, slot: &str, value: impl Into<serde_json::Value>) {
        self.inputs
            .insert(slot.to_string(), NodeInput::Value(value.into()));
    }

    /// Bind a link, replacing whatever the slot held.
    pub fn set_link(&mut self, slot: &str, link: NodeLink) {
        self.inputs.insert(slot.to_string(), NodeInput::Link(link));
    }
}

/// A complete workflow graph keyed by node ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow {
    nodes: BTreeMap<String, WorkflowNode>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl Workflow {
    /// Parse an API-format workflow JSON value.
    ///
    /// Fails if the value is not a non-empty object or if any node lacks
    /// a `class_type`. Graph consistency is checked separately by
    /// [`validate`](Self::validate).
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        let obj = json.as_object().ok_or_else(|| {
            CoreError::Validation("Workflow JSON must be an object".to_string())
        })?;

        if obj.is_empty() {
            return Err(CoreError::Validation(
                "Workflow JSON must contain at least one node".to_string(),
            ));
        }

        let mut nodes = BTreeMap::new();
        for (node_id, node_value) in obj {
            if node_value.get("class_type").and_then(|v| v.as_str()).is_none() {
                return Err(CoreError::Validation(format!(
                    "Node '{node_id}' is missing required 'class_type' field"
                )));
            }

            let node: WorkflowNode = serde_json::from_value(node_value.clone()).map_err(|e| {
                CoreError::Validation(format!("Node '{node_id}' is malformed: {e}"))
            })?;
            nodes.insert(node_id.clone(), node);
        }

        Ok(Self { nodes })
    }

    /// The API-format JSON the engine expects.
    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        serde_json::to_value(self)
            .map_err(|e| CoreError::Validation(format!("Workflow could not be serialised: {e}")))
    }
}

impl FromStr for Workflow {
    type Err = CoreError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| CoreError::Validation(format!("Workflow is not valid JSON: {e}")))?;
        Self::from_json(&json)
    }
}

// ---------------------------------------------------------------------------
// Access and mutation
// ---------------------------------------------------------------------------

impl Workflow {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: &str) -> Option<&WorkflowNode> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: &str) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, node: WorkflowNode) -> Option<WorkflowNode> {
        self.nodes.insert(key.into(), node)
    }

    /// Remove a node. Links pointing at it are left in place; call
    /// [`validate`](Self::validate) after rewiring.
    pub fn remove_node(&mut self, key: &str) -> Option<WorkflowNode> {
        self.nodes.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every link in the graph as `(downstream_node, input_slot, link)`.
    pub fn links(&self) -> impl Iterator<Item = (&str, &str, &NodeLink)> {
        self.nodes.iter().flat_map(|(node_id, node)| {
            node.inputs.iter().filter_map(move |(slot, input)| match input {
                NodeInput::Link(link) => Some((node_id.as_str(), slot.as_str(), link)),
                NodeInput::Value(_) => None,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Graph checks
// ---------------------------------------------------------------------------

impl Workflow {
    /// Check that every link resolves to a node in this graph and that the
    /// graph is acyclic along link edges.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.topological_order().map(|_| ())
    }

    /// Node keys ordered so that every node comes after all of its inputs.
    ///
    /// Uses Kahn's algorithm; ties are broken by key order so the result
    /// is deterministic.
    pub fn topological_order(&self) -> Result<Vec<&str>, CoreError> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.keys().map(|k| (k.as_str(), 0)).collect();
        let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();

        for (node_id, slot, link) in self.links() {
            if !self.nodes.contains_key(link.node()) {
                return Err(CoreError::Validation(format!(
                    "Node '{node_id}' input '{slot}' references missing node '{}'",
                    link.node()
                )));
            }
            *in_degree.entry(node_id).or_default() += 1;
            downstream.entry(link.node()).or_default().push(node_id);
        }

        let mut ready: VecDeque<&str> = self
            .nodes
            .keys()
            .map(String::as_str)
            .filter(|k| in_degree.get(k).copied() == Some(0))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node_id) = ready.pop_front() {
            order.push(node_id);
            for &next in downstream.get(node_id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(next);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let mut stuck: Vec<&str> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(k, _)| k)
                .collect();
            stuck.sort_unstable();
            return Err(CoreError::Validation(format!(
                "Workflow contains a cycle through nodes: {}",
                stuck.join(", ")
            )));
        }

        Ok(order)
    }
}
