//! Virtual staging pipeline.
//!
//! [`template::GraphTemplate`] turns the static workflow template plus a
//! request into a concrete graph. [`orchestrator::Orchestrator`] drives one
//! request end to end against a ComfyUI instance: stage the input, submit,
//! poll, retrieve the artifact and clean up.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod retrieve;
pub mod sidecar;
pub mod staging;
pub mod template;
pub mod wait;
