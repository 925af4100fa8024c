//! Domain types for the virtual staging pipeline.
//!
//! Everything in this crate is pure or touches the filesystem read-only:
//! the typed ComfyUI workflow graph, task-category tuning, resolution
//! math, artifact naming, and advisory image probing.

pub mod error;
pub mod image_probe;
pub mod naming;
pub mod scaling;
pub mod task;
pub mod workflow;
