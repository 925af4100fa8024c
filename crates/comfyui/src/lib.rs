//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper used to queue workflows, inspect
//! execution history, and cancel jobs, plus a typed model of the
//! `/history` response.

pub mod api;
pub mod history;
