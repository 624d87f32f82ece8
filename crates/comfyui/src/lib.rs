//! ComfyUI generation backend.
//!
//! Renders a workflow template per grid cell, queues it over the ComfyUI
//! REST API, follows its execution over WebSocket and downloads the first
//! output image.

pub mod api;
pub mod backend;
pub mod client;
pub mod messages;
pub mod processor;
pub mod workflow;

pub use backend::ComfyUIBackend;
pub use workflow::WorkflowTemplate;
