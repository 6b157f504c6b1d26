//! Figma REST API client.
//!
//! Provides an async [`Client`] over the Figma v1 REST API with a bounded
//! response cache, exponential backoff retry and a limit on in-flight
//! requests, plus typed models and a simplifier that turns raw documents
//! into a compact tree.

pub mod cache;
pub mod client;
pub mod error;
pub mod simplify;
pub mod types;

pub use client::{Client, ClientConfig, DEFAULT_BASE_URL};
pub use error::FigmaError;
pub use types::{
    Constraint, ConstraintKind, ExportSetting, ImageFormat, Node, Paint, Rect, normalize_node_id,
    validate_file_key,
};
