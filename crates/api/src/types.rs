//! Typed subset of the Figma REST API responses.
//!
//! Only the fields this server reads are modelled; everything else in the
//! payload is ignored during deserialization.

use crate::error::FigmaError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A node of the Figma document tree.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default)]
    pub export_settings: Vec<ExportSetting>,
    #[serde(default)]
    pub absolute_bounding_box: Option<Rect>,
    #[serde(default)]
    pub fills: Vec<Paint>,
    #[serde(default)]
    pub strokes: Vec<Paint>,
    #[serde(default)]
    pub effects: Vec<serde_json::Value>,
    #[serde(default)]
    pub corner_radius: Option<f64>,
    #[serde(default)]
    pub characters: Option<String>,
    #[serde(default)]
    pub opacity: Option<f64>,
    #[serde(default)]
    pub layout_mode: Option<String>,
    #[serde(default)]
    pub item_spacing: Option<f64>,
    #[serde(default)]
    pub padding_left: Option<f64>,
    #[serde(default)]
    pub padding_right: Option<f64>,
    #[serde(default)]
    pub padding_top: Option<f64>,
    #[serde(default)]
    pub padding_bottom: Option<f64>,
}

fn visible_by_default() -> bool {
    true
}

/// Absolute bounding box in canvas coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// RGBA color with channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    #[serde(default = "opaque")]
    pub a: f64,
}

fn opaque() -> f64 {
    1.0
}

/// A fill or stroke paint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paint {
    #[serde(rename = "type", default)]
    pub paint_type: String,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
    #[serde(default)]
    pub opacity: Option<f64>,
    #[serde(default)]
    pub color: Option<Color>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// Export annotation attached to a node in the Figma file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExportSetting {
    #[serde(default)]
    pub suffix: String,
    pub format: String,
    #[serde(default)]
    pub constraint: Constraint,
}

/// Size constraint of an export setting.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Constraint {
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    pub value: f64,
}

impl Default for Constraint {
    fn default() -> Self {
        Self {
            kind: ConstraintKind::Scale,
            value: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConstraintKind {
    Scale,
    Width,
    Height,
}

/// Image formats the images endpoint can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpg,
    Svg,
    Pdf,
}

impl ImageFormat {
    /// Parse a format name case-insensitively; `jpeg` is accepted for `jpg`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpg),
            "svg" => Some(Self::Svg),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Query-string value, which is also the file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Svg => "svg",
            Self::Pdf => "pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of `GET /v1/files/:key`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub document: Node,
}

/// Response of `GET /v1/files/:key/nodes`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodesResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub nodes: HashMap<String, Option<NodeEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub document: Node,
}

impl NodesResponse {
    /// Drop ids Figma answered with `null` for.
    pub fn into_documents(self) -> HashMap<String, Node> {
        self.nodes
            .into_iter()
            .filter_map(|(id, entry)| entry.map(|e| (id, e.document)))
            .collect()
    }
}

/// Response of `GET /v1/images/:key`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImagesResponse {
    #[serde(default)]
    pub err: Option<String>,
    #[serde(default)]
    pub images: HashMap<String, Option<String>>,
}

/// Check a file key as it appears in `figma.com/file/<key>/...` URLs.
pub fn validate_file_key(key: &str) -> Result<&str, FigmaError> {
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(FigmaError::InvalidFileKey(key.to_string()));
    }
    Ok(key)
}

/// Normalize a node id copied from a Figma URL (`12-34`) to API form (`12:34`).
pub fn normalize_node_id(id: &str) -> String {
    let id = id.trim();
    if id.contains(':') {
        id.to_string()
    } else {
        id.replacen('-', ":", 1)
    }
}
