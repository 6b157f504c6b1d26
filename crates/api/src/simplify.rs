//! Reshape raw Figma documents into a compact tree for model consumption.

use crate::types::{Color, FileResponse, Node, NodesResponse, Paint, Rect};
use serde::Serialize;

/// Compact view of a file or a node selection.
#[derive(Debug, Serialize)]
pub struct SimplifiedDesign {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub nodes: Vec<SimplifiedNode>,
}

#[derive(Debug, Serialize)]
pub struct SimplifiedNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Rect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fills: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub strokes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corner_radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub exportable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SimplifiedNode>,
}

/// Auto-layout summary.
#[derive(Debug, Serialize)]
pub struct Layout {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<f64>,
    /// Top, right, bottom, left.
    pub padding: [f64; 4],
}

pub fn simplify_file(file: FileResponse) -> SimplifiedDesign {
    SimplifiedDesign {
        name: file.name,
        last_modified: file.last_modified,
        nodes: simplify_node(&file.document).into_iter().collect(),
    }
}

/// Simplify a nodes response, keeping the order of `requested` ids.
pub fn simplify_nodes(resp: NodesResponse, requested: &[String]) -> SimplifiedDesign {
    let name = resp.name.clone();
    let last_modified = resp.last_modified.clone();
    let documents = resp.into_documents();
    let nodes = requested
        .iter()
        .filter_map(|id| documents.get(id))
        .filter_map(simplify_node)
        .collect();
    SimplifiedDesign {
        name,
        last_modified,
        nodes,
    }
}

/// Returns `None` for hidden nodes.
pub fn simplify_node(node: &Node) -> Option<SimplifiedNode> {
    if !node.visible {
        return None;
    }
    let layout = node
        .layout_mode
        .as_deref()
        .filter(|mode| *mode != "NONE")
        .map(|mode| Layout {
            mode: mode.to_ascii_lowercase(),
            gap: node.item_spacing,
            padding: [
                node.padding_top.unwrap_or(0.0),
                node.padding_right.unwrap_or(0.0),
                node.padding_bottom.unwrap_or(0.0),
                node.padding_left.unwrap_or(0.0),
            ],
        });
    Some(SimplifiedNode {
        id: node.id.clone(),
        name: node.name.clone(),
        node_type: node.node_type.clone(),
        bounds: node.absolute_bounding_box,
        text: node.characters.clone(),
        fills: paints(&node.fills),
        strokes: paints(&node.strokes),
        corner_radius: node.corner_radius.filter(|r| *r > 0.0),
        opacity: node.opacity.filter(|o| *o < 1.0),
        layout,
        exportable: !node.export_settings.is_empty(),
        children: node.children.iter().filter_map(simplify_node).collect(),
    })
}

fn paints(paints: &[Paint]) -> Vec<String> {
    paints
        .iter()
        .filter(|p| p.visible)
        .map(|p| match (p.paint_type.as_str(), p.color) {
            ("SOLID", Some(color)) => css_color(color, p.opacity.unwrap_or(1.0)),
            (kind, _) => kind.to_ascii_lowercase(),
        })
        .collect()
}

fn css_color(color: Color, opacity: f64) -> String {
    let channel = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let alpha = (color.a * opacity).clamp(0.0, 1.0);
    let (r, g, b) = (channel(color.r), channel(color.g), channel(color.b));
    if alpha >= 1.0 {
        format!("#{r:02x}{g:02x}{b:02x}")
    } else {
        format!("rgba({r}, {g}, {b}, {:.2})", alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(json: &str) -> Node {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn drops_hidden_children() {
        let n = node(
            r#"{"id": "1:1", "name": "Frame", "type": "FRAME", "children": [
                {"id": "1:2", "name": "shown", "type": "RECTANGLE"},
                {"id": "1:3", "name": "hidden", "type": "RECTANGLE", "visible": false}
            ]}"#,
        );
        let s = simplify_node(&n).unwrap();
        assert_eq!(s.children.len(), 1);
        assert_eq!(s.children[0].name, "shown");
    }

    #[test]
    fn solid_fills_become_css_colors() {
        let n = node(
            r#"{"id": "1:1", "name": "Box", "type": "RECTANGLE", "fills": [
                {"type": "SOLID", "color": {"r": 1, "g": 0, "b": 0, "a": 1}},
                {"type": "SOLID", "opacity": 0.5, "color": {"r": 0, "g": 0, "b": 1, "a": 1}},
                {"type": "IMAGE", "imageRef": "abc"},
                {"type": "SOLID", "visible": false, "color": {"r": 0, "g": 1, "b": 0, "a": 1}}
            ]}"#,
        );
        let s = simplify_node(&n).unwrap();
        assert_eq!(s.fills, vec!["#ff0000", "rgba(0, 0, 255, 0.50)", "image"]);
    }

    #[test]
    fn auto_layout_is_summarized() {
        let n = node(
            r#"{"id": "1:1", "name": "Row", "type": "FRAME", "layoutMode": "HORIZONTAL",
                "itemSpacing": 8, "paddingLeft": 4, "paddingTop": 2}"#,
        );
        let layout = simplify_node(&n).unwrap().layout.unwrap();
        assert_eq!(layout.mode, "horizontal");
        assert_eq!(layout.gap, Some(8.0));
        assert_eq!(layout.padding, [2.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn nodes_keep_requested_order() {
        let resp: NodesResponse = serde_json::from_str(
            r#"{"name": "File", "nodes": {
                "1:1": {"document": {"id": "1:1", "name": "a"}},
                "2:2": {"document": {"id": "2:2", "name": "b"}}
            }}"#,
        )
        .unwrap();
        let design = simplify_nodes(resp, &["2:2".into(), "1:1".into(), "3:3".into()]);
        let names: Vec<_> = design.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }
}
