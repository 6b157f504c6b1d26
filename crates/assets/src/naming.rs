//! Collision-free file naming for a download batch.

use fmcp_api::{ImageFormat, Node};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Reuse one file for assets whose content fingerprints match.
///
/// Disabled: nodes with matching fingerprints were not reliably identical,
/// and reuse made unrelated assets overwrite each other. Fingerprints are
/// still computed and recorded so the decision stays observable.
pub const REUSE_IDENTICAL_CONTENT: bool = false;

/// What an asset is rendered as.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSpec {
    pub format: ImageFormat,
    pub scale: f64,
    /// Explicit suffix from a Figma export setting; replaces the scale marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl ExportSpec {
    pub fn new(format: ImageFormat, scale: f64) -> Self {
        Self {
            format,
            scale,
            suffix: None,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        self.suffix = (!suffix.is_empty()).then_some(suffix);
        self
    }
}

/// Hash of the visually relevant properties of a rendered node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn of(node: &Node, spec: &ExportSpec) -> Self {
        let size = node.absolute_bounding_box.map(|b| [b.width, b.height]);
        let material = json!({
            "fills": node.fills,
            "strokes": node.strokes,
            "effects": node.effects,
            "cornerRadius": node.corner_radius,
            "characters": node.characters,
            "size": size,
            "format": spec.format,
            "scale": spec.scale,
        });
        let digest = Sha256::digest(material.to_string().as_bytes());
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Assigns unique file names within one destination directory.
///
/// Scoped to a single batch; create a new allocator per batch.
#[derive(Debug, Default)]
pub struct FilenameAllocator {
    /// Lower-cased so names differing only in case collide, as they do on
    /// macOS and Windows filesystems.
    used: HashSet<String>,
    by_fingerprint: HashMap<ContentFingerprint, String>,
}

impl FilenameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that treats every entry already in `dir` as taken.
    pub fn seeded_from(dir: &Path) -> std::io::Result<Self> {
        let mut allocator = Self::new();
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    allocator.mark_used(&entry.file_name().to_string_lossy());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(allocator)
    }

    pub fn mark_used(&mut self, name: &str) {
        self.used.insert(name.to_lowercase());
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(&name.to_lowercase())
    }

    /// A file name for `node` rendered with `spec`, derived from `base`.
    pub fn unique_name(&mut self, node: &Node, base: &str, spec: &ExportSpec) -> String {
        let stem = match &spec.suffix {
            Some(suffix) => format!("{}{}", sanitize_file_stem(base), sanitize_suffix(suffix)),
            None => format!("{}-{}", sanitize_file_stem(base), scale_marker(spec.scale)),
        };
        let ext = spec.format.extension();

        let fingerprint = ContentFingerprint::of(node, spec);
        if self.is_content_reusable(node)
            && let Some(existing) = self.by_fingerprint.get(&fingerprint)
        {
            return existing.clone();
        }

        let mut name = format!("{stem}.{ext}");
        let mut counter = 2;
        while self.is_used(&name) {
            name = format!("{stem}-{counter}.{ext}");
            counter += 1;
        }
        self.mark_used(&name);
        self.by_fingerprint.entry(fingerprint).or_insert_with(|| name.clone());
        name
    }

    fn is_content_reusable(&self, _node: &Node) -> bool {
        REUSE_IDENTICAL_CONTENT
    }
}

/// Replace characters illegal on common filesystems and collapse whitespace.
pub fn sanitize_file_stem(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() || c.is_control() => '-',
            c => c,
        })
        .collect();
    let mut out = String::with_capacity(replaced.len());
    for c in replaced.chars() {
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    let out = out.trim_matches(|c| c == '-' || c == '.').to_string();
    if out.is_empty() { "asset".into() } else { out }
}

fn sanitize_suffix(suffix: &str) -> String {
    suffix
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() || c.is_control() => '-',
            c => c,
        })
        .collect()
}

/// `x1`, `x2`, `x1.5`.
pub fn scale_marker(scale: f64) -> String {
    if scale.fract() == 0.0 {
        format!("x{}", scale as u64)
    } else {
        let s = format!("{scale:.2}");
        format!("x{}", s.trim_end_matches('0').trim_end_matches('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmcp_api::Paint;

    fn node(name: &str) -> Node {
        Node {
            id: "1:1".into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn duplicate_names_get_numbered() {
        let mut alloc = FilenameAllocator::new();
        let spec = ExportSpec::new(ImageFormat::Svg, 1.0);
        let a = alloc.unique_name(&node("icon"), "icon", &spec);
        let b = alloc.unique_name(&node("icon"), "icon", &spec);
        assert_eq!(a, "icon-x1.svg");
        assert_eq!(b, "icon-x1-2.svg");
    }

    #[test]
    fn identical_content_still_gets_separate_files() {
        let mut alloc = FilenameAllocator::new();
        let spec = ExportSpec::new(ImageFormat::Png, 2.0);
        let mut n = node("star");
        n.fills.push(Paint {
            paint_type: "SOLID".into(),
            visible: true,
            ..Default::default()
        });
        let a = alloc.unique_name(&n, "star", &spec);
        let b = alloc.unique_name(&n, "star", &spec);
        assert_ne!(a, b);
        assert_eq!(
            ContentFingerprint::of(&n, &spec),
            ContentFingerprint::of(&n, &spec)
        );
    }

    #[test]
    fn many_collisions_stay_distinct_across_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ExportSpec::new(ImageFormat::Png, 1.0);

        let mut first = FilenameAllocator::seeded_from(tmp.path()).unwrap();
        let names: Vec<String> = (0..5)
            .map(|_| first.unique_name(&node("Logo"), "Logo", &spec))
            .collect();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), 5);
        for name in &names {
            std::fs::write(tmp.path().join(name), "x").unwrap();
        }

        let mut second = FilenameAllocator::seeded_from(tmp.path()).unwrap();
        let more: Vec<String> = (0..5)
            .map(|_| second.unique_name(&node("Logo"), "Logo", &spec))
            .collect();
        let all: HashSet<_> = names.iter().chain(more.iter()).collect();
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn seeding_is_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("ICON-x1.svg"), "x").unwrap();
        let mut alloc = FilenameAllocator::seeded_from(tmp.path()).unwrap();
        let name = alloc.unique_name(&node("icon"), "icon", &ExportSpec::new(ImageFormat::Svg, 1.0));
        assert_eq!(name, "icon-x1-2.svg");
    }

    #[test]
    fn missing_directory_seeds_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = FilenameAllocator::seeded_from(&tmp.path().join("nope")).unwrap();
        assert!(!alloc.is_used("anything.png"));
    }

    #[test]
    fn export_suffix_replaces_scale_marker() {
        let mut alloc = FilenameAllocator::new();
        let spec = ExportSpec::new(ImageFormat::Png, 2.0).with_suffix("@2x");
        assert_eq!(alloc.unique_name(&node("Hero"), "Hero", &spec), "Hero@2x.png");
        let plain = ExportSpec::new(ImageFormat::Png, 2.0).with_suffix("");
        assert_eq!(alloc.unique_name(&node("Hero"), "Hero", &plain), "Hero-x2.png");
    }

    #[test]
    fn sanitizes_illegal_characters() {
        assert_eq!(sanitize_file_stem("Icons / Arrow: Left?"), "Icons-Arrow-Left");
        assert_eq!(sanitize_file_stem("a  b\tc"), "a-b-c");
        assert_eq!(sanitize_file_stem("<>|"), "asset");
        assert_eq!(sanitize_file_stem("../secret"), "secret");
    }

    #[test]
    fn scale_markers() {
        assert_eq!(scale_marker(1.0), "x1");
        assert_eq!(scale_marker(2.0), "x2");
        assert_eq!(scale_marker(1.5), "x1.5");
        assert_eq!(scale_marker(0.25), "x0.25");
    }
}
