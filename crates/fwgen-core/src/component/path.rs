//! Path references: `[/]segment(/segment)*[.property]`.

/// Properties a path may end with.
pub const PROPERTIES: &[&str] = &[
    "value",
    "size",
    "length",
    "offset",
    "end",
    "enabled",
    "index",
    "parent_index",
    "child_count",
    "name",
    "bytes",
    "iv",
    "count",
    "modulus",
    "exponent",
    "key_size",
    "x",
    "y",
    "hash",
];

/// A parsed path reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRef {
    /// Starts at the root rather than the referring component.
    pub absolute: bool,
    /// `parent`, `this` or child names.
    pub segments: Vec<String>,
    /// Trailing `.property`, if any.
    pub property: Option<String>,
}

impl PathRef {
    /// Parses a path reference.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty path".to_string());
        }
        let absolute = text.starts_with('/');
        let body = text.trim_start_matches('/');

        let (body, property) = match body.rsplit_once('/') {
            Some((head, last)) => match last.split_once('.') {
                Some((name, prop)) => (format!("{head}/{name}"), Some(prop)),
                None => (body.to_string(), None),
            },
            None => match body.split_once('.') {
                Some((name, prop)) => (name.to_string(), Some(prop)),
                None => (body.to_string(), None),
            },
        };

        if let Some(prop) = property {
            if !PROPERTIES.contains(&prop) {
                return Err(format!("unknown property '{prop}' in '{text}'"));
            }
        }

        let mut segments = Vec::new();
        if !body.is_empty() {
            for segment in body.split('/') {
                if segment.is_empty() {
                    return Err(format!("empty segment in '{text}'"));
                }
                segments.push(segment.to_string());
            }
        }

        Ok(Self {
            absolute,
            segments,
            property: property.map(str::to_string),
        })
    }
}
