//! Schema documents.
//!
//! The XML schema is read into a plain element tree before any component is
//! constructed. Text content and comments are ignored; only element tags,
//! attributes (in document order) and child elements matter.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{Error, Result};

/// One element of a schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNode {
    /// Element tag, selecting the component variant.
    pub tag: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order.
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    /// Creates an element with no attributes or children.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Returns the value of attribute `name`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Sets attribute `name`, replacing an existing value.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    /// The `name` attribute, if present.
    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }

    /// Parses a schema document from XML text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<SchemaNode> = Vec::new();
        let mut root = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                Error::schema(format!("malformed XML at byte {}: {e}", reader.buffer_position()))
            })?;
            match event {
                Event::Start(start) => stack.push(element(&start)?),
                Event::Empty(start) => {
                    let node = element(&start)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| Error::schema("unexpected closing tag"))?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(Error::schema(format!("element <{}> is not closed", open.tag)));
        }
        root.ok_or_else(|| Error::schema("document has no root element"))
    }

    /// Reads and parses a schema file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, "reading", e))?;
        Self::parse(&text)
    }

    /// Finds the direct child named `name`.
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        self.children.iter().find(|c| c.name().unwrap_or(&c.tag) == name)
    }
}

fn element(start: &BytesStart<'_>) -> Result<SchemaNode> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut node = SchemaNode::new(tag);
    for attr in start.attributes() {
        let attr = attr
            .map_err(|e| Error::schema(format!("bad attribute on <{}>: {e}", node.tag)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::schema(format!("bad value for '{key}' on <{}>: {e}", node.tag)))?
            .into_owned();
        if node.attr(&key).is_some() {
            return Err(Error::schema(format!("duplicate attribute '{key}' on <{}>", node.tag)));
        }
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(stack: &mut [SchemaNode], root: &mut Option<SchemaNode>, node: SchemaNode) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(Error::schema("document has more than one root element")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements() {
        let doc = SchemaNode::parse(
            r#"<binary name="img" size="0x100">
                 <!-- settings first -->
                 <settings><number name="v" size="1" value="3"/></settings>
                 <layout><bytes name="pad" value="00 11"/></layout>
               </binary>"#,
        )
        .unwrap();
        assert_eq!(doc.tag, "binary");
        assert_eq!(doc.attr("size"), Some("0x100"));
        assert_eq!(doc.children.len(), 2);
        let settings = doc.child("settings").unwrap();
        assert_eq!(settings.children[0].attr("value"), Some("3"));
        assert_eq!(doc.child("layout").unwrap().children[0].name(), Some("pad"));
    }

    #[test]
    fn unescapes_attribute_values() {
        let doc = SchemaNode::parse(r#"<number name="n" size="1" enabled="a &lt; b"/>"#).unwrap();
        assert_eq!(doc.attr("enabled"), Some("a < b"));
    }

    #[test]
    fn rejects_broken_documents() {
        assert!(SchemaNode::parse("<a><b></a>").is_err());
        assert!(SchemaNode::parse("<a/><b/>").is_err());
        assert!(SchemaNode::parse("").is_err());
        assert!(SchemaNode::parse(r#"<a x="1" x="2"/>"#).is_err());
    }
}
