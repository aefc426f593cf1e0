//! Binary generator: schema in, image out.

use std::path::Path;

use serde::Serialize;
use serde_json::json;

use crate::component::{Component, Kind, NodeId, Tree};
use crate::dependency::{self, Trigger};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::options::{BuildOptions, parse_override};
use crate::schema::SchemaNode;

/// Where one component landed in the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    /// Absolute component path.
    pub path: String,
    /// Schema tag.
    pub tag: String,
    /// Byte offset in the image.
    pub offset: usize,
    /// Reserved size in bytes.
    pub size: usize,
}

/// Builds one image from a schema.
///
/// ```no_run
/// use fwgen_core::{BuildOptions, Generator};
///
/// let mut generator = Generator::from_file("image.xml".as_ref(), BuildOptions::default())?;
/// generator.set_value("/settings/version", "3")?;
/// let image = generator.build()?;
/// # Ok::<(), fwgen_core::Error>(())
/// ```
#[derive(Debug)]
pub struct Generator {
    engine: Engine,
    laid_out: bool,
    built: bool,
}

impl Generator {
    /// Parses a schema document held in memory.
    pub fn from_str(schema: &str, options: BuildOptions) -> Result<Self> {
        Self::from_schema(&SchemaNode::parse(schema)?, options)
    }

    /// Reads and parses a schema file.
    pub fn from_file(path: &Path, options: BuildOptions) -> Result<Self> {
        Self::from_schema(&SchemaNode::load(path)?, options)
    }

    /// Constructs the component tree, derives rule defaults, pushes schema
    /// literals through `set` rules and applies the overrides in `options`.
    pub fn from_schema(doc: &SchemaNode, options: BuildOptions) -> Result<Self> {
        let tree = Tree::from_schema(doc)?;
        let overrides = options.overrides.clone();
        let mut generator = Self {
            engine: Engine::new(tree, options)?,
            laid_out: false,
            built: false,
        };

        for id in generator.rule_owners() {
            dependency::apply_lenient(&mut generator.engine, id, Trigger::Pass)?;
        }
        for id in generator.literal_sources() {
            dependency::apply_lenient(&mut generator.engine, id, Trigger::Value)?;
        }
        for text in &overrides {
            let (path, value) = parse_override(text)?;
            generator.set_value(&path, &value)?;
        }
        Ok(generator)
    }

    /// The component tree.
    pub fn tree(&self) -> &Tree {
        &self.engine.tree
    }

    /// Finds a component by absolute path (`/layout/header/crc`).
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let tree = &self.engine.tree;
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(tree.root(), |id, name| tree.child(id, name))
    }

    /// The component at an absolute path.
    pub fn component(&self, path: &str) -> Option<&Component> {
        self.find(path).map(|id| self.engine.tree.get(id))
    }

    /// Sets a component's literal value and propagates it through the
    /// dependency rules.
    ///
    /// Returns the paths of every component that changed, starting with
    /// `path` itself. Only allowed before layout.
    pub fn set_value(&mut self, path: &str, text: &str) -> Result<Vec<String>> {
        if self.laid_out {
            return Err(Error::layout(format!("cannot set {path} after layout")));
        }
        let root = self.engine.tree.root();
        let id = self.engine.lookup(root, path)?;
        self.engine
            .assign_literal(id, text)
            .map_err(|e| self.engine.locate(id, e))?;

        let mut changed = vec![self.engine.tree.path_of(id)];
        for other in dependency::apply(&mut self.engine, id, Trigger::Value)? {
            if other != id {
                changed.push(self.engine.tree.path_of(other));
            }
        }
        log::debug!("{path} = {text} ({} changed)", changed.len());
        Ok(changed)
    }

    /// Runs the layout pass, then the dependency pass.
    pub fn layout(&mut self) -> Result<()> {
        if self.laid_out {
            return Ok(());
        }
        self.engine.layout()?;
        self.laid_out = true;
        let mut changed = 0;
        for id in self.rule_owners() {
            changed += dependency::apply(&mut self.engine, id, Trigger::Pass)?.len();
        }
        log::debug!("dependency pass changed {changed} components");
        Ok(())
    }

    /// Lays out and builds the image, returning its bytes.
    pub fn build(&mut self) -> Result<Vec<u8>> {
        if self.built {
            return Err(Error::layout("the image has already been built"));
        }
        self.layout()?;
        self.engine.build()?;
        self.engine.buffer.shrink();
        self.built = true;
        let image = self.engine.buffer.as_bytes().to_vec();
        log::info!("built {} bytes", image.len());
        Ok(image)
    }

    /// Enabled components with a place in the image, in tree order.
    pub fn placements(&self) -> Vec<Placement> {
        let tree = &self.engine.tree;
        tree.subtree(tree.root())
            .into_iter()
            .filter_map(|id| {
                let node = tree.get(id);
                let offset = node.offset()?;
                (node.is_placed() && node.enabled() && id != tree.root()).then(|| Placement {
                    path: tree.path_of(id),
                    tag: node.tag().to_string(),
                    offset,
                    size: node.size(),
                })
            })
            .collect()
    }

    /// JSON tree of the layout: name, path, offset and size per component,
    /// plus the built value in hex when `with_values` is set.
    pub fn map(&self, with_values: bool) -> serde_json::Value {
        map_node(&self.engine.tree, self.engine.tree.root(), with_values)
    }

    /// Components with `set` rules whose schema gives them a value.
    fn literal_sources(&self) -> Vec<NodeId> {
        let tree = &self.engine.tree;
        tree.ids()
            .filter(|id| {
                let node = tree.get(*id);
                let has_literal = if node.kind().is_bit_container() {
                    node.children().iter().any(|c| !tree.get(*c).value().is_none())
                } else {
                    !node.value().is_none()
                };
                has_literal && node.rules.iter().any(dependency::Rule::is_push)
            })
            .collect()
    }

    /// Components with pull rules that were not set explicitly.
    fn rule_owners(&self) -> Vec<NodeId> {
        let tree = &self.engine.tree;
        tree.ids()
            .filter(|id| tree.get(*id).pulls())
            .collect()
    }
}

fn map_node(tree: &Tree, id: NodeId, with_values: bool) -> serde_json::Value {
    let node = tree.get(id);
    let mut entry = json!({
        "name": node.name(),
        "tag": node.tag(),
        "path": tree.path_of(id),
        "offset": node.offset().map_or_else(|| json!(-1), |o| json!(o)),
        "size": node.size(),
    });
    if let Kind::Bit(range) = node.kind() {
        entry["bits"] = json!(format!("{}:{}", range.lo, range.hi));
    }
    if with_values {
        entry["value"] = match node.kind() {
            Kind::Bit(_) | Kind::BitField { .. } | Kind::Register { .. } => {
                json!(node.value().to_string())
            }
            _ if !node.image().is_empty() => json!(hex::encode(node.image())),
            _ => json!(node.value().to_string()),
        };
    }
    let children: Vec<serde_json::Value> = node
        .children()
        .iter()
        .filter(|c| tree.get(**c).is_placed())
        .map(|c| map_node(tree, *c, with_values))
        .collect();
    if !children.is_empty() {
        entry["children"] = json!(children);
    }
    entry
}
