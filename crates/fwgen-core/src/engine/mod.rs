//! Layout and build passes over the component tree.
//!
//! The engine owns the tree and the output buffer for one build. Formulas
//! are evaluated through [`NodeScope`], which resolves path references
//! relative to the component that owns the formula and builds referenced
//! components on demand, so a header may use the digest of a hash placed
//! after it.

mod build;
mod derive;
mod encrypt;
mod inputs;
mod layout;

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::component::{Kind, NodeId, PathRef, State, Tree, check_literal_fits, parse_literal};
use crate::crypto::{AesKeySize, KeyMaterial};
use crate::dependency;
use crate::error::{Error, Result};
use crate::expr::{self, Scope};
use crate::options::BuildOptions;
use crate::value::{Value, parse_int_literal};

/// Component tree, output buffer and options of one build.
#[derive(Debug)]
pub(crate) struct Engine {
    pub(crate) tree: Tree,
    pub(crate) buffer: Buffer,
    pub(crate) options: BuildOptions,
    /// Components whose layout is in progress.
    laying_out: HashSet<NodeId>,
    /// Components being built whose value is already final.
    valued: HashSet<NodeId>,
    /// The build pass has started; rule values are re-pulled from then on.
    building: bool,
}

/// Evaluation context: formulas resolve paths relative to `node`.
struct NodeScope<'a> {
    engine: &'a mut Engine,
    node: NodeId,
}

impl Scope for NodeScope<'_> {
    fn resolve(&mut self, text: &str) -> Result<Value> {
        let path = PathRef::parse(text).map_err(|e| Error::formula(text, e))?;
        let target = self.engine.walk(self.node, &path, text)?;
        self.engine
            .property(target, path.property.as_deref().unwrap_or("value"))
    }

    fn row_index(&self, depth: usize) -> Option<usize> {
        self.engine.tree.row_index(self.node, depth)
    }
}

impl Engine {
    pub(crate) fn new(tree: Tree, options: BuildOptions) -> Result<Self> {
        let capacity = options
            .capacity
            .or(tree.capacity)
            .ok_or_else(|| Error::schema("the root element needs a 'size' (buffer capacity)"))?;
        Ok(Self {
            tree,
            buffer: Buffer::new(capacity),
            options,
            laying_out: HashSet::new(),
            valued: HashSet::new(),
            building: false,
        })
    }

    /// Records `id` and its ancestors on an error that has no trace yet.
    pub(crate) fn locate(&self, id: NodeId, err: Error) -> Error {
        if err.has_trace() {
            return err;
        }
        let mut err = err;
        let mut cur = id;
        while let Some(parent) = self.tree.get(cur).parent {
            err = err.in_component(&self.tree.get(cur).name);
            cur = parent;
        }
        err
    }

    pub(crate) fn eval(&mut self, id: NodeId, formula: &str) -> Result<Value> {
        expr::evaluate(formula, &mut NodeScope { engine: self, node: id })
    }

    pub(crate) fn eval_usize(&mut self, id: NodeId, formula: &str, what: &str) -> Result<usize> {
        let v = expr::evaluate_int(formula, &mut NodeScope { engine: self, node: id })?;
        usize::try_from(v).map_err(|_| Error::value(format!("{what} {v} is negative")))
    }

    /// Resolves a component path (no property) relative to `from`.
    pub(crate) fn lookup(&mut self, from: NodeId, text: &str) -> Result<NodeId> {
        let path = PathRef::parse(text).map_err(|e| Error::formula(text, e))?;
        if let Some(property) = &path.property {
            return Err(Error::formula(
                text,
                format!("expected a component, found property '.{property}'"),
            ));
        }
        self.walk(from, &path, text)
    }

    /// Follows `path` from `from`. Table entries are replaced by their
    /// selected row and tables get their rows on first use.
    fn walk(&mut self, from: NodeId, path: &PathRef, text: &str) -> Result<NodeId> {
        let mut cur = if path.absolute { self.tree.root() } else { from };
        for segment in &path.segments {
            cur = match segment.as_str() {
                "this" => cur,
                "parent" => self
                    .tree
                    .get(cur)
                    .parent
                    .ok_or_else(|| Error::formula(text, "the root has no parent"))?,
                name => {
                    if self.tree.child(cur, name).is_none()
                        && matches!(self.tree.get(cur).kind, Kind::Table(_))
                    {
                        self.ensure_rows(cur)?;
                    }
                    self.tree.child(cur, name).ok_or_else(|| {
                        Error::formula(
                            text,
                            format!("no component '{name}' under {}", self.tree.path_of(cur)),
                        )
                    })?
                }
            };
            if matches!(self.tree.get(cur).kind, Kind::TableEntry(_)) {
                cur = self.selected_row(cur)?.ok_or_else(|| {
                    Error::value(format!("{} matches no table row", self.tree.path_of(cur)))
                })?;
            }
        }
        Ok(cur)
    }

    /// Instantiates the rows of a table whose count is a formula.
    pub(crate) fn ensure_rows(&mut self, table: NodeId) -> Result<()> {
        let count = match &self.tree.get(table).kind {
            Kind::Table(spec) if !spec.instantiated => spec.count.clone(),
            _ => return Ok(()),
        };
        let count = self.eval_usize(table, &count, "row count")?;
        self.tree.instantiate_rows(table, count)
    }

    /// The row a table entry currently aliases.
    pub(crate) fn selected_row(&mut self, entry: NodeId) -> Result<Option<NodeId>> {
        let Kind::TableEntry(spec) = self.tree.get(entry).kind.clone() else {
            return Ok(None);
        };
        let table = self.lookup(entry, &spec.table)?;
        if !matches!(self.tree.get(table).kind, Kind::Table(_)) {
            return Err(Error::schema(format!(
                "{} is not a <table>",
                self.tree.path_of(table)
            )));
        }
        self.ensure_rows(table)?;
        for row in self.tree.rows(table) {
            if self.eval(row, &spec.key)?.as_bool() {
                return Ok(Some(row));
            }
        }
        if spec.required {
            return Err(Error::value(format!(
                "no row of {} matches `{}`",
                self.tree.path_of(table),
                spec.key
            )));
        }
        Ok(None)
    }

    /// Property `name` of component `id`.
    pub(crate) fn property(&mut self, id: NodeId, name: &str) -> Result<Value> {
        match name {
            "value" => self.value_of(id),
            "bytes" => self.component_bytes(id).map(Value::Bytes),
            "name" => Ok(Value::Text(self.tree.get(id).name.clone())),
            "enabled" => self.is_enabled(id).map(Value::Bool),
            "index" | "parent_index" => {
                let depth = usize::from(name == "parent_index");
                self.tree.row_index(id, depth).map(Value::from).ok_or_else(|| {
                    Error::value(format!("{} is not inside a table row", self.tree.path_of(id)))
                })
            }
            "child_count" | "count" => {
                let is_table = matches!(self.tree.get(id).kind, Kind::Table(_));
                if name == "count" && !is_table {
                    return Err(Error::value(format!("{} is not a table", self.tree.path_of(id))));
                }
                if is_table {
                    self.ensure_rows(id)?;
                }
                Ok(Value::from(self.tree.get(id).children.len()))
            }
            "offset" => {
                let node = self.tree.get(id);
                if node.offset.is_none() && node.state == State::Parsed {
                    self.ensure_laid_out(id, name)?;
                }
                Ok(self.tree.get(id).offset.map_or(Value::Int(-1), Value::from))
            }
            "size" | "length" | "end" | "iv" => {
                self.ensure_laid_out(id, name)?;
                let node = self.tree.get(id);
                Ok(match name {
                    "size" => Value::from(node.size),
                    "length" => Value::from(node.length),
                    "end" => node.offset.map_or(Value::Int(-1), |o| Value::from(o + node.size)),
                    _ => Value::Bytes(
                        node.cipher
                            .as_ref()
                            .map(|c| c.iv.clone())
                            .ok_or_else(|| {
                                Error::value(format!("{} is not encrypted", self.tree.path_of(id)))
                            })?,
                    ),
                })
            }
            _ => self.key_property(id, name),
        }
    }

    fn key_property(&mut self, id: NodeId, name: &str) -> Result<Value> {
        let missing = |engine: &Self| {
            Error::value(format!("{} has no property '{name}'", engine.tree.path_of(id)))
        };
        match &self.tree.get(id).kind {
            Kind::Key(spec) => {
                if name == "hash" {
                    return Ok(Value::Text(spec.hash.name().to_string()));
                }
                let key = self.key_material(id)?;
                let bytes = match name {
                    "key_size" => return Ok(Value::from(key.key_bits())),
                    "modulus" => key.modulus(),
                    "exponent" => key.exponent(),
                    "x" => key.x(),
                    "y" => key.y(),
                    _ => None,
                };
                bytes.map(Value::Bytes).ok_or_else(|| missing(self))
            }
            Kind::AesKey(_) if name == "key_size" => {
                let len = self.value_of(id)?.as_bytes().len();
                let size = AesKeySize::from_len(len).ok_or_else(|| {
                    Error::crypto(format!("AES key of {len} bytes; expected 16, 24 or 32"))
                })?;
                Ok(Value::from(size.bits()))
            }
            _ => Err(missing(self)),
        }
    }

    fn ensure_laid_out(&mut self, id: NodeId, property: &str) -> Result<()> {
        let node = self.tree.get(id);
        if node.state != State::Parsed {
            return Ok(());
        }
        if node.placed {
            return Err(Error::layout(format!(
                "{}.{property} is needed before it is laid out",
                self.tree.path_of(id)
            )));
        }
        self.layout_node(id)
    }

    /// Whether `id` is enabled, evaluating its `enabled` formula when the
    /// layout pass has not decided yet.
    pub(crate) fn is_enabled(&mut self, id: NodeId) -> Result<bool> {
        let node = self.tree.get(id);
        if node.state != State::Parsed {
            return Ok(node.enabled);
        }
        if !node.placed {
            self.layout_node(id)?;
            return Ok(self.tree.get(id).enabled);
        }
        match node.formulas.enabled.clone() {
            Some(formula) => Ok(self.eval(id, &formula)?.as_bool()),
            None => Ok(true),
        }
    }

    /// Final value of `id`, building it first when it is computed.
    pub(crate) fn value_of(&mut self, id: NodeId) -> Result<Value> {
        let node = self.tree.get(id);
        if node.kind.is_bit_container() {
            if self.building && node.pulls() && !self.valued.contains(&id) {
                self.ensure_built(id)?;
            }
            return self.compose_bits(id, true).map(Value::Int);
        }
        if !node.enabled || self.valued.contains(&id) || self.is_settled(id) {
            return Ok(node.value.clone());
        }
        self.ensure_built(id)?;
        Ok(self.tree.get(id).value.clone())
    }

    /// Whether the stored value of `id` is already final.
    fn is_settled(&self, id: NodeId) -> bool {
        let node = self.tree.get(id);
        node.is_plain_literal() && !(self.building && node.pulls())
    }

    /// Value of `id` as it stands, without building anything.
    pub(crate) fn current_value(&mut self, id: NodeId) -> Result<Value> {
        if self.tree.get(id).kind.is_bit_container() {
            return self.compose_bits(id, false).map(Value::Int);
        }
        Ok(self.tree.get(id).value.clone())
    }

    /// Integer of a bit field or register, composed from its bits.
    pub(crate) fn compose_bits(&mut self, id: NodeId, build: bool) -> Result<i128> {
        let mut composed = 0i128;
        for (bit, range) in self.tree.bit_children(id) {
            if build && !self.is_settled(bit) {
                self.ensure_built(bit)?;
            }
            let v = self.tree.get(bit).bit_value(range)?;
            composed = range.insert(composed, v);
        }
        Ok(composed)
    }

    /// Stores `value` on `id`; returns `false` when it was already there.
    pub(crate) fn store_value(&mut self, id: NodeId, value: Value) -> Result<bool> {
        if !dependency::accepts_values(&self.tree.get(id).kind) {
            return Err(Error::dependency(format!(
                "{} cannot hold a value",
                self.tree.path_of(id)
            )));
        }
        if self.tree.get(id).kind.is_bit_container() {
            let v = value.as_int().map_err(Error::dependency)?;
            if self.compose_bits(id, false)? == v {
                return Ok(false);
            }
            self.tree.distribute_bits(id, v)?;
            return Ok(true);
        }
        let node = self.tree.get_mut(id);
        if node.value == value {
            return Ok(false);
        }
        node.value = value;
        Ok(true)
    }

    /// Converts a computed value to the representation `id` holds.
    pub(crate) fn coerce(&self, id: NodeId, value: Value) -> Result<Value> {
        if value.is_none() {
            return Ok(value);
        }
        let kind = &self.tree.get(id).kind;
        if kind.is_integer() || matches!(kind, Kind::Crc(_) | Kind::Checksum(_)) {
            return value.as_int().map(Value::Int).map_err(Error::value);
        }
        Ok(match (kind, value) {
            (Kind::Text { .. }, Value::Text(s)) => Value::Text(s),
            (Kind::Text { .. }, Value::Bytes(bytes)) => {
                let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
                let text = &bytes[..end];
                if !text.is_ascii() {
                    return Err(Error::value(format!(
                        "bytes {} are not ASCII text",
                        hex::encode(text)
                    )));
                }
                Value::Text(String::from_utf8_lossy(text).into_owned())
            }
            (Kind::Text { .. }, other) => Value::Text(other.to_string()),
            (_, other) => other,
        })
    }

    /// Stores a literal given as text, as an override.
    pub(crate) fn assign_literal(&mut self, id: NodeId, text: &str) -> Result<()> {
        let node = self.tree.get(id);
        match &node.kind {
            Kind::File(_) | Kind::Key(_) => {
                match &mut self.tree.get_mut(id).kind {
                    Kind::File(spec) => {
                        spec.path = text.to_string();
                        spec.cache = None;
                    }
                    Kind::Key(spec) => {
                        spec.path = text.to_string();
                        spec.cache = None;
                    }
                    _ => {}
                }
            }
            kind => {
                let value = parse_literal(kind, &node.tag, text)?;
                let size = node
                    .formulas
                    .size
                    .as_deref()
                    .and_then(parse_int_literal)
                    .and_then(|s| usize::try_from(s).ok());
                check_literal_fits(node, &value, size)?;
                match value {
                    Value::Int(v) if node.kind.is_bit_container() => {
                        self.tree.distribute_bits(id, v)?;
                    }
                    value => self.tree.get_mut(id).value = value,
                }
            }
        }
        let node = self.tree.get_mut(id);
        node.overridden = true;
        node.formulas.value = None;
        Ok(())
    }

    /// Final bytes of `id`; empty when disabled.
    pub(crate) fn component_bytes(&mut self, id: NodeId) -> Result<Vec<u8>> {
        self.ensure_built(id)?;
        Ok(self.tree.get(id).image.clone())
    }

    /// Loads (once) the key material of a `<key>` component.
    pub(crate) fn key_material(&mut self, id: NodeId) -> Result<Arc<KeyMaterial>> {
        let Kind::Key(spec) = &self.tree.get(id).kind else {
            return Err(Error::schema(format!(
                "{} is not a <key>",
                self.tree.path_of(id)
            )));
        };
        if let Some(key) = &spec.cache {
            return Ok(Arc::clone(key));
        }
        let path = self.options.resolve(&spec.path);
        let bytes = fs::read(&path).map_err(|e| Error::io(&path, "reading", e))?;
        let key = Arc::new(
            KeyMaterial::parse(&bytes)
                .map_err(|e| Error::crypto(format!("{}: {e}", path.display())))?,
        );
        log::debug!(
            "{}: loaded {}-bit key from {}",
            self.tree.path_of(id),
            key.key_bits(),
            path.display()
        );
        if let Kind::Key(spec) = &mut self.tree.get_mut(id).kind {
            spec.cache = Some(Arc::clone(&key));
        }
        Ok(key)
    }
}
