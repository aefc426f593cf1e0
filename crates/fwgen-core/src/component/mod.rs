//! Component tree.
//!
//! Components live in an arena owned by [`Tree`] and refer to each other by
//! [`NodeId`]. The parent link is a back-reference; children are owned and
//! kept in declaration order with a name index beside them. Anything that
//! points across the tree (dependency rules, table-entry aliases, key
//! references) stores a path string and is resolved at the time of use.

mod bits;
mod construct;
mod path;
mod table;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use path::{PROPERTIES, PathRef};

pub use bits::BitRange;

pub(crate) use bits::parse_bit_range;
pub(crate) use construct::{check_literal_fits, parse_literal};

use crate::crypto::{
    AesMode, ChecksumMethod, CrcAlgorithm, HashAlgorithm, KeyMaterial, RsaPadding, SignStrategy,
};
use crate::dependency::Rule;
use crate::error::{Error, Result};
use crate::schema::SchemaNode;
use crate::value::{ByteOrder, Value};

/// Index of a component in its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position in the arena; stable for the lifetime of the tree.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Lifecycle of a component within one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Constructed from the schema.
    Parsed,
    /// Offset and size fixed.
    LaidOut,
    /// Build in progress; re-entering is a dependency cycle.
    Building,
    /// Final value computed and written.
    Built,
}

/// Optional formulas of a component, evaluated lazily.
#[derive(Debug, Clone, Default)]
pub struct Formulas {
    /// `calculate`: computes the value.
    pub value: Option<String>,
    /// `enabled`: false removes the component from the image.
    pub enabled: Option<String>,
    /// `align`: rounds the offset up.
    pub align: Option<String>,
    /// `offset`: absolute placement.
    pub offset: Option<String>,
    /// `padding`: rounds the size up.
    pub padding: Option<String>,
    /// `size`: requested size in bytes.
    pub size: Option<String>,
    /// `validate`: must hold once the value is known.
    pub validate: Option<String>,
}

/// Encryption requested by a component's `encrypt` attribute.
#[derive(Debug, Clone)]
pub struct Encryption {
    /// Path to the AES key component.
    pub key: String,
    /// Cipher mode.
    pub mode: AesMode,
    /// Explicit IV: hex literal or formula.
    pub iv: Option<String>,
}

/// Encryption state fixed during layout.
#[derive(Debug, Clone)]
pub struct Cipher {
    /// The resolved key component.
    pub key: NodeId,
    /// Cipher mode.
    pub mode: AesMode,
    /// Initialization vector; all zero when the key is disabled.
    pub iv: Vec<u8>,
    /// False when the key is disabled and the payload stays plain.
    pub active: bool,
    /// Size of the plaintext before encryption overhead.
    pub plain_size: usize,
}

/// `<file>` data source.
#[derive(Debug, Clone)]
pub struct FileSpec {
    /// Path, relative to the build base directory.
    pub path: String,
    /// Formula for the first byte to take.
    pub file_offset: Option<String>,
    /// Formula for the number of bytes to take.
    pub length: Option<String>,
    /// Loaded bytes; dropped when `path` changes.
    pub cache: Option<Vec<u8>>,
}

/// `<table>` parameters.
#[derive(Debug, Clone)]
pub struct TableSpec {
    /// Row count formula.
    pub count: String,
    /// Per-row sort key formula.
    pub sort: Option<String>,
    /// Elements instantiated once per row.
    pub template: Vec<SchemaNode>,
    /// Rows have been created.
    pub instantiated: bool,
}

/// `<table_entry>` parameters.
#[derive(Debug, Clone)]
pub struct EntrySpec {
    /// Path to the table.
    pub table: String,
    /// Boolean formula evaluated with `this` bound to each row.
    pub key: String,
    /// A missing match is an error.
    pub required: bool,
}

/// `<hash>` parameters.
#[derive(Debug, Clone)]
pub struct HashSpec {
    /// Digest algorithm.
    pub algorithm: HashAlgorithm,
    /// `;`-separated input items.
    pub input: String,
    /// Store the digest byte-reversed.
    pub reverse: bool,
}

/// `<sign>` parameters.
#[derive(Debug, Clone)]
pub struct SignSpec {
    /// Path to the asymmetric key component.
    pub key: String,
    /// Digest algorithm; the key's `hash` when absent.
    pub algorithm: Option<HashAlgorithm>,
    /// RSA padding.
    pub padding: RsaPadding,
    /// `;`-separated input items.
    pub input: String,
    /// How the signature is obtained.
    pub strategy: SignStrategy,
    /// External tool command line.
    pub tool: Option<String>,
    /// Offline signature file.
    pub signature_path: Option<String>,
    /// External tool timeout override.
    pub timeout: Option<Duration>,
}

/// `<verify>` parameters.
#[derive(Debug, Clone)]
pub struct VerifySpec {
    /// Path to an asymmetric key component.
    pub key: Option<String>,
    /// RSA modulus formula.
    pub modulus: Option<String>,
    /// RSA exponent formula.
    pub exponent: Option<String>,
    /// RSA key size in bits.
    pub key_size: Option<String>,
    /// Signature formula.
    pub signature: String,
    /// Digest algorithm.
    pub algorithm: HashAlgorithm,
    /// `;`-separated input items.
    pub input: String,
}

/// `<crc>` parameters.
#[derive(Debug, Clone)]
pub struct CrcSpec {
    /// Registry entry.
    pub algorithm: CrcAlgorithm,
    /// `;`-separated input items.
    pub input: String,
}

/// `<checksum>` parameters.
#[derive(Debug, Clone)]
pub struct ChecksumSpec {
    /// Reduction.
    pub method: ChecksumMethod,
    /// `;`-separated input items.
    pub input: String,
}

/// `<aes_key>` source.
#[derive(Debug, Clone)]
pub struct AesKeySpec {
    /// Key file; the literal `value` is used when absent.
    pub path: Option<String>,
}

/// `<key>` source.
#[derive(Debug, Clone)]
pub struct KeySpec {
    /// PEM or DER file.
    pub path: String,
    /// Default signing hash.
    pub hash: HashAlgorithm,
    /// Loaded key material.
    pub cache: Option<Arc<KeyMaterial>>,
}

/// Component variants.
///
/// Unrecognised tags become [`Kind::Unknown`], which behaves like
/// [`Kind::Bytes`].
#[derive(Debug, Clone)]
pub enum Kind {
    /// Document root.
    Root,
    /// Container whose subtree holds values but is never placed.
    Settings,
    /// Raw bytes or a plain container.
    Bytes,
    /// Unrecognised tag.
    Unknown(String),
    /// Fixed-width integer.
    Number {
        /// Two's-complement signed.
        signed: bool,
        /// Allowed literal values; empty allows any.
        choices: Vec<i128>,
    },
    /// ASCII text.
    Text {
        /// Allowed literal values; empty allows any.
        choices: Vec<String>,
    },
    /// Integer composed of named bit ranges covering every bit.
    BitField {
        /// Bits that must be covered instead of the full width.
        used_bits: Option<Vec<u32>>,
    },
    /// Integer composed of named bit ranges; gaps become reserved bits.
    Register {
        /// Source of the reserved bits' values.
        reserved_value: i128,
    },
    /// One named bit range of a bit field or register.
    Bit(BitRange),
    /// Bytes loaded from an external file.
    File(FileSpec),
    /// Repeated template subtree.
    Table(TableSpec),
    /// Alias of one table row.
    TableEntry(EntrySpec),
    /// Digest over input data.
    Hash(HashSpec),
    /// Signature over input data.
    Sign(SignSpec),
    /// Signature check; occupies no bytes.
    Verify(VerifySpec),
    /// CRC over input data.
    Crc(CrcSpec),
    /// Sum or XOR over input data.
    Checksum(ChecksumSpec),
    /// Symmetric key holder.
    AesKey(AesKeySpec),
    /// RSA or EC key holder.
    Key(KeySpec),
}

impl Kind {
    /// Variants whose value is computed from other components at build.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Self::Hash(_)
                | Self::Sign(_)
                | Self::Verify(_)
                | Self::Crc(_)
                | Self::Checksum(_)
                | Self::File(_)
                | Self::TableEntry(_)
                | Self::BitField { .. }
                | Self::Register { .. }
        )
    }

    /// Variants that hold an integer value.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Number { .. } | Self::Bit(_) | Self::BitField { .. } | Self::Register { .. }
        )
    }

    /// Variants composed from bit children.
    pub fn is_bit_container(&self) -> bool {
        matches!(self, Self::BitField { .. } | Self::Register { .. })
    }
}

/// One node of the tree.
#[derive(Debug, Clone)]
pub struct Component {
    pub(crate) name: String,
    pub(crate) tag: String,
    pub(crate) kind: Kind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) by_name: HashMap<String, NodeId>,
    pub(crate) formulas: Formulas,
    pub(crate) value: Value,
    pub(crate) order: ByteOrder,
    /// Lies under the placed part of the tree (not under `<settings>`).
    pub(crate) placed: bool,
    pub(crate) state: State,
    pub(crate) enabled: bool,
    pub(crate) offset: Option<usize>,
    pub(crate) size: usize,
    /// Requested size before padding and encryption.
    pub(crate) length: usize,
    /// Row index when this node is a table row.
    pub(crate) row: Option<usize>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) encryption: Option<Encryption>,
    pub(crate) cipher: Option<Cipher>,
    pub(crate) save_file_path: Option<String>,
    /// Set explicitly; derived defaults no longer apply.
    pub(crate) overridden: bool,
    /// Final bytes produced at build, after padding and encryption.
    pub(crate) image: Vec<u8>,
}

impl Component {
    pub(crate) fn new(name: String, tag: String, kind: Kind, order: ByteOrder) -> Self {
        Self {
            name,
            tag,
            kind,
            parent: None,
            children: Vec::new(),
            by_name: HashMap::new(),
            formulas: Formulas::default(),
            value: Value::None,
            order,
            placed: true,
            state: State::Parsed,
            enabled: true,
            offset: None,
            size: 0,
            length: 0,
            row: None,
            rules: Vec::new(),
            encryption: None,
            cipher: None,
            save_file_path: None,
            overridden: false,
            image: Vec::new(),
        }
    }

    /// Name, unique among siblings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema tag the component was built from.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Variant.
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Parent, `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in declaration (or sort) order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Current value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Byte order.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the component takes part in the image.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Offset in the output, `None` when disabled or never placed.
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Reserved size in bytes, including padding and encryption overhead.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the component is laid out into the output buffer.
    pub fn is_placed(&self) -> bool {
        self.placed
    }

    /// Table row index, when this component is a row.
    pub fn row(&self) -> Option<usize> {
        self.row
    }

    /// Requested size before padding and encryption.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Final bytes, empty until built.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Encryption fixed during layout, if any.
    pub fn cipher(&self) -> Option<&Cipher> {
        self.cipher.as_ref()
    }

    /// Whether the value was set explicitly through an override.
    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    /// Takes its value from `get`/`switch` rules.
    pub(crate) fn pulls(&self) -> bool {
        !self.overridden && self.rules.iter().any(crate::dependency::Rule::is_pull)
    }

    /// Contributes bytes as a plain literal: no formula and nothing to derive.
    pub(crate) fn is_plain_literal(&self) -> bool {
        self.formulas.value.is_none()
            && !self.kind.is_derived()
            && self.children.is_empty()
            && !matches!(self.kind, Kind::AesKey(AesKeySpec { path: Some(_) }))
    }

    /// Contributes bytes of its own rather than through children.
    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty() || self.kind.is_bit_container()
    }
}

/// Arena of components rooted at the document element.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Component>,
    /// Buffer capacity declared on the root element.
    pub(crate) capacity: Option<usize>,
}

impl Tree {
    /// The root component.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the tree has no components.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Component `id`.
    pub fn get(&self, id: NodeId) -> &Component {
        &self.nodes[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Component {
        &mut self.nodes[id.0]
    }

    /// Every id, in creation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Direct child of `id` named `name`.
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.get(id).by_name.get(name).copied()
    }

    /// Absolute path of `id`, e.g. `/layout/header/crc`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut cur = id;
        while let Some(parent) = self.get(cur).parent {
            names.push(self.get(cur).name.as_str());
            cur = parent;
        }
        if names.is_empty() {
            return "/".to_string();
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    /// Returns `true` if `ancestor` is a strict ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = self.get(id).parent;
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.get(p).parent;
        }
        false
    }

    /// `id` and all its descendants in pre-order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            stack.extend(self.get(cur).children.iter().rev().copied());
        }
        out
    }

    /// Index of the `depth`-th table row enclosing `id` (`id` included).
    pub fn row_index(&self, id: NodeId, depth: usize) -> Option<usize> {
        let mut cur = Some(id);
        let mut remaining = depth;
        while let Some(node) = cur {
            if let Some(row) = self.get(node).row {
                if remaining == 0 {
                    return Some(row);
                }
                remaining -= 1;
            }
            cur = self.get(node).parent;
        }
        None
    }

    /// Adds `component` under `parent`, rejecting duplicate sibling names.
    pub(crate) fn push(&mut self, mut component: Component, parent: Option<NodeId>) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        if let Some(p) = parent {
            let siblings = &self.get(p).by_name;
            if siblings.contains_key(&component.name) {
                return Err(Error::schema(format!(
                    "duplicate component name '{}' under {}",
                    component.name,
                    self.path_of(p)
                )));
            }
            component.parent = Some(p);
        }
        let name = component.name.clone();
        self.nodes.push(component);
        if let Some(p) = parent {
            let parent = self.get_mut(p);
            parent.children.push(id);
            parent.by_name.insert(name, id);
        }
        Ok(id)
    }

    /// Replaces the child order of `id`; `order` must be a permutation.
    pub(crate) fn reorder_children(&mut self, id: NodeId, order: Vec<NodeId>) {
        debug_assert_eq!(order.len(), self.get(id).children.len());
        self.get_mut(id).children = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(xml: &str) -> Tree {
        Tree::from_schema(&SchemaNode::parse(xml).unwrap()).unwrap()
    }

    #[test]
    fn paths_and_ancestry() {
        let t = tree(
            r#"<binary size="16"><layout><group name="hdr"><number name="magic" size="4"/></group></layout></binary>"#,
        );
        let layout = t.child(t.root(), "layout").unwrap();
        let hdr = t.child(layout, "hdr").unwrap();
        let magic = t.child(hdr, "magic").unwrap();
        assert_eq!(t.path_of(magic), "/layout/hdr/magic");
        assert_eq!(t.path_of(t.root()), "/");
        assert!(t.is_ancestor(layout, magic));
        assert!(!t.is_ancestor(magic, layout));
        assert_eq!(t.subtree(layout), vec![layout, hdr, magic]);
    }

    #[test]
    fn row_indices_nest() {
        let t = tree(
            r#"<binary size="64"><layout>
                 <table name="outer" count="2">
                   <table name="inner" count="3"><number name="n" size="1"/></table>
                 </table>
               </layout></binary>"#,
        );
        let layout = t.child(t.root(), "layout").unwrap();
        let outer = t.child(layout, "outer").unwrap();
        let row1 = t.child(outer, "1").unwrap();
        let cell = t.child(row1, "2").unwrap();
        assert_eq!(t.row_index(cell, 0), Some(2));
        assert_eq!(t.row_index(cell, 1), Some(1));
        assert_eq!(t.row_index(cell, 2), None);
    }

    #[test]
    fn duplicate_sibling_names_are_rejected() {
        let doc = SchemaNode::parse(
            r#"<binary size="8"><layout><number name="a" size="1"/><number name="a" size="1"/></layout></binary>"#,
        )
        .unwrap();
        let err = Tree::from_schema(&doc).unwrap_err();
        assert!(err.to_string().contains("duplicate component name 'a'"), "{err}");
    }
}
