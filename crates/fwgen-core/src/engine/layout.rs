//! Layout pass: offsets and reserved sizes.

use std::cmp::Ordering;
use std::fs;

use super::Engine;
use crate::component::{Kind, NodeId, State};
use crate::crypto::AesKeySize;
use crate::error::{Error, Result};
use crate::value::{MAX_INT_SIZE, Value};

/// Widest checksum, so the sum always fits the value type.
const MAX_CHECKSUM_SIZE: usize = 8;

impl Engine {
    /// Lays out the whole tree from offset zero.
    pub(crate) fn layout(&mut self) -> Result<()> {
        let root = self.tree.root();
        self.buffer.seek(0)?;
        self.layout_node(root)?;
        log::debug!(
            "layout: {} components, {} bytes reserved",
            self.tree.len(),
            self.buffer.len()
        );
        Ok(())
    }

    /// Lays out `id` and its subtree if that has not happened yet.
    ///
    /// Components outside the placed tree get a size but no offset.
    pub(crate) fn layout_node(&mut self, id: NodeId) -> Result<()> {
        if self.tree.get(id).state != State::Parsed {
            return Ok(());
        }
        if !self.laying_out.insert(id) {
            return Err(self.locate(
                id,
                Error::layout(format!("{} depends on its own layout", self.tree.path_of(id))),
            ));
        }
        let result = self.layout_inner(id);
        self.laying_out.remove(&id);
        result.map_err(|e| self.locate(id, e))
    }

    fn layout_inner(&mut self, id: NodeId) -> Result<()> {
        let placed = self.tree.get(id).placed;
        let formulas = self.tree.get(id).formulas.clone();

        if let Some(formula) = &formulas.enabled {
            if !self.eval(id, formula)?.as_bool() {
                self.disable(id);
                log::trace!("{}: disabled", self.tree.path_of(id));
                return Ok(());
            }
        }

        let start = if placed {
            if let Some(formula) = &formulas.align {
                let align = self.eval_usize(id, formula, "alignment")?;
                if align == 0 {
                    return Err(Error::value("alignment must be positive"));
                }
                let aligned = self.buffer.position().div_ceil(align) * align;
                self.buffer.seek(aligned)?;
            }
            if let Some(formula) = &formulas.offset {
                let offset = self.eval_usize(id, formula, "offset")?;
                let cursor = self.buffer.position();
                if offset < cursor {
                    return Err(Error::layout(format!(
                        "offset {offset:#x} is behind the cursor at {cursor:#x}"
                    )));
                }
                self.buffer.seek(offset)?;
            }
            let start = self.buffer.position();
            self.tree.get_mut(id).offset = Some(start);
            start
        } else {
            0
        };

        let declared = match &formulas.size {
            Some(formula) => Some(self.eval_usize(id, formula, "size")?),
            None => None,
        };
        let fixed = self.fixed_size(id, declared)?;
        let content = self.layout_children(id, placed, start)?;
        let length = match (fixed, declared, content) {
            (Some(fixed), _, _) => fixed,
            (None, Some(declared), Some(content)) => {
                if content > declared {
                    return Err(Error::layout(format!(
                        "children take {content} bytes but the size is {declared}"
                    )));
                }
                declared
            }
            (None, Some(declared), None) => declared,
            (None, None, Some(content)) => content,
            (None, None, None) => self.natural_size(id)?,
        };

        let mut size = length;
        if let Some(formula) = &formulas.padding {
            let padding = self.eval_usize(id, formula, "padding")?;
            if padding == 0 {
                return Err(Error::value("padding must be positive"));
            }
            size = size.div_ceil(padding) * padding;
        }
        let size = self.plan_cipher(id, size)?;

        let node = self.tree.get_mut(id);
        node.length = length;
        node.size = size;
        node.state = State::LaidOut;
        if placed {
            self.buffer.reserve_to(start + size)?;
        }
        log::trace!(
            "{}: offset {start:#x} length {length} size {size}",
            self.tree.path_of(id)
        );
        Ok(())
    }

    /// Size fixed by the variant itself, checked against a declared size.
    fn fixed_size(&mut self, id: NodeId, declared: Option<usize>) -> Result<Option<usize>> {
        let exact = |actual: usize| match declared {
            Some(declared) if declared != actual => Err(Error::layout(format!(
                "declared size {declared} but the content is {actual} bytes"
            ))),
            _ => Ok(Some(actual)),
        };
        match self.tree.get(id).kind.clone() {
            Kind::Number { .. } | Kind::BitField { .. } | Kind::Register { .. } => match declared {
                Some(size) if (1..=MAX_INT_SIZE).contains(&size) => Ok(Some(size)),
                Some(size) => Err(Error::value(format!(
                    "integer size {size} is outside 1..={MAX_INT_SIZE}"
                ))),
                None => Err(Error::schema("integer components need a size")),
            },
            Kind::Checksum(_) => match declared.unwrap_or(1) {
                size @ 1..=MAX_CHECKSUM_SIZE => Ok(Some(size)),
                size => Err(Error::value(format!(
                    "checksum size {size} is outside 1..={MAX_CHECKSUM_SIZE}"
                ))),
            },
            Kind::Bit(_) | Kind::Verify(_) | Kind::TableEntry(_) | Kind::Key(_) => Ok(Some(0)),
            Kind::Hash(spec) => exact(spec.algorithm.digest_len()),
            Kind::Crc(spec) => exact(spec.algorithm.size()),
            Kind::Sign(spec) => {
                let key = self.lookup(id, &spec.key)?;
                let material = self.key_material(key)?;
                exact(material.signature_len())
            }
            Kind::File(_) => {
                let data = self.load_file(id)?;
                exact(data.len())
            }
            Kind::AesKey(_) => {
                let key = self.load_aes_key(id)?;
                exact(key.len())
            }
            _ => Ok(None),
        }
    }

    /// Lays out the children; returns the bytes they span, or `None` for a
    /// component without children.
    fn layout_children(&mut self, id: NodeId, placed: bool, start: usize) -> Result<Option<usize>> {
        if self.tree.get(id).kind.is_bit_container() {
            for child in self.tree.get(id).children.clone() {
                let bit = self.tree.get_mut(child);
                bit.state = State::LaidOut;
                bit.offset = None;
            }
            return Ok(None);
        }
        if matches!(self.tree.get(id).kind, Kind::Table(_)) {
            self.ensure_rows(id)?;
            self.sort_rows(id)?;
        }
        let children = self.tree.get(id).children.clone();
        if children.is_empty() {
            return Ok(None);
        }
        let mut total = 0;
        for child in children {
            if placed && !self.tree.get(child).placed {
                continue;
            }
            self.layout_node(child)?;
            total += self.tree.get(child).size;
        }
        Ok(Some(if placed {
            self.buffer.position() - start
        } else {
            total
        }))
    }

    /// Size of a leaf without a declared size: its value's length.
    fn natural_size(&mut self, id: NodeId) -> Result<usize> {
        let node = self.tree.get(id);
        if !matches!(node.kind, Kind::Text { .. } | Kind::Bytes | Kind::Unknown(_)) {
            return Ok(0);
        }
        let value = match node.formulas.value.clone() {
            Some(formula) => {
                let v = self.eval(id, &formula)?;
                self.coerce(id, v)?
            }
            None => node.value.clone(),
        };
        Ok(value.as_bytes().len())
    }

    /// Reorders table rows by their `sort` key, keeping ties in row order.
    fn sort_rows(&mut self, table: NodeId) -> Result<()> {
        let Kind::Table(spec) = &self.tree.get(table).kind else {
            return Ok(());
        };
        let Some(sort) = spec.sort.clone() else {
            return Ok(());
        };
        let mut keyed = Vec::new();
        for row in self.tree.rows(table) {
            keyed.push((self.eval(row, &sort)?, row));
        }
        keyed.sort_by(|(a, _), (b, _)| compare(a, b));
        let order = keyed.into_iter().map(|(_, row)| row).collect();
        self.tree.reorder_children(table, order);
        Ok(())
    }

    /// Removes `id` and its subtree from the image.
    fn disable(&mut self, id: NodeId) {
        for node in self.tree.subtree(id) {
            let node = self.tree.get_mut(node);
            node.enabled = false;
            node.offset = None;
            node.size = 0;
            node.length = 0;
            node.cipher = None;
            node.image.clear();
            node.state = State::Built;
        }
    }

    /// Loads (once) the selected range of a `<file>`.
    pub(crate) fn load_file(&mut self, id: NodeId) -> Result<Vec<u8>> {
        let Kind::File(spec) = &self.tree.get(id).kind else {
            return Ok(Vec::new());
        };
        if let Some(data) = &spec.cache {
            return Ok(data.clone());
        }
        let spec = spec.clone();
        let path = self.options.resolve(&spec.path);
        let data = fs::read(&path).map_err(|e| Error::io(&path, "reading", e))?;
        let start = match &spec.file_offset {
            Some(formula) => self.eval_usize(id, formula, "file offset")?,
            None => 0,
        };
        let len = match &spec.length {
            Some(formula) => self.eval_usize(id, formula, "file length")?,
            None => data.len().saturating_sub(start),
        };
        let range = start
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .map(|end| start..end)
            .ok_or_else(|| {
                Error::value(format!(
                    "{} has {} bytes; cannot take {len} at {start}",
                    path.display(),
                    data.len()
                ))
            })?;
        let data = data[range].to_vec();
        log::debug!("{}: loaded {} bytes from {}", self.tree.path_of(id), data.len(), path.display());
        if let Kind::File(spec) = &mut self.tree.get_mut(id).kind {
            spec.cache = Some(data.clone());
        }
        Ok(data)
    }

    /// Loads and classifies an `<aes_key>`; the key becomes its value.
    pub(crate) fn load_aes_key(&mut self, id: NodeId) -> Result<Vec<u8>> {
        let node = self.tree.get(id);
        let Kind::AesKey(spec) = &node.kind else {
            return Err(Error::schema(format!(
                "{} is not an <aes_key>",
                self.tree.path_of(id)
            )));
        };
        let key = match (&node.value, &spec.path) {
            (Value::Bytes(bytes), _) if !bytes.is_empty() => bytes.clone(),
            (_, Some(path)) => {
                let path = self.options.resolve(path);
                fs::read(&path).map_err(|e| Error::io(&path, "reading", e))?
            }
            (value, None) => value.as_bytes(),
        };
        if AesKeySize::from_len(key.len()).is_none() {
            return Err(Error::crypto(format!(
                "AES key of {} bytes; expected 16, 24 or 32",
                key.len()
            )));
        }
        self.tree.get_mut(id).value = Value::Bytes(key.clone());
        Ok(key)
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.as_int(), b.as_int()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
