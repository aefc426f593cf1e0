//! Build pass: final bytes.

use std::fs;

use super::Engine;
use crate::buffer::PAD_BYTE;
use crate::component::{Component, Kind, NodeId, State};
use crate::dependency;
use crate::error::{Error, Result};
use crate::value::{Value, encode_int};

impl Engine {
    /// Builds every component reachable from the root.
    pub(crate) fn build(&mut self) -> Result<()> {
        let root = self.tree.root();
        self.building = true;
        self.ensure_built(root)?;
        log::debug!("build: {} bytes written", self.buffer.len());
        Ok(())
    }

    /// Builds `id` unless it already is; components outside the placed
    /// tree are laid out first.
    pub(crate) fn ensure_built(&mut self, id: NodeId) -> Result<()> {
        let node = self.tree.get(id);
        match node.state {
            State::Built => Ok(()),
            State::Building => Err(self.locate(
                id,
                Error::layout(format!(
                    "dependency cycle: {} is needed while it is being built",
                    self.tree.path_of(id)
                )),
            )),
            State::Parsed if node.placed => Err(self.locate(
                id,
                Error::layout(format!(
                    "{} is needed before it is laid out",
                    self.tree.path_of(id)
                )),
            )),
            State::Parsed => {
                self.layout_node(id)?;
                self.ensure_built(id)
            }
            State::LaidOut => self.build_node(id).map_err(|e| self.locate(id, e)),
        }
    }

    fn build_node(&mut self, id: NodeId) -> Result<()> {
        self.tree.get_mut(id).state = State::Building;
        let kind = self.tree.get(id).kind.clone();
        let formulas = self.tree.get(id).formulas.clone();

        if self.tree.get(id).pulls() {
            dependency::pull_built(self, id)?;
        }
        if let Some(formula) = &formulas.value {
            let value = self.eval(id, formula)?;
            let value = self.coerce(id, value)?;
            match value {
                Value::Int(v) if kind.is_bit_container() => self.tree.distribute_bits(id, v)?,
                value => self.tree.get_mut(id).value = value,
            }
        }

        self.compute_derived(id, &kind)?;
        self.valued.insert(id);

        if let Some(formula) = &formulas.validate {
            if !self.eval(id, formula)?.as_bool() {
                return Err(Error::value(format!("validation `{formula}` failed")));
            }
        }

        let plain = match kind {
            Kind::Bit(range) => {
                self.tree.get(id).bit_value(range)?;
                Vec::new()
            }
            _ if self.tree.get(id).is_leaf() => self.encode_leaf(id)?,
            _ => self.assemble(id)?,
        };
        let image = self.apply_cipher(id, plain)?;
        self.commit(id, image)
    }

    /// Encodes a leaf's value and pads it to the payload size.
    fn encode_leaf(&mut self, id: NodeId) -> Result<Vec<u8>> {
        let kind = self.tree.get(id).kind.clone();
        if kind.is_bit_container() {
            let v = self.compose_bits(id, true)?;
            self.tree.get_mut(id).value = Value::Int(v);
        }

        let node = self.tree.get(id);
        let length = node.length;
        let order = node.order;
        let int = || match &node.value {
            Value::None => Ok(0),
            value => value.as_int().map_err(Error::value),
        };
        let bytes = match &kind {
            Kind::Number { signed, .. } => encode_int(int()?, length, *signed, order),
            Kind::BitField { .. } | Kind::Register { .. } | Kind::Crc(_) | Kind::Checksum(_) => {
                encode_int(int()?, length, false, order)
            }
            Kind::Text { .. } => match &node.value {
                Value::Text(s) if !s.is_ascii() => {
                    return Err(Error::value(format!("'{s}' is not ASCII")));
                }
                value => Ok(value.as_bytes()),
            },
            Kind::Root
            | Kind::Settings
            | Kind::Table(_)
            | Kind::TableEntry(_)
            | Kind::Verify(_)
            | Kind::Key(_) => Ok(Vec::new()),
            _ => match &node.value {
                Value::Int(v) if length > 0 => encode_int(*v, length, *v < 0, order),
                value => Ok(value.as_bytes()),
            },
        }
        .map_err(Error::value)?;

        if bytes.len() > length {
            return Err(Error::value(format!(
                "{} bytes do not fit the {length}-byte field",
                bytes.len()
            )));
        }
        let mut plain = bytes;
        plain.resize(payload_size(node), PAD_BYTE);
        Ok(plain)
    }

    /// Builds the children of a composite and reads back its payload.
    fn assemble(&mut self, id: NodeId) -> Result<Vec<u8>> {
        let placed = self.tree.get(id).placed;
        let children = self.tree.get(id).children.clone();
        for child in &children {
            if placed && !self.tree.get(*child).placed {
                continue;
            }
            self.ensure_built(*child)?;
        }

        let node = self.tree.get(id);
        let len = payload_size(node);
        let plain = match (placed, node.offset) {
            (true, Some(offset)) => self.buffer.read_at(offset, len)?,
            (true, None) => Vec::new(),
            (false, _) => {
                let mut out: Vec<u8> = children
                    .iter()
                    .flat_map(|c| self.tree.get(*c).image.iter().copied())
                    .collect();
                out.resize(len, PAD_BYTE);
                out
            }
        };
        self.tree.get_mut(id).value = Value::Bytes(plain.clone());
        Ok(plain)
    }

    /// Checks the image against the reservation and writes it out.
    fn commit(&mut self, id: NodeId, image: Vec<u8>) -> Result<()> {
        let node = self.tree.get(id);
        if image.len() != node.size {
            return Err(Error::layout(format!(
                "built {} bytes but {} were reserved",
                image.len(),
                node.size
            )));
        }
        if let (true, Some(offset)) = (node.placed, node.offset) {
            if !image.is_empty() {
                self.buffer.write_at(offset, &image)?;
            }
        }
        if let Some(target) = &node.save_file_path {
            let path = self.options.resolve(target);
            fs::write(&path, &image).map_err(|e| Error::io(&path, "writing", e))?;
            log::debug!("{}: saved {} bytes to {}", self.tree.path_of(id), image.len(), path.display());
        }
        log::trace!("{}: built {} bytes", self.tree.path_of(id), image.len());
        let node = self.tree.get_mut(id);
        node.image = image;
        node.state = State::Built;
        Ok(())
    }
}

/// Size before encryption overhead.
fn payload_size(node: &Component) -> usize {
    node.cipher.as_ref().map_or(node.size, |c| c.plain_size)
}
