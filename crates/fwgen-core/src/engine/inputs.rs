//! `input` lists of hash, sign, verify, CRC and checksum components.

use super::Engine;
use crate::component::{NodeId, PathRef, State};
use crate::error::{Error, Result};

impl Engine {
    /// Concatenates the bytes named by a `;`-separated input list.
    ///
    /// Items are `[START:END]` buffer ranges, component paths, or formulas
    /// whose value is converted to bytes.
    pub(crate) fn collect_input(&mut self, id: NodeId, list: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for item in list.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let bytes = if let Some(inner) = item.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let (start, end) = split_range(inner)
                    .ok_or_else(|| Error::formula(item, "expected [START:END]"))?;
                let start = self.eval_usize(id, start, "range start")?;
                let end = self.eval_usize(id, end, "range end")?;
                if end < start {
                    return Err(Error::value(format!("range {start:#x}..{end:#x} is reversed")));
                }
                self.ensure_range_built(id, start, end)?;
                self.buffer.read_at(start, end - start)?
            } else if let Some(target) = self.component_ref(id, item) {
                if target == id || self.tree.is_ancestor(target, id) {
                    return Err(Error::layout(format!(
                        "input {} contains the component reading it",
                        self.tree.path_of(target)
                    )));
                }
                self.component_bytes(target)?
            } else {
                self.eval(id, item)?.as_bytes()
            };
            data.extend_from_slice(&bytes);
        }
        Ok(data)
    }

    /// The component a bare path item names, if it is one.
    fn component_ref(&mut self, id: NodeId, item: &str) -> Option<NodeId> {
        if item.contains(char::is_whitespace) {
            return None;
        }
        let path = PathRef::parse(item).ok()?;
        if path.property.is_some() {
            return None;
        }
        self.walk(id, &path, item).ok()
    }

    /// Builds every placed component whose bytes overlap `start..end`.
    ///
    /// `requester` and its ancestors and descendants are skipped; their
    /// bytes in the range read as they currently stand.
    fn ensure_range_built(&mut self, requester: NodeId, start: usize, end: usize) -> Result<()> {
        let candidates: Vec<NodeId> = self
            .tree
            .ids()
            .filter(|&id| {
                let node = self.tree.get(id);
                let overlaps = node
                    .offset
                    .is_some_and(|offset| offset < end && start < offset + node.size);
                overlaps
                    && node.placed
                    && node.enabled
                    && node.size > 0
                    && (node.is_leaf() || node.cipher.as_ref().is_some_and(|c| c.active))
                    && id != requester
                    && !self.tree.is_ancestor(id, requester)
                    && !self.tree.is_ancestor(requester, id)
            })
            .collect();
        for id in candidates {
            match self.tree.get(id).state {
                State::Built => {}
                State::Building => {
                    return Err(Error::layout(format!(
                        "dependency cycle: {} reads {}, which is being built",
                        self.tree.path_of(requester),
                        self.tree.path_of(id)
                    )));
                }
                _ => self.ensure_built(id)?,
            }
        }
        Ok(())
    }
}

/// Splits `START:END` at the first `:` that does not close a ternary.
fn split_range(inner: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut pending = 0usize;
    let mut quoted = false;
    for (i, c) in inner.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            _ if quoted => {}
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '?' if depth == 0 => pending += 1,
            ':' if depth == 0 => {
                if pending == 0 {
                    return Some((&inner[..i], &inner[i + 1..]));
                }
                pending -= 1;
            }
            _ => {}
        }
    }
    None
}
