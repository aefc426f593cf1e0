//! Bit ranges of bit fields and registers.

use std::collections::BTreeSet;

use super::{Component, Kind, NodeId, Tree};
use crate::error::{Error, Result};
use crate::schema::SchemaNode;
use crate::value::{Value, low_mask};

/// Widest bit field or register in bytes. Bit 127 is the sign bit of the
/// integer values bits are composed into.
pub(crate) const MAX_BIT_CONTAINER_SIZE: usize = 15;

/// Inclusive bit range `lo..=hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BitRange {
    /// Lowest bit.
    pub lo: u32,
    /// Highest bit, inclusive.
    pub hi: u32,
}

impl BitRange {
    /// Number of bits covered.
    pub fn width(self) -> u32 {
        self.hi - self.lo + 1
    }

    /// Mask of `width` low bits.
    pub fn mask(self) -> i128 {
        low_mask(self.width())
    }

    /// Extracts this range from `value`.
    pub fn extract(self, value: i128) -> i128 {
        (value >> self.lo) & self.mask()
    }

    /// Replaces this range of `target` with the low bits of `field`.
    pub fn insert(self, target: i128, field: i128) -> i128 {
        let mask = self.mask() << self.lo;
        (target & !mask) | ((field & self.mask()) << self.lo)
    }
}

/// Parses `n` or `lo:hi`.
pub(crate) fn parse_bit_range(text: &str) -> std::result::Result<BitRange, String> {
    let bit = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid bit index '{}'", s.trim()))
    };
    let range = match text.split_once(':') {
        Some((lo, hi)) => BitRange { lo: bit(lo)?, hi: bit(hi)? },
        None => {
            let n = bit(text)?;
            BitRange { lo: n, hi: n }
        }
    };
    if range.lo > range.hi {
        return Err(format!("bit range '{text}' is reversed"));
    }
    if range.hi >= 127 {
        return Err(format!("bit range '{text}' goes past bit 126"));
    }
    Ok(range)
}

/// Parses a `used_bits` list such as `0,1,4:7`.
pub(crate) fn parse_bit_list(text: &str) -> std::result::Result<Vec<u32>, String> {
    let mut bits = Vec::new();
    for item in text.split([',', ' ']).filter(|s| !s.trim().is_empty()) {
        let range = parse_bit_range(item)?;
        bits.extend(range.lo..=range.hi);
    }
    Ok(bits)
}

impl Tree {
    /// Checks the bit children of a bit field or register against its width,
    /// synthesising reserved bits for registers.
    pub(crate) fn check_bit_layout(&mut self, id: NodeId, width_bits: u32) -> Result<()> {
        let mut ranges: Vec<(BitRange, String)> = Vec::new();
        for child in &self.get(id).children {
            let node = self.get(*child);
            let Kind::Bit(range) = node.kind else {
                return Err(Error::schema(format!(
                    "<{}> may only contain <bit> elements, found <{}>",
                    self.get(id).tag,
                    node.tag
                )));
            };
            if range.hi >= width_bits {
                return Err(Error::schema(format!(
                    "bit '{}' ({}:{}) lies outside the {width_bits}-bit field",
                    node.name, range.lo, range.hi
                )));
            }
            ranges.push((range, node.name.clone()));
        }
        ranges.sort_by_key(|(range, _)| *range);
        for pair in ranges.windows(2) {
            let ((a, a_name), (b, b_name)) = (&pair[0], &pair[1]);
            if b.lo <= a.hi {
                return Err(Error::schema(format!("bits '{a_name}' and '{b_name}' overlap")));
            }
        }

        let covered: BTreeSet<u32> = ranges.iter().flat_map(|(r, _)| r.lo..=r.hi).collect();
        match self.get(id).kind.clone() {
            Kind::BitField { used_bits } => {
                let expected: BTreeSet<u32> = match used_bits {
                    Some(list) => list.into_iter().collect(),
                    None => (0..width_bits).collect(),
                };
                if covered != expected {
                    let missing: Vec<u32> = expected.difference(&covered).copied().collect();
                    let extra: Vec<u32> = covered.difference(&expected).copied().collect();
                    return Err(Error::schema(format!(
                        "bits do not cover the field exactly (missing {missing:?}, unexpected {extra:?})"
                    )));
                }
            }
            Kind::Register { reserved_value } => {
                let mut gaps = Vec::new();
                let mut next = 0u32;
                for (range, _) in &ranges {
                    if range.lo > next {
                        gaps.push(BitRange { lo: next, hi: range.lo - 1 });
                    }
                    next = range.hi + 1;
                }
                if next < width_bits {
                    gaps.push(BitRange { lo: next, hi: width_bits - 1 });
                }
                for gap in gaps {
                    let mut bit = SchemaNode::new("bit");
                    bit.set_attr("name", format!("reserved_{}_{}", gap.lo, gap.hi));
                    bit.set_attr("bits", format!("{}:{}", gap.lo, gap.hi));
                    bit.set_attr("value", gap.extract(reserved_value).to_string());
                    self.construct(&bit, Some(id), None, None)?;
                }
                let mut order = self.get(id).children.clone();
                order.sort_by_key(|c| match self.get(*c).kind {
                    Kind::Bit(range) => range.lo,
                    _ => 0,
                });
                self.reorder_children(id, order);
            }
            _ => {}
        }
        Ok(())
    }

    /// Splits `value` across the bit children of `id`.
    pub(crate) fn distribute_bits(&mut self, id: NodeId, value: i128) -> Result<()> {
        let bits = self.bit_children(id);
        let covered = bits
            .iter()
            .fold(0i128, |acc, (_, range)| acc | (range.mask() << range.lo));
        if value < 0 || value & !covered != 0 {
            return Err(Error::value(format!(
                "{value:#x} sets bits outside the bit ranges of '{}'",
                self.get(id).name
            )));
        }
        for (child, range) in bits {
            self.get_mut(child).value = Value::Int(range.extract(value));
        }
        Ok(())
    }

    /// Bit children of `id` with their ranges.
    pub(crate) fn bit_children(&self, id: NodeId) -> Vec<(NodeId, BitRange)> {
        self.get(id)
            .children
            .iter()
            .filter_map(|c| match self.get(*c).kind {
                Kind::Bit(range) => Some((*c, range)),
                _ => None,
            })
            .collect()
    }
}

impl Component {
    /// Integer value of a bit child, checked against its width.
    pub(crate) fn bit_value(&self, range: BitRange) -> Result<i128> {
        let v = match &self.value {
            Value::None => 0,
            other => other.as_int().map_err(Error::value)?,
        };
        if v < 0 || v > range.mask() {
            return Err(Error::value(format!(
                "bit '{}' value {v} does not fit {} bit(s)",
                self.name,
                range.width()
            )));
        }
        Ok(v)
    }
}
