//! Component values and the byte-level codecs shared by every variant.

use std::fmt;

/// A component or formula value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// Not computed yet, or intentionally empty.
    #[default]
    None,
    /// Result of a comparison or a boolean literal.
    Bool(bool),
    /// Integer; wide enough for every supported number size.
    Int(i128),
    /// ASCII text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns `true` for [`Value::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Coerces the value to an integer.
    ///
    /// Text is parsed as an integer literal and bytes are read big-endian.
    pub fn as_int(&self) -> Result<i128, String> {
        match self {
            Self::Bool(b) => Ok(i128::from(*b)),
            Self::Int(v) => Ok(*v),
            Self::Text(s) => {
                parse_int_literal(s).ok_or_else(|| format!("text '{s}' is not an integer"))
            }
            Self::Bytes(b) if b.len() <= 16 => Ok(decode_int(b, false, ByteOrder::Big)),
            Self::Bytes(b) => Err(format!("{} bytes do not fit an integer", b.len())),
            Self::None => Err("value is not set".to_string()),
        }
    }

    /// Truthiness: zero, empty and unset values are false.
    pub fn as_bool(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Text(s) => !s.is_empty() && s != "false" && s != "0",
            Self::Bytes(b) => b.iter().any(|byte| *byte != 0),
        }
    }

    /// Converts to bytes: integers are encoded big-endian at their minimal
    /// width, text as its ASCII bytes.
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            Self::None => Vec::new(),
            Self::Bool(b) => vec![u8::from(*b)],
            Self::Int(v) => minimal_be_bytes(*v),
            Self::Text(s) => s.as_bytes().to_vec(),
            Self::Bytes(b) => b.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Bytes(b) => f.write_str(&hex::encode(b)),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Self::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Int(v as i128)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

/// Byte order of a multi-byte integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl ByteOrder {
    /// Parses `little`/`le` or `big`/`be`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "little" | "le" | "little_endian" => Some(Self::Little),
            "big" | "be" | "big_endian" => Some(Self::Big),
            _ => None,
        }
    }
}

/// Largest supported integer width in bytes.
pub const MAX_INT_SIZE: usize = 16;

/// Encodes `value` into exactly `size` bytes, rejecting values that do not fit.
pub fn encode_int(
    value: i128,
    size: usize,
    signed: bool,
    order: ByteOrder,
) -> Result<Vec<u8>, String> {
    if size == 0 || size > MAX_INT_SIZE {
        return Err(format!("integer size {size} is outside 1..={MAX_INT_SIZE}"));
    }
    let bits = size * 8;
    if bits < 128 {
        let (min, max) = if signed {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        };
        if value < min || value > max {
            return Err(format!(
                "{value} does not fit a {} {size}-byte integer",
                if signed { "signed" } else { "unsigned" }
            ));
        }
    } else if !signed && value < 0 {
        return Err(format!("{value} does not fit an unsigned {size}-byte integer"));
    }
    let mut bytes = value.to_le_bytes()[..size].to_vec();
    if order == ByteOrder::Big {
        bytes.reverse();
    }
    Ok(bytes)
}

/// Decodes up to 16 bytes into an integer, sign-extending when `signed`.
pub fn decode_int(bytes: &[u8], signed: bool, order: ByteOrder) -> i128 {
    let mut le = bytes.to_vec();
    if order == ByteOrder::Big {
        le.reverse();
    }
    le.truncate(MAX_INT_SIZE);
    let negative = signed && le.last().is_some_and(|b| b & 0x80 != 0);
    let mut raw = [if negative { 0xFF } else { 0x00 }; MAX_INT_SIZE];
    raw[..le.len()].copy_from_slice(&le);
    i128::from_le_bytes(raw)
}

/// Big-endian bytes of `value` without leading zero bytes (at least one byte).
fn minimal_be_bytes(value: i128) -> Vec<u8> {
    let be = value.to_be_bytes();
    let first = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
    be[first..].to_vec()
}

/// Mask with the low `width` bits set.
pub fn low_mask(width: u32) -> i128 {
    if width >= 127 { i128::MAX } else { (1i128 << width) - 1 }
}

/// Parses a decimal, `0x` hex or `0b` binary integer literal with an optional
/// sign. Underscores between digits are ignored.
pub fn parse_int_literal(text: &str) -> Option<i128> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let clean = body.replace('_', "");
    if clean.is_empty() {
        return None;
    }
    let magnitude = if let Some(hex) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        u128::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = clean.strip_prefix("0b").or_else(|| clean.strip_prefix("0B")) {
        u128::from_str_radix(bin, 2).ok()?
    } else if clean.bytes().all(|b| b.is_ascii_digit()) {
        clean.parse::<u128>().ok()?
    } else {
        return None;
    };
    let magnitude = i128::try_from(magnitude).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Parses a hex byte string. Accepts an optional `0x` prefix and ignores
/// whitespace, `:` and `_` separators.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, String> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let clean: String = body
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '_')
        .collect();
    hex::decode(&clean).map_err(|e| format!("invalid hex bytes '{text}': {e}"))
}
