//! Byte-wise checksums.

/// Reduction applied to the input bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMethod {
    /// Two's-complement negation of the byte sum, so that the sum of the
    /// data plus the checksum is zero modulo the checksum width.
    #[default]
    Sum,
    /// XOR of all bytes.
    Xor,
}

impl ChecksumMethod {
    /// Parses `sum` or `xor`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "xor" => Some(Self::Xor),
            _ => None,
        }
    }

    /// Computes the checksum of `data` truncated to `size` bytes.
    pub fn compute(self, data: &[u8], size: usize) -> u128 {
        let bits = (size * 8).min(128);
        let mask = if bits >= 128 { u128::MAX } else { (1u128 << bits) - 1 };
        match self {
            Self::Sum => {
                let sum = data
                    .iter()
                    .fold(0u128, |acc, b| acc.wrapping_add(u128::from(*b)));
                sum.wrapping_neg() & mask
            }
            Self::Xor => u128::from(data.iter().fold(0u8, |acc, b| acc ^ b)) & mask,
        }
    }
}
