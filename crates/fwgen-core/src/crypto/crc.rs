//! Table-driven CRC over a small fixed registry of parameter sets.

/// Parameters of one CRC variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcParams {
    /// Register width in bits (8, 16 or 32).
    pub width: u32,
    /// Generator polynomial, normal (MSB-first) form.
    pub poly: u32,
    /// Initial register value.
    pub init: u32,
    /// Input and output are bit-reflected.
    pub reflect: bool,
    /// Final XOR value.
    pub xorout: u32,
}

/// Named CRC variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcAlgorithm {
    /// CRC-8, poly 0x07, init 0xFF.
    Crc8,
    /// CRC-8, poly 0x07, init 0x00.
    Crc8Zero,
    /// CRC-16-CCITT, poly 0x1021, init 0xFFFF.
    Crc16Ccitt,
    /// CRC-32 (IEEE 802.3), reflected.
    Crc32,
}

impl CrcAlgorithm {
    /// Looks up a registry entry by name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "crc8" | "crc_8" => Some(Self::Crc8),
            "crc8_zero" | "crc_8_zero" => Some(Self::Crc8Zero),
            "crc16" | "crc16_ccitt" | "crc_16_ccitt" => Some(Self::Crc16Ccitt),
            "crc32" | "crc_32" => Some(Self::Crc32),
            _ => None,
        }
    }

    /// Parameter set of this variant.
    pub fn params(self) -> CrcParams {
        match self {
            Self::Crc8 => CrcParams { width: 8, poly: 0x07, init: 0xFF, reflect: false, xorout: 0 },
            Self::Crc8Zero => CrcParams { width: 8, poly: 0x07, init: 0x00, reflect: false, xorout: 0 },
            Self::Crc16Ccitt => {
                CrcParams { width: 16, poly: 0x1021, init: 0xFFFF, reflect: false, xorout: 0 }
            }
            Self::Crc32 => CrcParams {
                width: 32,
                poly: 0x04C1_1DB7,
                init: 0xFFFF_FFFF,
                reflect: true,
                xorout: 0xFFFF_FFFF,
            },
        }
    }

    /// Output size in bytes.
    pub fn size(self) -> usize {
        (self.params().width / 8) as usize
    }

    /// Computes the CRC of `data`.
    pub fn compute(self, data: &[u8]) -> u32 {
        match self {
            Self::Crc32 => crc32fast::hash(data),
            _ => CrcEngine::new(self.params()).checksum(data),
        }
    }
}

/// A CRC parameter set with its precomputed lookup table.
pub struct CrcEngine {
    params: CrcParams,
    table: [u32; 256],
}

impl CrcEngine {
    /// Builds the lookup table for `params`.
    pub fn new(params: CrcParams) -> Self {
        let mut table = [0u32; 256];
        let mask = width_mask(params.width);
        if params.reflect {
            let poly = params.poly.reverse_bits() >> (32 - params.width);
            for (i, slot) in table.iter_mut().enumerate() {
                let mut crc = i as u32;
                for _ in 0..8 {
                    crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
                }
                *slot = crc;
            }
        } else {
            let top = 1u32 << (params.width - 1);
            for (i, slot) in table.iter_mut().enumerate() {
                let mut crc = (i as u32) << (params.width - 8);
                for _ in 0..8 {
                    crc = if crc & top != 0 { (crc << 1) ^ params.poly } else { crc << 1 };
                }
                *slot = crc & mask;
            }
        }
        Self { params, table }
    }

    /// Runs the CRC over `data`.
    pub fn checksum(&self, data: &[u8]) -> u32 {
        let mask = width_mask(self.params.width);
        let mut crc = self.params.init & mask;
        if self.params.reflect {
            for byte in data {
                crc = self.table[((crc ^ u32::from(*byte)) & 0xFF) as usize] ^ (crc >> 8);
            }
        } else {
            let shift = self.params.width - 8;
            for byte in data {
                let idx = ((crc >> shift) ^ u32::from(*byte)) & 0xFF;
                crc = ((crc << 8) ^ self.table[idx as usize]) & mask;
            }
        }
        (crc ^ self.params.xorout) & mask
    }
}

fn width_mask(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1u32 << width) - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn registry_check_values() {
        assert_eq!(CrcAlgorithm::Crc8.compute(CHECK), 0xFB);
        assert_eq!(CrcAlgorithm::Crc8Zero.compute(CHECK), 0xF4);
        assert_eq!(CrcAlgorithm::Crc16Ccitt.compute(CHECK), 0x29B1);
        assert_eq!(CrcAlgorithm::Crc32.compute(CHECK), 0xCBF4_3926);
    }

    #[test]
    fn table_engine_matches_crc32fast() {
        let engine = CrcEngine::new(CrcAlgorithm::Crc32.params());
        for data in [&b""[..], CHECK, &[1, 2, 3, 4], &[0xFF; 300]] {
            assert_eq!(engine.checksum(data), crc32fast::hash(data));
        }
        assert_eq!(engine.checksum(&[1, 2, 3, 4]), 0xB63C_FBCD);
    }

    #[test]
    fn parse_names() {
        assert_eq!(CrcAlgorithm::parse("CRC-16-CCITT"), Some(CrcAlgorithm::Crc16Ccitt));
        assert_eq!(CrcAlgorithm::parse("crc8_zero"), Some(CrcAlgorithm::Crc8Zero));
        assert_eq!(CrcAlgorithm::Crc32.size(), 4);
        assert_eq!(CrcAlgorithm::parse("crc64"), None);
    }
}
