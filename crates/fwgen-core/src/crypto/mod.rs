//! Cryptographic primitives behind the hash, sign, verify, CRC, checksum and
//! key components.

pub mod asymmetric;
pub mod checksum;
pub mod crc;
pub mod hash;
pub mod signer;
pub mod symmetric;

pub use asymmetric::{KeyMaterial, RsaPadding};
pub use checksum::ChecksumMethod;
pub use crc::CrcAlgorithm;
pub use hash::HashAlgorithm;
pub use signer::SignStrategy;
pub use symmetric::{AesKeySize, AesMode};
