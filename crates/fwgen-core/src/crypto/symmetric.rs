//! AES key classification and CBC/CTR encryption.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};

/// AES block size in bytes.
pub const BLOCK_LEN: usize = 16;
/// Initialization vector length in bytes.
pub const IV_LEN: usize = 16;

/// AES key sizes, classified by key length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesKeySize {
    /// 16-byte key.
    Aes128,
    /// 24-byte key.
    Aes192,
    /// 32-byte key.
    Aes256,
}

impl AesKeySize {
    /// Classifies a raw key by its length.
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(Self::Aes128),
            24 => Some(Self::Aes192),
            32 => Some(Self::Aes256),
            _ => None,
        }
    }

    /// Key size in bits.
    pub fn bits(self) -> usize {
        match self {
            Self::Aes128 => 128,
            Self::Aes192 => 192,
            Self::Aes256 => 256,
        }
    }
}

/// Block cipher mode and padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AesMode {
    /// CBC with PKCS#7 padding; always adds at least one byte.
    #[default]
    Cbc,
    /// CBC without padding; input must be block aligned.
    CbcNoPad,
    /// CTR (big-endian 128-bit counter); output length equals input.
    Ctr,
}

impl AesMode {
    /// Parses `cbc`, `cbc-nopad` or `ctr`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "cbc" | "cbc-pkcs7" => Some(Self::Cbc),
            "cbc-nopad" | "cbc-none" => Some(Self::CbcNoPad),
            "ctr" => Some(Self::Ctr),
            _ => None,
        }
    }

    /// Ciphertext length for a `len`-byte plaintext.
    pub fn encrypted_len(self, len: usize) -> Result<usize, String> {
        match self {
            Self::Cbc => Ok((len / BLOCK_LEN + 1) * BLOCK_LEN),
            Self::CbcNoPad if len % BLOCK_LEN != 0 => Err(format!(
                "{len} bytes are not a multiple of the {BLOCK_LEN}-byte AES block"
            )),
            Self::CbcNoPad | Self::Ctr => Ok(len),
        }
    }
}

/// Runs `$body` with `$cipher` bound to the AES type matching the key length.
macro_rules! with_cipher {
    ($key:expr, $cipher:ident => $body:expr) => {
        match AesKeySize::from_len($key.len()) {
            Some(AesKeySize::Aes128) => {
                type $cipher = aes::Aes128;
                $body
            }
            Some(AesKeySize::Aes192) => {
                type $cipher = aes::Aes192;
                $body
            }
            Some(AesKeySize::Aes256) => {
                type $cipher = aes::Aes256;
                $body
            }
            None => Err(format!("unsupported AES key length {}", $key.len())),
        }
    };
}

fn check_iv(iv: &[u8]) -> Result<(), String> {
    if iv.len() == IV_LEN {
        Ok(())
    } else {
        Err(format!("IV must be {IV_LEN} bytes, got {}", iv.len()))
    }
}

/// Encrypts `data` with `key` and `iv`.
pub fn encrypt(key: &[u8], iv: &[u8], mode: AesMode, data: &[u8]) -> Result<Vec<u8>, String> {
    check_iv(iv)?;
    mode.encrypted_len(data.len())?;
    with_cipher!(key, C => match mode {
        AesMode::Cbc => Ok(cbc::Encryptor::<C>::new_from_slices(key, iv)
            .map_err(|e| e.to_string())?
            .encrypt_padded_vec_mut::<Pkcs7>(data)),
        AesMode::CbcNoPad => Ok(cbc::Encryptor::<C>::new_from_slices(key, iv)
            .map_err(|e| e.to_string())?
            .encrypt_padded_vec_mut::<NoPadding>(data)),
        AesMode::Ctr => {
            let mut out = data.to_vec();
            ctr::Ctr128BE::<C>::new_from_slices(key, iv)
                .map_err(|e| e.to_string())?
                .apply_keystream(&mut out);
            Ok(out)
        }
    })
}

/// Decrypts `data` produced by [`encrypt`] with the same parameters.
pub fn decrypt(key: &[u8], iv: &[u8], mode: AesMode, data: &[u8]) -> Result<Vec<u8>, String> {
    check_iv(iv)?;
    if mode != AesMode::Ctr && data.len() % BLOCK_LEN != 0 {
        return Err(format!("ciphertext of {} bytes is not block aligned", data.len()));
    }
    with_cipher!(key, C => match mode {
        AesMode::Cbc => cbc::Decryptor::<C>::new_from_slices(key, iv)
            .map_err(|e| e.to_string())?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|e| format!("bad padding: {e}")),
        AesMode::CbcNoPad => cbc::Decryptor::<C>::new_from_slices(key, iv)
            .map_err(|e| e.to_string())?
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(|e| format!("bad padding: {e}")),
        AesMode::Ctr => {
            let mut out = data.to_vec();
            ctr::Ctr128BE::<C>::new_from_slices(key, iv)
                .map_err(|e| e.to_string())?
                .apply_keystream(&mut out);
            Ok(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x11; 16];
    const IV: [u8; 16] = [0x22; 16];

    #[test]
    fn cbc_pads_to_next_block() {
        assert_eq!(AesMode::Cbc.encrypted_len(10), Ok(16));
        assert_eq!(AesMode::Cbc.encrypted_len(16), Ok(32));
        let ct = encrypt(&KEY, &IV, AesMode::Cbc, &[0xAB; 10]).unwrap();
        assert_eq!(ct.len(), 16);
        assert_eq!(decrypt(&KEY, &IV, AesMode::Cbc, &ct).unwrap(), vec![0xAB; 10]);
    }

    #[test]
    fn cbc_nopad_requires_alignment() {
        assert!(AesMode::CbcNoPad.encrypted_len(10).is_err());
        assert!(encrypt(&KEY, &IV, AesMode::CbcNoPad, &[0; 10]).is_err());
        let ct = encrypt(&KEY, &IV, AesMode::CbcNoPad, &[0; 32]).unwrap();
        assert_eq!(ct.len(), 32);
    }

    #[test]
    fn ctr_keeps_length() {
        let key = [0x33; 32];
        let ct = encrypt(&key, &IV, AesMode::Ctr, b"hello").unwrap();
        assert_eq!(ct.len(), 5);
        assert_ne!(ct, b"hello");
        assert_eq!(decrypt(&key, &IV, AesMode::Ctr, &ct).unwrap(), b"hello");
    }

    #[test]
    fn rejects_bad_key_and_iv() {
        assert!(encrypt(&[0; 15], &IV, AesMode::Ctr, b"x").is_err());
        assert!(encrypt(&KEY, &[0; 8], AesMode::Ctr, b"x").is_err());
        assert_eq!(AesKeySize::from_len(24), Some(AesKeySize::Aes192));
    }
}
