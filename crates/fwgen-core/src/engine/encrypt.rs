//! Inline and offline encryption of component payloads.

use std::fs;

use rand::RngCore;

use super::Engine;
use crate::buffer::PAD_BYTE;
use crate::component::{Cipher, Kind, NodeId};
use crate::crypto::symmetric::{self, IV_LEN};
use crate::error::{Error, Result};
use crate::options::OfflineMode;
use crate::value::parse_hex_bytes;

impl Engine {
    /// Resolves the key of an encrypted component and returns its reserved
    /// size for a payload of `plain_size` bytes.
    pub(crate) fn plan_cipher(&mut self, id: NodeId, plain_size: usize) -> Result<usize> {
        let Some(encryption) = self.tree.get(id).encryption.clone() else {
            return Ok(plain_size);
        };
        let key = self.lookup(id, &encryption.key)?;
        if !matches!(self.tree.get(key).kind, Kind::AesKey(_)) {
            return Err(Error::schema(format!(
                "encryption key {} is not an <aes_key>",
                self.tree.path_of(key)
            )));
        }

        if !self.is_enabled(key)? {
            log::warn!(
                "{}: key {} is disabled, leaving the payload unencrypted",
                self.tree.path_of(id),
                self.tree.path_of(key)
            );
            self.tree.get_mut(id).cipher = Some(Cipher {
                key,
                mode: encryption.mode,
                iv: vec![0; IV_LEN],
                active: false,
                plain_size,
            });
            return Ok(plain_size);
        }

        let iv = match &encryption.iv {
            Some(text) => match parse_hex_bytes(text) {
                Ok(bytes) => bytes,
                Err(_) => self.eval(id, text)?.as_bytes(),
            },
            None => match &self.options.offline {
                Some(profile) if profile.mode == OfflineMode::Load => {
                    let path = profile.file(&self.tree.path_of(id), "iv");
                    fs::read(&path).map_err(|e| Error::io(&path, "reading", e))?
                }
                _ => {
                    let mut iv = vec![0; IV_LEN];
                    rand::thread_rng().fill_bytes(&mut iv);
                    iv
                }
            },
        };
        if iv.len() != IV_LEN {
            return Err(Error::crypto(format!(
                "IV of {} bytes; expected {IV_LEN}",
                iv.len()
            )));
        }

        let size = encryption
            .mode
            .encrypted_len(plain_size)
            .map_err(Error::layout)?;
        self.tree.get_mut(id).cipher = Some(Cipher {
            key,
            mode: encryption.mode,
            iv,
            active: true,
            plain_size,
        });
        Ok(size)
    }

    /// Turns the plaintext image of `id` into its final image.
    pub(crate) fn apply_cipher(&mut self, id: NodeId, plain: Vec<u8>) -> Result<Vec<u8>> {
        let Some(cipher) = self.tree.get(id).cipher.clone() else {
            return Ok(plain);
        };
        if !cipher.active {
            return Ok(plain);
        }
        let size = self.tree.get(id).size;
        let path = self.tree.path_of(id);

        match self.options.offline.clone() {
            Some(profile) if profile.mode == OfflineMode::Save => {
                let plain_path = profile.file(&path, "plain");
                let iv_path = profile.file(&path, "iv");
                fs::create_dir_all(&profile.dir)
                    .map_err(|e| Error::io(&profile.dir, "creating", e))?;
                fs::write(&plain_path, &plain).map_err(|e| Error::io(&plain_path, "writing", e))?;
                fs::write(&iv_path, &cipher.iv).map_err(|e| Error::io(&iv_path, "writing", e))?;
                log::debug!("{path}: saved plaintext to {}", plain_path.display());
                let mut image = plain;
                image.resize(size, PAD_BYTE);
                Ok(image)
            }
            Some(profile) => {
                let enc_path = profile.file(&path, "enc");
                let image = fs::read(&enc_path).map_err(|e| Error::io(&enc_path, "reading", e))?;
                if image.len() != size {
                    return Err(Error::crypto(format!(
                        "{} holds {} bytes; {size} are reserved",
                        enc_path.display(),
                        image.len()
                    )));
                }
                log::debug!("{path}: loaded ciphertext from {}", enc_path.display());
                Ok(image)
            }
            None => {
                let key = self.value_of(cipher.key)?.as_bytes();
                let image = symmetric::encrypt(&key, &cipher.iv, cipher.mode, &plain)
                    .map_err(Error::crypto)?;
                log::trace!("{path}: encrypted {} bytes", plain.len());
                Ok(image)
            }
        }
    }
}
