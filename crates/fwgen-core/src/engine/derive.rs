//! Values derived from other components: digests, CRCs, checksums and
//! signatures.

use super::Engine;
use crate::component::{Kind, NodeId, SignSpec, VerifySpec};
use crate::crypto::signer::{load_signature, sign_with_tool};
use crate::crypto::{HashAlgorithm, KeyMaterial, SignStrategy};
use crate::error::{Error, Result};
use crate::value::Value;

impl Engine {
    /// Computes the value of a derived variant.
    pub(crate) fn compute_derived(&mut self, id: NodeId, kind: &Kind) -> Result<()> {
        let value = match kind {
            Kind::Hash(spec) => {
                let data = self.collect_input(id, &spec.input)?;
                let mut digest = spec.algorithm.digest(&data);
                if spec.reverse {
                    digest.reverse();
                }
                log::trace!("{}: {} over {} bytes", self.tree.path_of(id), spec.algorithm, data.len());
                Value::Bytes(digest)
            }
            Kind::Crc(spec) => {
                let data = self.collect_input(id, &spec.input)?;
                Value::Int(i128::from(spec.algorithm.compute(&data)))
            }
            Kind::Checksum(spec) => {
                let data = self.collect_input(id, &spec.input)?;
                let sum = spec.method.compute(&data, self.tree.get(id).length);
                Value::Int(i128::try_from(sum).map_err(|_| Error::value("checksum overflow"))?)
            }
            Kind::Sign(spec) => Value::Bytes(self.sign(id, spec)?),
            Kind::Verify(spec) => {
                self.verify(id, spec)?;
                Value::Bool(true)
            }
            Kind::File(_) => Value::Bytes(self.load_file(id)?),
            Kind::AesKey(_) => Value::Bytes(self.load_aes_key(id)?),
            Kind::TableEntry(_) => {
                self.selected_row(id)?;
                return Ok(());
            }
            _ => return Ok(()),
        };
        self.tree.get_mut(id).value = value;
        Ok(())
    }

    fn sign(&mut self, id: NodeId, spec: &SignSpec) -> Result<Vec<u8>> {
        let data = self.collect_input(id, &spec.input)?;
        let key_id = self.lookup(id, &spec.key)?;
        let key = self.key_material(key_id)?;
        let Kind::Key(key_spec) = &self.tree.get(key_id).kind else {
            return Err(Error::schema("signing key is not a <key>"));
        };
        let key_path = self.options.resolve(&key_spec.path);
        let algorithm = spec.algorithm.unwrap_or(key_spec.hash);
        let digest = algorithm.digest(&data);

        let signature = match spec.strategy {
            SignStrategy::Local => key
                .sign(algorithm, spec.padding, &digest)
                .map_err(Error::crypto)?,
            SignStrategy::External => {
                let tool = spec
                    .tool
                    .as_deref()
                    .ok_or_else(|| Error::schema("external signing requires 'tool'"))?;
                let timeout = spec.timeout.unwrap_or(self.options.signer_timeout);
                let signature = sign_with_tool(tool, algorithm, &key_path, &data, timeout)?;
                check_signature(&key, algorithm, &digest, &signature)?;
                signature
            }
            SignStrategy::Offline => {
                let path = spec
                    .signature_path
                    .as_deref()
                    .ok_or_else(|| Error::schema("offline signing requires 'signature_path'"))?;
                let signature = load_signature(&self.options.resolve(path))?;
                check_signature(&key, algorithm, &digest, &signature)?;
                signature
            }
        };
        log::debug!(
            "{}: {} signature over {} bytes",
            self.tree.path_of(id),
            algorithm,
            data.len()
        );
        Ok(signature)
    }

    fn verify(&mut self, id: NodeId, spec: &VerifySpec) -> Result<()> {
        let data = self.collect_input(id, &spec.input)?;
        let key = match &spec.key {
            Some(path) => {
                let key_id = self.lookup(id, path)?;
                self.key_material(key_id)?.public()
            }
            None => {
                let (Some(modulus), Some(exponent)) = (&spec.modulus, &spec.exponent) else {
                    return Err(Error::schema("verification needs a key or modulus and exponent"));
                };
                let modulus = self.eval(id, modulus)?.as_bytes();
                let exponent = self.eval(id, exponent)?.as_bytes();
                let key = KeyMaterial::rsa_from_components(&modulus, &exponent)
                    .map_err(Error::crypto)?;
                if let Some(formula) = &spec.key_size {
                    let bits = self.eval_usize(id, formula, "key size")?;
                    if bits != key.key_bits() {
                        return Err(Error::crypto(format!(
                            "modulus is {} bits; key size says {bits}",
                            key.key_bits()
                        )));
                    }
                }
                key
            }
        };
        let signature = self.eval(id, &spec.signature)?.as_bytes();
        let digest = spec.algorithm.digest(&data);
        let scheme = key
            .verify(spec.algorithm, &digest, &signature)
            .map_err(|e| Error::crypto(format!("signature does not verify: {e}")))?;
        log::debug!("{}: signature verified ({scheme})", self.tree.path_of(id));
        Ok(())
    }
}

fn check_signature(
    key: &KeyMaterial,
    algorithm: HashAlgorithm,
    digest: &[u8],
    signature: &[u8],
) -> Result<()> {
    key.public()
        .verify(algorithm, digest, signature)
        .map(|_| ())
        .map_err(|e| Error::crypto(format!("signature does not match the key: {e}")))
}
