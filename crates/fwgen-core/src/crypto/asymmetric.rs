//! RSA and P-256 key material: loading, signing and verification.

use std::fmt;

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as EcSignature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};

use super::hash::HashAlgorithm;

/// Length of a raw P-256 `r || s` signature.
pub const EC_SIGNATURE_LEN: usize = 64;

/// RSA signature padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RsaPadding {
    /// PKCS#1 v1.5.
    #[default]
    Pkcs1,
    /// PSS; `None` uses the digest length as salt length.
    Pss {
        /// Salt length in bytes.
        salt_len: Option<usize>,
    },
}

impl RsaPadding {
    /// Parses `pkcs1` or `pss`.
    pub fn parse(name: &str, salt_len: Option<usize>) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "pkcs1" | "pkcs1v15" => Some(Self::Pkcs1),
            "pss" => Some(Self::Pss { salt_len }),
            _ => None,
        }
    }
}

/// Runs `$body` with `$digest` bound to the hash type of `$alg`.
macro_rules! with_digest {
    ($alg:expr, $digest:ident => $body:expr) => {
        match $alg {
            HashAlgorithm::Sha1 => {
                type $digest = sha1::Sha1;
                $body
            }
            HashAlgorithm::Sha224 => {
                type $digest = sha2::Sha224;
                $body
            }
            HashAlgorithm::Sha256 => {
                type $digest = sha2::Sha256;
                $body
            }
            HashAlgorithm::Sha384 => {
                type $digest = sha2::Sha384;
                $body
            }
            HashAlgorithm::Sha512 => {
                type $digest = sha2::Sha512;
                $body
            }
        }
    };
}

/// A loaded asymmetric key.
#[derive(Clone)]
pub enum KeyMaterial {
    /// RSA private key (public part derivable).
    RsaPrivate(RsaPrivateKey),
    /// RSA public key.
    RsaPublic(RsaPublicKey),
    /// P-256 private key.
    EcPrivate(SigningKey),
    /// P-256 public key.
    EcPublic(VerifyingKey),
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsaPrivate(k) => write!(f, "RsaPrivate({} bits)", k.n().bits()),
            Self::RsaPublic(k) => write!(f, "RsaPublic({} bits)", k.n().bits()),
            Self::EcPrivate(_) => f.write_str("EcPrivate(P-256)"),
            Self::EcPublic(_) => f.write_str("EcPublic(P-256)"),
        }
    }
}

impl KeyMaterial {
    /// Parses a PEM or DER encoded key.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        match std::str::from_utf8(bytes) {
            Ok(text) if text.trim_start().starts_with("-----BEGIN ") => Self::from_pem(text),
            _ => Self::from_der(bytes),
        }
    }

    /// Parses a PEM block, dispatching on its label.
    pub fn from_pem(text: &str) -> Result<Self, String> {
        let label = text
            .lines()
            .find_map(|line| line.trim().strip_prefix("-----BEGIN ")?.strip_suffix("-----"))
            .ok_or_else(|| "missing PEM header".to_string())?;
        let parsed = match label {
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_pem(text).ok().map(Self::RsaPrivate),
            "RSA PUBLIC KEY" => RsaPublicKey::from_pkcs1_pem(text).ok().map(Self::RsaPublic),
            "EC PRIVATE KEY" => p256::SecretKey::from_sec1_pem(text)
                .ok()
                .map(|k| Self::EcPrivate(SigningKey::from(&k))),
            "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_pem(text)
                .ok()
                .map(Self::RsaPrivate)
                .or_else(|| {
                    p256::SecretKey::from_pkcs8_pem(text)
                        .ok()
                        .map(|k| Self::EcPrivate(SigningKey::from(&k)))
                }),
            "PUBLIC KEY" => RsaPublicKey::from_public_key_pem(text)
                .ok()
                .map(Self::RsaPublic)
                .or_else(|| {
                    p256::PublicKey::from_public_key_pem(text)
                        .ok()
                        .map(|k| Self::EcPublic(VerifyingKey::from(&k)))
                }),
            other => return Err(format!("unsupported PEM block '{other}'")),
        };
        parsed.ok_or_else(|| format!("cannot decode PEM block '{label}' as an RSA or P-256 key"))
    }

    /// Parses a DER key, trying private encodings before public ones.
    pub fn from_der(der: &[u8]) -> Result<Self, String> {
        RsaPrivateKey::from_pkcs1_der(der)
            .ok()
            .map(Self::RsaPrivate)
            .or_else(|| RsaPrivateKey::from_pkcs8_der(der).ok().map(Self::RsaPrivate))
            .or_else(|| {
                p256::SecretKey::from_pkcs8_der(der)
                    .ok()
                    .map(|k| Self::EcPrivate(SigningKey::from(&k)))
            })
            .or_else(|| {
                p256::SecretKey::from_sec1_der(der)
                    .ok()
                    .map(|k| Self::EcPrivate(SigningKey::from(&k)))
            })
            .or_else(|| RsaPublicKey::from_pkcs1_der(der).ok().map(Self::RsaPublic))
            .or_else(|| RsaPublicKey::from_public_key_der(der).ok().map(Self::RsaPublic))
            .or_else(|| {
                p256::PublicKey::from_public_key_der(der)
                    .ok()
                    .map(|k| Self::EcPublic(VerifyingKey::from(&k)))
            })
            .ok_or_else(|| "unrecognised key encoding".to_string())
    }

    /// Builds an RSA public key from big-endian modulus and exponent bytes.
    pub fn rsa_from_components(modulus: &[u8], exponent: &[u8]) -> Result<Self, String> {
        RsaPublicKey::new(BigUint::from_bytes_be(modulus), BigUint::from_bytes_be(exponent))
            .map(Self::RsaPublic)
            .map_err(|e| format!("invalid RSA public key: {e}"))
    }

    /// Returns `true` if the key can sign.
    pub fn is_private(&self) -> bool {
        matches!(self, Self::RsaPrivate(_) | Self::EcPrivate(_))
    }

    /// The public half of this key.
    pub fn public(&self) -> Self {
        match self {
            Self::RsaPrivate(k) => Self::RsaPublic(k.to_public_key()),
            Self::EcPrivate(k) => Self::EcPublic(*k.verifying_key()),
            other => other.clone(),
        }
    }

    fn rsa_public(&self) -> Option<RsaPublicKey> {
        match self {
            Self::RsaPrivate(k) => Some(k.to_public_key()),
            Self::RsaPublic(k) => Some(k.clone()),
            _ => None,
        }
    }

    fn ec_public(&self) -> Option<VerifyingKey> {
        match self {
            Self::EcPrivate(k) => Some(*k.verifying_key()),
            Self::EcPublic(k) => Some(*k),
            _ => None,
        }
    }

    /// Length of a signature produced with this key.
    pub fn signature_len(&self) -> usize {
        match self.rsa_public() {
            Some(k) => k.size(),
            None => EC_SIGNATURE_LEN,
        }
    }

    /// Key size in bits.
    pub fn key_bits(&self) -> usize {
        match self.rsa_public() {
            Some(k) => k.n().bits(),
            None => 256,
        }
    }

    /// RSA modulus, big-endian.
    pub fn modulus(&self) -> Option<Vec<u8>> {
        self.rsa_public().map(|k| k.n().to_bytes_be())
    }

    /// RSA public exponent, big-endian.
    pub fn exponent(&self) -> Option<Vec<u8>> {
        self.rsa_public().map(|k| k.e().to_bytes_be())
    }

    /// EC public point X coordinate.
    pub fn x(&self) -> Option<Vec<u8>> {
        let point = self.ec_public()?.to_encoded_point(false);
        point.x().map(|x| x.to_vec())
    }

    /// EC public point Y coordinate.
    pub fn y(&self) -> Option<Vec<u8>> {
        let point = self.ec_public()?.to_encoded_point(false);
        point.y().map(|y| y.to_vec())
    }

    /// Signs a precomputed `digest`.
    ///
    /// EC signatures are returned as raw `r || s`.
    pub fn sign(
        &self,
        algorithm: HashAlgorithm,
        padding: RsaPadding,
        digest: &[u8],
    ) -> Result<Vec<u8>, String> {
        match self {
            Self::RsaPrivate(key) => {
                let signed = match padding {
                    RsaPadding::Pkcs1 => {
                        with_digest!(algorithm, D => key.sign(Pkcs1v15Sign::new::<D>(), digest))
                    }
                    RsaPadding::Pss { salt_len } => {
                        let salt = salt_len.unwrap_or(algorithm.digest_len());
                        let mut rng = rand::thread_rng();
                        with_digest!(algorithm, D => key.sign_with_rng(
                            &mut rng,
                            Pss::new_with_salt::<D>(salt),
                            digest,
                        ))
                    }
                };
                signed.map_err(|e| format!("RSA signing failed: {e}"))
            }
            Self::EcPrivate(key) => {
                let signature: EcSignature = key
                    .sign_prehash(digest)
                    .map_err(|e| format!("ECDSA signing failed: {e}"))?;
                Ok(signature.to_bytes().to_vec())
            }
            Self::RsaPublic(_) | Self::EcPublic(_) => {
                Err("key holds no private material".to_string())
            }
        }
    }

    /// Verifies `signature` over `digest`, trying every supported scheme.
    ///
    /// RSA tries PKCS#1 v1.5, then PSS with the salt equal to the digest
    /// length, zero and the maximum. Returns the name of the scheme that
    /// validated.
    pub fn verify(
        &self,
        algorithm: HashAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<&'static str, String> {
        if let Some(key) = self.rsa_public() {
            if with_digest!(algorithm, D => key.verify(Pkcs1v15Sign::new::<D>(), digest, signature)).is_ok() {
                return Ok("pkcs1");
            }
            let hlen = algorithm.digest_len();
            let max_salt = key.size().saturating_sub(hlen + 2);
            for salt in [hlen, 0, max_salt] {
                let ok = with_digest!(algorithm, D => key.verify(
                    Pss::new_with_salt::<D>(salt),
                    digest,
                    signature,
                ))
                .is_ok();
                if ok {
                    return Ok("pss");
                }
            }
            return Err("signature does not verify under PKCS#1 v1.5 or PSS".to_string());
        }

        let key = self.ec_public().ok_or_else(|| "key cannot verify".to_string())?;
        let parsed = EcSignature::from_slice(signature)
            .or_else(|_| EcSignature::from_der(signature))
            .map_err(|e| format!("malformed ECDSA signature: {e}"))?;
        key.verify_prehash(digest, &parsed)
            .map(|()| "ecdsa")
            .map_err(|_| "ECDSA signature does not verify".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_key() -> KeyMaterial {
        KeyMaterial::RsaPrivate(RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
    }

    #[test]
    fn rsa_pkcs1_round_trip() {
        let key = rsa_key();
        let digest = HashAlgorithm::Sha256.digest(b"firmware");
        let sig = key.sign(HashAlgorithm::Sha256, RsaPadding::Pkcs1, &digest).unwrap();
        assert_eq!(sig.len(), key.signature_len());
        assert_eq!(key.public().verify(HashAlgorithm::Sha256, &digest, &sig), Ok("pkcs1"));

        let mut tampered = sig.clone();
        tampered[5] ^= 0x01;
        assert!(key.public().verify(HashAlgorithm::Sha256, &digest, &tampered).is_err());
    }

    #[test]
    fn rsa_pss_salts_are_all_accepted() {
        let key = rsa_key();
        let digest = HashAlgorithm::Sha1.digest(b"x");
        for salt in [None, Some(0)] {
            let padding = RsaPadding::Pss { salt_len: salt };
            let sig = key.sign(HashAlgorithm::Sha1, padding, &digest).unwrap();
            assert_eq!(key.verify(HashAlgorithm::Sha1, &digest, &sig), Ok("pss"));
        }
    }

    #[test]
    fn ec_round_trip_is_raw_r_s() {
        let secret = p256::SecretKey::random(&mut rand::thread_rng());
        let key = KeyMaterial::EcPrivate(SigningKey::from(&secret));
        let digest = HashAlgorithm::Sha256.digest(b"payload");
        let sig = key.sign(HashAlgorithm::Sha256, RsaPadding::Pkcs1, &digest).unwrap();
        assert_eq!(sig.len(), EC_SIGNATURE_LEN);
        assert_eq!(key.public().verify(HashAlgorithm::Sha256, &digest, &sig), Ok("ecdsa"));
        assert_eq!(key.x().unwrap().len(), 32);
        assert_eq!(key.y().unwrap().len(), 32);
    }

    #[test]
    fn components_rebuild_public_key() {
        let key = rsa_key();
        let rebuilt =
            KeyMaterial::rsa_from_components(&key.modulus().unwrap(), &key.exponent().unwrap())
                .unwrap();
        assert_eq!(rebuilt.key_bits(), 1024);
        assert!(!rebuilt.is_private());
        let digest = HashAlgorithm::Sha256.digest(b"abc");
        assert!(rebuilt.sign(HashAlgorithm::Sha256, RsaPadding::Pkcs1, &digest).is_err());
    }

    #[test]
    fn pem_labels_dispatch() {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

        let KeyMaterial::RsaPrivate(private) = rsa_key() else { unreachable!() };
        let pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
        assert!(KeyMaterial::parse(pem.as_bytes()).unwrap().is_private());
        let public_pem = private.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();
        let public = KeyMaterial::parse(public_pem.as_bytes()).unwrap();
        assert!(matches!(public, KeyMaterial::RsaPublic(_)));
        assert!(KeyMaterial::parse(b"-----BEGIN CERTIFICATE-----\n").is_err());
        assert!(KeyMaterial::parse(&[1, 2, 3]).is_err());
    }
}
