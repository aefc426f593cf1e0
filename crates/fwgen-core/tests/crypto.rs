//! Signing, verification and encryption through the full build.

use std::fs;
use std::path::Path;

use fwgen_core::crypto::symmetric;
use fwgen_core::crypto::{AesMode, HashAlgorithm, KeyMaterial, RsaPadding};
use fwgen_core::{BuildOptions, ErrorKind, Generator, OfflineMode, OfflineProfile};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};

const AES_KEY: &str = "000102030405060708090a0b0c0d0e0f";
const ZERO_IV: [u8; 16] = [0; 16];

fn options(dir: &Path) -> BuildOptions {
    BuildOptions {
        base_dir: dir.to_path_buf(),
        ..BuildOptions::default()
    }
}

/// Writes a fresh 1024-bit RSA key as PKCS#8 PEM and returns it.
fn write_rsa_key(dir: &Path) -> KeyMaterial {
    let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
    fs::write(dir.join("key.pem"), pem.as_bytes()).unwrap();
    KeyMaterial::parse(pem.as_bytes()).unwrap()
}

fn encrypted_schema(mode: &str, payload: &str) -> String {
    format!(
        r#"<binary size="64">
             <settings><aes_key name="k" value="{AES_KEY}"/></settings>
             <layout>
               <bytes name="payload" encrypt="/settings/k" encryption_mode="{mode}"
                      iv="00000000000000000000000000000000">
                 <bytes name="data" value="{payload}"/>
               </bytes>
               <number name="size" size="1" calculate="/layout/payload.size"/>
             </layout>
           </binary>"#
    )
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

#[test]
fn cbc_pads_to_whole_blocks() {
    let schema = encrypted_schema("cbc", "01020304050607080910");
    let image = Generator::from_str(&schema, BuildOptions::default())
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(image.len(), 17);
    assert_eq!(image[16], 16);

    let key = hex::decode(AES_KEY).unwrap();
    let plain = symmetric::decrypt(&key, &ZERO_IV, AesMode::Cbc, &image[..16]).unwrap();
    assert_eq!(plain, hex::decode("01020304050607080910").unwrap());
}

#[test]
fn aes_keys_report_their_size_in_bits() {
    let schema = format!(
        r#"<binary size="8">
             <settings><aes_key name="k" value="{AES_KEY}{AES_KEY}"/></settings>
             <layout><number name="bits" size="2" calculate="/settings/k.key_size"/></layout>
           </binary>"#
    );
    let image = Generator::from_str(&schema, BuildOptions::default())
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(image, [0x00, 0x01]);
}

#[test]
fn unpadded_cbc_needs_aligned_payloads() {
    let schema = encrypted_schema("cbc-nopad", "01020304050607080910");
    let err = Generator::from_str(&schema, BuildOptions::default())
        .and_then(|mut generator| generator.build())
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Layout(_)), "{err}");
    assert_eq!(err.component_path(), "/layout/payload");
}

#[test]
fn ctr_keeps_the_payload_length() {
    let schema = encrypted_schema("ctr", "AABBCC");
    let image = Generator::from_str(&schema, BuildOptions::default())
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(image.len(), 4);
    let key = hex::decode(AES_KEY).unwrap();
    let plain = symmetric::decrypt(&key, &ZERO_IV, AesMode::Ctr, &image[..3]).unwrap();
    assert_eq!(plain, [0xAA, 0xBB, 0xCC]);
}

#[test]
fn offline_encryption_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("offline");
    let schema = encrypted_schema("cbc", "0102030405");

    let save = BuildOptions {
        offline: Some(OfflineProfile {
            dir: store.clone(),
            mode: OfflineMode::Save,
        }),
        ..BuildOptions::default()
    };
    let staged = Generator::from_str(&schema, save).unwrap().build().unwrap();
    assert_eq!(&staged[..5], &[1, 2, 3, 4, 5]);
    assert_eq!(staged.len(), 17);

    let plain = fs::read(store.join("layout.payload.plain.bin")).unwrap();
    let iv = fs::read(store.join("layout.payload.iv.bin")).unwrap();
    assert_eq!(plain, [1, 2, 3, 4, 5]);
    assert_eq!(iv, ZERO_IV);

    // Encrypt out of band with a different key, as a signing server would.
    let remote_key = [0x42u8; 16];
    let cipher = symmetric::encrypt(&remote_key, &iv, AesMode::Cbc, &plain).unwrap();
    fs::write(store.join("layout.payload.enc.bin"), &cipher).unwrap();

    let load = BuildOptions {
        offline: Some(OfflineProfile {
            dir: store,
            mode: OfflineMode::Load,
        }),
        ..BuildOptions::default()
    };
    let image = Generator::from_str(&schema, load).unwrap().build().unwrap();
    assert_eq!(&image[..16], cipher.as_slice());
    assert_eq!(image[16], 16);
}

#[test]
fn disabled_key_leaves_payload_plain() {
    let schema = r#"<binary size="64">
         <settings><aes_key name="k" value="000102030405060708090a0b0c0d0e0f" enabled="0"/></settings>
         <layout>
           <bytes name="payload" encrypt="/settings/k" encryption_mode="cbc">
             <bytes name="data" value="0102"/>
           </bytes>
         </layout>
       </binary>"#;
    let image = Generator::from_str(schema, BuildOptions::default())
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(image, [1, 2]);
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

#[test]
fn local_signature_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let key = write_rsa_key(dir.path());
    let schema = r#"<binary size="512">
         <settings><key name="k" path="key.pem" hash="sha256"/></settings>
         <layout>
           <string name="body" value="firmware"/>
           <sign name="sig" key="/settings/k" input="/layout/body"/>
           <verify name="check" key="/settings/k" signature="/layout/sig" input="/layout/body"/>
           <verify name="by_parts" modulus="/settings/k.modulus" exponent="/settings/k.exponent"
                   key_size="1024" signature="/layout/sig" input="/layout/body"/>
         </layout>
       </binary>"#;
    let image = Generator::from_str(schema, options(dir.path()))
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(image.len(), 8 + 128);

    let digest = HashAlgorithm::Sha256.digest(b"firmware");
    assert_eq!(
        key.public().verify(HashAlgorithm::Sha256, &digest, &image[8..]),
        Ok("pkcs1")
    );
}

#[test]
fn tampered_signature_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    let key = write_rsa_key(dir.path());
    let digest = HashAlgorithm::Sha256.digest(b"firmware");
    let mut signature = key.sign(HashAlgorithm::Sha256, RsaPadding::Pkcs1, &digest).unwrap();
    signature[7] ^= 0x01;

    let schema = format!(
        r#"<binary size="512">
             <settings>
               <key name="k" path="key.pem"/>
               <bytes name="sig" value="{}"/>
             </settings>
             <layout>
               <string name="body" value="firmware"/>
               <verify name="check" key="/settings/k" signature="/settings/sig" input="/layout/body"/>
             </layout>
           </binary>"#,
        hex::encode(&signature)
    );
    let err = Generator::from_str(&schema, options(dir.path()))
        .and_then(|mut generator| generator.build())
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Crypto(_)), "{err}");
    assert_eq!(err.component_path(), "/layout/check");
}

#[test]
fn offline_signature_is_checked_against_the_key() {
    let dir = tempfile::tempdir().unwrap();
    let key = write_rsa_key(dir.path());
    let digest = HashAlgorithm::Sha256.digest(b"fw");
    let signature = key.sign(HashAlgorithm::Sha256, RsaPadding::Pkcs1, &digest).unwrap();
    fs::write(dir.path().join("fw.sig"), &signature).unwrap();

    let schema = r#"<binary size="512">
         <settings><key name="k" path="key.pem"/></settings>
         <layout>
           <string name="body" value="fw"/>
           <sign name="sig" key="/settings/k" input="/layout/body" strategy="offline" signature_path="fw.sig"/>
         </layout>
       </binary>"#;
    let image = Generator::from_str(schema, options(dir.path()))
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(&image[2..], signature.as_slice());

    fs::write(dir.path().join("fw.sig"), vec![0u8; signature.len()]).unwrap();
    let err = Generator::from_str(schema, options(dir.path()))
        .and_then(|mut generator| generator.build())
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Crypto(_)), "{err}");
}

#[cfg(unix)]
#[test]
fn external_signer_contract() {
    let dir = tempfile::tempdir().unwrap();
    let key = write_rsa_key(dir.path());
    let digest = HashAlgorithm::Sha256.digest(b"payload");
    let signature = key.sign(HashAlgorithm::Sha256, RsaPadding::Pkcs1, &digest).unwrap();
    fs::write(dir.path().join("ready.sig"), &signature).unwrap();

    // Arguments: <hash> <key> <output> <input>.
    let script = dir.path().join("sign.sh");
    fs::write(
        &script,
        format!(
            "[ \"$1\" = sha256 ] || exit 3\ncmp -s \"$4\" /dev/null && exit 4\ncp {} \"$3\"\n",
            dir.path().join("ready.sig").display()
        ),
    )
    .unwrap();

    let schema = format!(
        r#"<binary size="512">
             <settings><key name="k" path="key.pem"/></settings>
             <layout>
               <string name="body" value="payload"/>
               <sign name="sig" key="/settings/k" input="/layout/body" strategy="external"
                     tool="sh {}" timeout="10"/>
             </layout>
           </binary>"#,
        script.display()
    );
    let image = Generator::from_str(&schema, options(dir.path()))
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(&image[7..], signature.as_slice());
}
