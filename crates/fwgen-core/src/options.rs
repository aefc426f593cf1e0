//! Build configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::crypto::signer::DEFAULT_TIMEOUT;
use crate::error::{Error, Result};

/// Options for one image build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Base for relative paths in the schema (files, keys, signatures).
    pub base_dir: PathBuf,
    /// Buffer capacity; overrides the root element's `size`.
    pub capacity: Option<usize>,
    /// Offline encryption store, if encryption is precomputed.
    pub offline: Option<OfflineProfile>,
    /// Default timeout for external signing tools.
    pub signer_timeout: Duration,
    /// `PATH=VALUE` settings applied after construction, in order.
    pub overrides: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            capacity: None,
            offline: None,
            signer_timeout: DEFAULT_TIMEOUT,
            overrides: Vec::new(),
        }
    }
}

impl BuildOptions {
    /// Resolves a schema path against [`BuildOptions::base_dir`].
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Phase of the offline encryption workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfflineMode {
    /// Persist plaintext and IV for encryption elsewhere.
    Save,
    /// Load previously produced ciphertext.
    Load,
}

impl OfflineMode {
    /// Parses `save` or `load`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "save" => Some(Self::Save),
            "load" => Some(Self::Load),
            _ => None,
        }
    }
}

/// Location and phase of the offline encryption store.
#[derive(Debug, Clone)]
pub struct OfflineProfile {
    /// Directory holding the per-component files.
    pub dir: PathBuf,
    /// Save or load.
    pub mode: OfflineMode,
}

impl OfflineProfile {
    /// File for a component, e.g. `layout.body.enc.bin` for `/layout/body`.
    pub fn file(&self, component_path: &str, suffix: &str) -> PathBuf {
        let stem = component_path.trim_start_matches('/').replace('/', ".");
        self.dir.join(format!("{stem}.{suffix}.bin"))
    }
}

/// Splits a `PATH=VALUE` override.
///
/// Paths are absolute; a missing leading `/` is implied.
pub fn parse_override(text: &str) -> Result<(String, String)> {
    let (path, value) = text
        .split_once('=')
        .ok_or_else(|| Error::value(format!("override '{text}' is not PATH=VALUE")))?;
    let path = path.trim();
    if path.is_empty() || path == "/" {
        return Err(Error::value(format!("override '{text}' has no path")));
    }
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Ok((path, value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_paths_are_absolute() {
        assert_eq!(
            parse_override("settings/version=3").unwrap(),
            ("/settings/version".to_string(), "3".to_string())
        );
        assert_eq!(
            parse_override("/layout/name = boot").unwrap(),
            ("/layout/name".to_string(), "boot".to_string())
        );
        assert!(parse_override("novalue").is_err());
        assert!(parse_override("=1").is_err());
    }

    #[test]
    fn offline_file_names_follow_component_path() {
        let profile = OfflineProfile {
            dir: PathBuf::from("store"),
            mode: OfflineMode::Save,
        };
        assert_eq!(
            profile.file("/layout/body", "iv"),
            PathBuf::from("store/layout.body.iv.bin")
        );
        assert_eq!(OfflineMode::parse("LOAD"), Some(OfflineMode::Load));
    }
}
