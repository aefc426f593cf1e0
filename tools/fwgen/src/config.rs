//! Project file (`fwgen.toml`) and resolution of build options.
//!
//! Values come from the project file first and are then overridden by
//! command-line flags. `--set` overrides are appended after the file's.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use fwgen_core::{BuildOptions, OfflineMode, OfflineProfile};
use serde::Deserialize;

use crate::cli::SchemaArgs;

/// Name looked up in the current directory when `--config` is absent.
pub const DEFAULT_CONFIG: &str = "fwgen.toml";

/// Parsed `fwgen.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub build: BuildSection,
    pub offline: Option<OfflineSection>,
    #[serde(default)]
    pub settings: SettingsSection,
}

/// `[build]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    pub capacity: Option<usize>,
    pub signer_timeout_secs: Option<u64>,
    /// Relative to the project file.
    pub base_dir: Option<PathBuf>,
}

/// `[offline]` table.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OfflineSection {
    /// Relative to the project file.
    pub dir: PathBuf,
    pub mode: OfflineMode,
}

/// `[settings]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsSection {
    #[serde(default)]
    pub overrides: Vec<String>,
}

/// A project file and the directory its relative paths are based on.
#[derive(Debug, Default)]
pub struct Project {
    pub config: ProjectConfig,
    pub dir: Option<PathBuf>,
}

impl Project {
    /// Loads `explicit`, or `fwgen.toml` from the current directory if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG);
                if !default.is_file() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = parse(&text).with_context(|| format!("parsing {}", path.display()))?;
        let dir = path
            .parent()
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
            .map(Path::to_path_buf);
        Ok(Self { config, dir })
    }

    fn relative(&self, path: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Merges the project file with command-line flags.
    ///
    /// Without a configured base directory, schema paths resolve against the
    /// schema file's own directory.
    pub fn options(
        &self,
        args: &SchemaArgs,
        offline_dir: Option<&Path>,
        offline_mode: Option<&str>,
    ) -> Result<BuildOptions> {
        let build = &self.config.build;
        let base_dir = match &build.base_dir {
            Some(dir) => self.relative(dir),
            None => args
                .schema
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        };

        let offline = match (offline_dir, offline_mode) {
            (Some(dir), Some(mode)) => {
                let Some(mode) = OfflineMode::parse(mode) else {
                    bail!("--offline-mode must be 'save' or 'load', got '{mode}'");
                };
                Some(OfflineProfile {
                    dir: dir.to_path_buf(),
                    mode,
                })
            }
            (None, None) => self.config.offline.as_ref().map(|section| OfflineProfile {
                dir: self.relative(&section.dir),
                mode: section.mode,
            }),
            _ => bail!("--offline-dir and --offline-mode must be given together"),
        };

        let mut overrides = self.config.settings.overrides.clone();
        overrides.extend(args.overrides.iter().cloned());

        let defaults = BuildOptions::default();
        Ok(BuildOptions {
            base_dir,
            capacity: args.capacity.or(build.capacity),
            offline,
            signer_timeout: build
                .signer_timeout_secs
                .map_or(defaults.signer_timeout, Duration::from_secs),
            overrides,
        })
    }
}

fn parse(text: &str) -> Result<ProjectConfig> {
    Ok(toml::from_str(text)?)
}
