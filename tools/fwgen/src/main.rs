//! Firmware image generator.
//!
//! Reads an XML schema, applies overrides from `fwgen.toml` and `--set`,
//! lays the image out and writes the bytes, plus optional JSON maps.
//!
//! Pipeline: load project file → construct components → apply overrides →
//!           layout → dependency pass → build → write output.

mod cli;
mod config;
mod verbose;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use fwgen_core::{BuildOptions, Generator};

use crate::config::Project;
use crate::verbose::{Timer, dprintln, vprintln};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    verbose::init(cli.quiet, cli.verbose);
    let project = Project::load(cli.config.as_deref())?;

    match cli.command {
        cli::Command::Build(ref args) => cmd_build(&project, args),
        cli::Command::Check(ref args) => cmd_check(&project, args),
    }
}

// ===========================================================================
// Commands
// ===========================================================================

/// Build the image and write it with its optional maps.
fn cmd_build(project: &Project, args: &cli::BuildArgs) -> Result<()> {
    let options = project.options(
        &args.schema,
        args.offline_dir.as_deref(),
        args.offline_mode.as_deref(),
    )?;
    let schema = &args.schema.schema;
    dprintln!("Building {}...", schema.display());

    let mut generator = load(schema, options)?;
    let image = {
        let _t = Timer::start("build");
        generator
            .build()
            .with_context(|| format!("building {}", schema.display()))?
    };

    write_atomic(&args.output, &image)?;
    if let Some(path) = &args.map {
        write_json(path, &generator.map(false))?;
        vprintln!("  map: {}", path.display());
    }
    if let Some(path) = &args.info {
        write_json(path, &generator.map(true))?;
        vprintln!("  info: {}", path.display());
    }

    dprintln!("  Wrote {} bytes to {}", image.len(), args.output.display());
    Ok(())
}

/// Lay the schema out and print every placed component.
fn cmd_check(project: &Project, args: &cli::CheckArgs) -> Result<()> {
    let options = project.options(&args.schema, None, None)?;
    let schema = &args.schema.schema;
    dprintln!("Checking {}...", schema.display());

    let mut generator = load(schema, options)?;
    {
        let _t = Timer::start("layout");
        generator
            .layout()
            .with_context(|| format!("laying out {}", schema.display()))?;
    }

    let placements = generator.placements();
    let end = placements.iter().map(|p| p.offset + p.size).max().unwrap_or(0);
    for p in &placements {
        dprintln!("  {:#010x} {:>8}  {:<10} {}", p.offset, p.size, p.tag, p.path);
    }
    dprintln!("  {} components, {end} bytes", placements.len());
    Ok(())
}

// ===========================================================================
// Helpers
// ===========================================================================

fn load(schema: &Path, options: BuildOptions) -> Result<Generator> {
    vprintln!("  base directory: {}", options.base_dir.display());
    for text in &options.overrides {
        vprintln!("  set {text}");
    }
    let _t = Timer::start("construct");
    Generator::from_file(schema, options).with_context(|| format!("loading {}", schema.display()))
}

/// Write to a sibling temporary file, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", Path::new(&tmp).display()))?;
    fs::rename(&tmp, path).with_context(|| format!("writing {}", path.display()))
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing layout map")?;
    write_atomic(path, text.as_bytes())
}
