//! Command-line interface definitions for fwgen.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Firmware image generator.
#[derive(Parser)]
#[command(name = "fwgen", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Project file (defaults to `fwgen.toml` in the current directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Show only errors.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Show pass progress, timings and library diagnostics.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Build an image from a schema.
    Build(BuildArgs),
    /// Parse a schema and run the layout pass without building.
    Check(CheckArgs),
}

/// Options shared by every command that loads a schema.
#[derive(Args)]
pub struct SchemaArgs {
    /// XML schema describing the image.
    #[arg(long, short = 's')]
    pub schema: PathBuf,

    /// Set a component value before layout (`PATH=VALUE`, repeatable).
    #[arg(long = "set", value_name = "PATH=VALUE")]
    pub overrides: Vec<String>,

    /// Buffer capacity in bytes (overrides the schema and project file).
    #[arg(long, value_parser = parse_size)]
    pub capacity: Option<usize>,
}

/// Arguments for the `build` subcommand.
#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,

    /// Where to write the image.
    #[arg(long, short = 'o')]
    pub output: PathBuf,

    /// Write a JSON layout map (offsets and sizes).
    #[arg(long)]
    pub map: Option<PathBuf>,

    /// Write a JSON layout map including every built value.
    #[arg(long)]
    pub info: Option<PathBuf>,

    /// Directory for offline encryption files.
    #[arg(long, requires = "offline_mode")]
    pub offline_dir: Option<PathBuf>,

    /// Offline encryption phase: `save` or `load`.
    #[arg(long, requires = "offline_dir")]
    pub offline_mode: Option<String>,
}

/// Arguments for the `check` subcommand.
#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
}

/// Accepts decimal or `0x` hexadecimal sizes.
fn parse_size(text: &str) -> Result<usize, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| format!("'{text}' is not a byte count"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sizes_accept_hex() {
        assert_eq!(parse_size("0x100"), Ok(256));
        assert_eq!(parse_size("64"), Ok(64));
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn overrides_repeat() {
        let cli = Cli::parse_from([
            "fwgen", "-v", "build", "-s", "img.xml", "-o", "img.bin", "--set", "a=1", "--set",
            "/b/c=0x2",
        ]);
        let Command::Build(args) = cli.command else { panic!("expected build") };
        assert_eq!(args.schema.overrides, ["a=1", "/b/c=0x2"]);
        assert!(cli.verbose);
    }
}
