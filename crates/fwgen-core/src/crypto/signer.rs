//! Signatures produced outside the process.
//!
//! An external signing tool is invoked as
//! `<tool> <hash> <key-path> <output-signature-path> <input-data-path>` and
//! must exit zero, leaving a binary signature in the output file. The child is
//! polled until it exits or the timeout elapses, then killed.

use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::hash::HashAlgorithm;
use crate::error::{Error, Result};

/// Default time an external signing tool may run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Where a signature comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignStrategy {
    /// Computed in-process with a private key.
    #[default]
    Local,
    /// Delegated to an external executable.
    External,
    /// Read from a previously produced file and verified.
    Offline,
}

impl SignStrategy {
    /// Parses `local`, `external` or `offline`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "local" | "internal" => Some(Self::Local),
            "external" | "tool" => Some(Self::External),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Runs an external signing tool over `data`.
///
/// `tool` is a command line; words after the first are passed before the
/// contract arguments, so `python3 sign.py` works as well as a bare program.
pub fn sign_with_tool(
    tool: &str,
    algorithm: HashAlgorithm,
    key: &Path,
    data: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut words = tool.split_whitespace();
    let program = words
        .next()
        .ok_or_else(|| Error::schema("external signing tool is empty"))?;
    let program_path = Path::new(program);

    let dir = tempfile::tempdir()
        .map_err(|e| Error::io(&std::env::temp_dir(), "creating temporary directory in", e))?;
    let input = dir.path().join("input.bin");
    let output = dir.path().join("signature.bin");
    fs::write(&input, data).map_err(|e| Error::io(&input, "writing", e))?;

    log::debug!("running signing tool {tool} ({algorithm}, key {})", key.display());
    let mut child = Command::new(program)
        .args(words)
        .arg(algorithm.name())
        .arg(key)
        .arg(&output)
        .arg(&input)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|e| Error::io(program_path, "running", e))?;

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| Error::io(program_path, "waiting for", e))?
        {
            break status;
        }
        if start.elapsed() >= timeout {
            // Already exited or unkillable; the timeout is reported either way.
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::io(
                program_path,
                "running",
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no result after {:.1}s", timeout.as_secs_f64()),
                ),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    };

    if !status.success() {
        return Err(Error::io(
            program_path,
            "running",
            io::Error::other(format!("signing tool {status}")),
        ));
    }

    let signature = fs::read(&output).map_err(|e| Error::io(&output, "reading", e))?;
    if signature.is_empty() {
        return Err(Error::io(
            program_path,
            "running",
            io::Error::other("signing tool produced an empty signature"),
        ));
    }
    Ok(signature)
}

/// Reads a previously produced signature file.
pub fn load_signature(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::io(path, "reading", e))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("sign.sh");
        fs::write(&path, body).unwrap();
        format!("sh {}", path.display())
    }

    #[test]
    fn tool_output_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        // Echo the hash name followed by the input, so argument order is checked.
        let tool = script(dir.path(), "printf '%s:' \"$1\" > \"$3\"; cat \"$4\" >> \"$3\"\n");
        let sig = sign_with_tool(
            &tool,
            HashAlgorithm::Sha384,
            Path::new("key.pem"),
            b"data",
            DEFAULT_TIMEOUT,
        )
        .unwrap();
        assert_eq!(sig, b"sha384:data");
    }

    #[test]
    fn failing_tool_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "exit 3\n");
        let err = sign_with_tool(&tool, HashAlgorithm::Sha256, Path::new("k"), b"", DEFAULT_TIMEOUT)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io { .. }));
    }

    #[test]
    fn slow_tool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "sleep 5\n");
        let start = Instant::now();
        let err = sign_with_tool(
            &tool,
            HashAlgorithm::Sha256,
            Path::new("k"),
            b"",
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(4));
        match err.kind() {
            ErrorKind::Io { source, .. } => assert_eq!(source.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_signature_file() {
        let err = load_signature(Path::new("/nonexistent/sig.bin")).unwrap_err();
        assert!(err.to_string().contains("reading /nonexistent/sig.bin"));
    }
}
