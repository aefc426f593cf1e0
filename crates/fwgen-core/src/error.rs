//! Error taxonomy for schema parsing, layout, build and crypto failures.
//!
//! Every error carries a trace of component names collected while the error
//! unwinds through the tree, so the final message names the full ancestor
//! path of the component where the failure was detected.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error as ThisError;

use crate::buffer::BufferError;

/// What went wrong, independent of where in the tree it happened.
#[derive(Debug, ThisError)]
pub enum ErrorKind {
    /// Missing mandatory attribute or child, unknown tag data, bad document.
    #[error("schema error: {0}")]
    Schema(String),
    /// A literal or computed value is out of range or otherwise unusable.
    #[error("value error: {0}")]
    Value(String),
    /// A formula could not be parsed or evaluated.
    #[error("formula error in `{formula}`: {message}")]
    Formula {
        /// The formula text as written in the schema.
        formula: String,
        /// What the evaluator rejected.
        message: String,
    },
    /// Layout and build disagree, or a placement request is impossible.
    #[error("layout error: {0}")]
    Layout(String),
    /// A dependency rule is malformed or cannot be applied.
    #[error("dependency error: {0}")]
    Dependency(String),
    /// A file or process operation failed.
    #[error("i/o error: {operation} {}: {source}", .path.display())]
    Io {
        /// The file the operation touched.
        path: PathBuf,
        /// The operation attempted (`reading`, `writing`, `running`, ...).
        operation: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Signing, verification, key parsing or encryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),
    /// A bounds-checked buffer access was rejected.
    #[error("layout error: {0}")]
    Buffer(#[from] BufferError),
}

/// An [`ErrorKind`] plus the component trace it unwound through.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    /// Component names, innermost first.
    trace: Vec<String>,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error category.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the component trace, outermost component first.
    pub fn component_path(&self) -> String {
        let mut path = String::new();
        for name in self.trace.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        path
    }

    /// Returns `true` once a component has been recorded.
    pub(crate) fn has_trace(&self) -> bool {
        !self.trace.is_empty()
    }

    /// Tags the error with the name of an enclosing component.
    #[must_use]
    pub fn in_component(mut self, name: &str) -> Self {
        self.trace.push(name.to_string());
        self
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        ErrorKind::Schema(message.into()).into()
    }

    pub(crate) fn value(message: impl Into<String>) -> Self {
        ErrorKind::Value(message.into()).into()
    }

    pub(crate) fn layout(message: impl Into<String>) -> Self {
        ErrorKind::Layout(message.into()).into()
    }

    pub(crate) fn dependency(message: impl Into<String>) -> Self {
        ErrorKind::Dependency(message.into()).into()
    }

    pub(crate) fn crypto(message: impl Into<String>) -> Self {
        ErrorKind::Crypto(message.into()).into()
    }

    pub(crate) fn formula(formula: &str, message: impl Into<String>) -> Self {
        ErrorKind::Formula {
            formula: formula.to_string(),
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn io(path: &Path, operation: &'static str, source: std::io::Error) -> Self {
        ErrorKind::Io {
            path: path.to_path_buf(),
            operation,
            source,
        }
        .into()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            trace: Vec::new(),
        }
    }
}

impl From<BufferError> for Error {
    fn from(err: BufferError) -> Self {
        ErrorKind::Buffer(err).into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trace.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.component_path(), self.kind)
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_renders_outermost_first() {
        let err = Error::layout("offset 4 is behind cursor 8")
            .in_component("crc")
            .in_component("header")
            .in_component("layout");
        assert_eq!(err.component_path(), "/layout/header/crc");
        assert_eq!(
            err.to_string(),
            "/layout/header/crc: layout error: offset 4 is behind cursor 8"
        );
    }

    #[test]
    fn io_error_names_path_and_operation() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::io(Path::new("keys/aes.bin"), "reading", source);
        let text = err.to_string();
        assert!(text.contains("reading keys/aes.bin"), "got: {text}");
    }
}
