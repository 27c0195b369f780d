use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RerarError>;

#[derive(Error, Debug)]
pub enum RerarError {
    /// Bad signature, block CRC, declared size or block ordering.
    #[error("format error at 0x{offset:X}: {message}")]
    Format { offset: u64, message: String },
    /// File, recovery or volume CRC mismatch.
    #[error("integrity error at 0x{offset:X}: {message}")]
    Integrity { offset: u64, message: String },
    /// Encryption, compression or an unknown dictionary code.
    #[error("unsupported at 0x{offset:X}: {message}")]
    Unsupported { offset: u64, message: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("volume {ordinal}: {source}")]
    Volume {
        ordinal: usize,
        #[source]
        source: io::Error,
    },
    /// The assembler produced something other than what was planned.
    #[error("volume {ordinal}: {message}")]
    Assembly { ordinal: usize, message: String },
    #[error("{}: reference rejected ({} problem(s))", path.display(), diagnostics.len())]
    Rejected {
        path: PathBuf,
        diagnostics: Vec<Diagnostic>,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl RerarError {
    pub fn format(offset: u64, message: impl Into<String>) -> Self {
        Self::Format { offset, message: message.into() }
    }

    pub fn integrity(offset: u64, message: impl Into<String>) -> Self {
        Self::Integrity { offset, message: message.into() }
    }

    pub fn unsupported(offset: u64, message: impl Into<String>) -> Self {
        Self::Unsupported { offset, message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn volume(ordinal: usize) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Volume { ordinal, source }
    }
}

/// Which class of problem a recoverable reference finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    Format,
    Integrity,
}

/// A problem found in a reference volume that does not stop the parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind:    DiagnosticKind,
    /// Byte offset within the reference volume, when one applies.
    pub offset:  Option<u64>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "+0x{offset:X}: {}", self.message),
            None         => write!(f, "{}", self.message),
        }
    }
}
