//! Error types for unitforge
//!
//! One enum per component boundary:
//! - configuration problems detected before any work starts
//! - target resolution failures (per target, never batch-fatal)
//! - coverage record decoding and collection
//! - AI backend and generation failures
//! - toolchain and verification infrastructure failures
//! - batch-level failures

use std::path::PathBuf;
use std::time::Duration;

/// Configuration errors. The only class of error that fails a whole run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for the expected shape
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Project root does not exist or is not a directory
    #[error("project root {0} is not a directory")]
    ProjectRoot(PathBuf),

    /// Backend credentials missing
    #[error("environment variable {0} is not set")]
    MissingCredential(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Target resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// Requested class or method does not exist
    #[error("{kind} `{name}` not found")]
    NotFound { kind: &'static str, name: String },

    /// Name matches more than one unit and no file was given to disambiguate
    #[error("`{name}` is ambiguous: {candidates:?}")]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },

    /// Source file does not parse
    #[error("{0} does not parse cleanly")]
    NotCompilable(PathBuf),

    /// File extension has no grammar
    #[error("unsupported language for {0}")]
    UnsupportedLanguage(PathBuf),

    /// Filesystem failure while reading sources
    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Coverage record decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Input does not start with the record magic
    #[error("not a coverage record (bad magic)")]
    BadMagic,

    /// Record written by an unknown format version
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u16),

    /// Declared block length disagrees with the block's content
    #[error("block at offset {offset} declares {declared} bytes but content needs {actual}")]
    LengthMismatch {
        offset: usize,
        declared: usize,
        actual: usize,
    },

    /// Block kind byte is not known
    #[error("unknown block kind {kind:#04x} at offset {offset}")]
    UnknownBlock { offset: usize, kind: u8 },

    /// A string field is not UTF-8
    #[error("invalid utf-8 string at offset {0}")]
    InvalidUtf8(usize),
}

/// Coverage collection errors
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// Recorder could not be attached or produced nothing
    #[error("instrumentation failure: {0}")]
    InstrumentationFailure(String),

    /// Test process crashed before producing usable data
    #[error("execution failure: {0}")]
    ExecutionFailure(String),

    /// Recorded data is malformed
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Collection was cancelled
    #[error("collection cancelled")]
    Cancelled,
}

/// Errors reported by an AI backend
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Provider throttled the request
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Response could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Network or process transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider rejected the request outright
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl BackendError {
    /// Check if the same request may succeed later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Candidate generation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// Backend did not answer within the caller-supplied timeout
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    /// Backend returned an error
    #[error("generation failed: {message}")]
    Backend { message: String, retryable: bool },

    /// Generation was cancelled
    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Timeouts and transient backend errors are retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Backend { retryable, .. } => *retryable,
            Self::Cancelled => false,
        }
    }
}

impl From<BackendError> for GenerationError {
    fn from(e: BackendError) -> Self {
        Self::Backend {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

/// External compiler/runner failures (not test outcomes)
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// Process could not be started
    #[error("cannot spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on or killing the process failed
    #[error("process i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Run was cancelled; the process has been killed
    #[error("toolchain run cancelled")]
    Cancelled,
}

/// Verification infrastructure failures. Test outcomes are `Diagnostic`s.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Scratch area could not be prepared
    #[error("scratch area: {0}")]
    Scratch(#[source] std::io::Error),

    /// Toolchain failed to run
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// Verification was cancelled
    #[error("verification cancelled")]
    Cancelled,
}

/// Batch-level failures, detected before any target starts
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_rejection_is_not_retryable() {
        let e = BackendError::Rejected {
            status: 401,
            message: "bad key".into(),
        };
        assert!(!e.is_retryable());
        assert!(!GenerationError::from(e).is_retryable());
    }

    #[test]
    fn rate_limit_and_timeout_are_retryable() {
        assert!(GenerationError::from(BackendError::RateLimited("slow down".into())).is_retryable());
        assert!(GenerationError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!GenerationError::Cancelled.is_retryable());
    }
}
