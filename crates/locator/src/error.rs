//! Error types for repository resolution.

use std::fmt;

use thiserror::Error;

/// Result type for locator operations.
pub type Result<T> = std::result::Result<T, LocateError>;

/// Why a repository reference could not be resolved.
///
/// Errors are `Clone` because the caching locator hands one resolution
/// outcome to every caller that waited on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("invalid repository reference: {0:?}")]
    InvalidReference(String),

    #[error("repository not found: {0}")]
    NotFound(String),

    /// Network or transport failure. Worth retrying.
    #[error("remote unavailable: {url}: {reason}")]
    RemoteUnavailable { url: String, reason: String },

    /// The remote refused the credentials. Retrying with the same
    /// credentials will not help.
    #[error("authentication rejected by {url}: {reason}")]
    AuthenticationRejected { url: String, reason: String },

    #[error("resolution of {0} was cancelled")]
    Cancelled(String),

    /// The thread resolving this key panicked before producing a result.
    #[error("resolution of {0} was interrupted")]
    Interrupted(String),

    #[error("clone directory unusable: {0}")]
    CloneDir(String),

    #[error("could not resolve {key}: {}", Attempts(.attempts))]
    Exhausted { key: String, attempts: Vec<Attempt> },
}

/// One backend's failure inside [`LocateError::Exhausted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub backend: &'static str,
    pub error: LocateError,
}

struct Attempts<'a>(&'a [Attempt]);

impl fmt::Display for Attempts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no locators configured");
        }
        for (i, attempt) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", attempt.backend, attempt.error)?;
        }
        Ok(())
    }
}

impl LocateError {
    /// Whether trying again later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LocateError::RemoteUnavailable { .. }
            | LocateError::Cancelled(_)
            | LocateError::Interrupted(_) => true,
            LocateError::Exhausted { attempts, .. } => {
                attempts.iter().any(|a| a.error.is_retryable())
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LocateError::Cancelled(_))
    }

    pub(crate) fn clone_dir(path: &std::path::Path, err: std::io::Error) -> Self {
        LocateError::CloneDir(format!("{}: {}", path.display(), err))
    }
}
