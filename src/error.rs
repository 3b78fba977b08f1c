//! Domain-specific error types for the S3 provisioner.
//!
//! This module defines `ProvisionError`, a `thiserror`-based error that
//! classifies every failure into one of three [`ErrorKind`]s. Public API
//! functions return `Result<T, ProvisionError>` so the host can decide how
//! to present a failure, while collaborator traits (storage, communicator)
//! continue to use `anyhow::Result`.
//!
//! All kinds are terminal for the current build step. `Temporary` only
//! signals to the operator that re-running the build may succeed; nothing
//! in this crate retries.

use std::error::Error as StdError;

use strum::Display;

/// Boxed underlying cause carried by a [`ProvisionError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Classification of a provisioning failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed configuration, detected before any network action.
    InvalidArgument,
    /// The storage session could not be established.
    AuthRequired,
    /// Fetching the object or uploading it failed (includes timeouts).
    Temporary,
}

/// Error returned by the provisioner entry points.
///
/// Displays as `"{kind}: {message}"`; the original cause (if any) is
/// available through [`std::error::Error::source`] so `{:#}` formatting
/// through `anyhow` prints the whole chain.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProvisionError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ProvisionError {
    /// Creates an error of the given kind without an underlying cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error of the given kind wrapping an underlying cause.
    pub fn wrap(kind: ErrorKind, source: impl Into<BoxError>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Wraps an `anyhow::Error` as `AuthRequired`, keeping its chain.
    pub(crate) fn auth_required(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::wrap(ErrorKind::AuthRequired, BoxError::from(source), message)
    }

    /// Wraps an `anyhow::Error` as `Temporary`, keeping its chain.
    pub(crate) fn temporary(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::wrap(ErrorKind::Temporary, BoxError::from(source), message)
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the short contextual message, without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind == ErrorKind::InvalidArgument
    }

    pub fn is_auth_required(&self) -> bool {
        self.kind == ErrorKind::AuthRequired
    }

    pub fn is_temporary(&self) -> bool {
        self.kind == ErrorKind::Temporary
    }
}
