//! The host-side error taxonomy.

use dougless_permissions::PermissionKind;

/// An error produced by a host operation, delivered to the JavaScript
/// callback (error-first) or promise rejection on the event loop.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The permission gate refused the operation.
    #[error("permission denied: {kind} access to {resource:?} was not granted")]
    PermissionDenied {
        /// The kind that was checked.
        kind: PermissionKind,
        /// The resource the check was about.
        resource: String,
    },
    /// The target does not exist. Read-file converts this to a `null`
    /// result instead so scripts can probe for existence idiomatically.
    #[error("not found: {0}")]
    NotFound(String),
    /// The underlying system call failed with something other than
    /// not-found.
    #[error("i/o failure: {0}")]
    Io(String),
    /// The remote endpoint misbehaved.
    #[error("protocol failure: {0}")]
    Protocol(String),
    /// An argument was rejected before any side effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl HostError {
    /// The errno-style code attached to the JavaScript error object.
    pub fn code(&self) -> &'static str {
        match self {
            HostError::PermissionDenied { .. } => "EPERM",
            HostError::NotFound(_) => "ENOENT",
            HostError::Io(_) => "EIO",
            HostError::Protocol(_) => "EPROTO",
            HostError::InvalidArgument(_) => "EINVAL",
        }
    }
}
