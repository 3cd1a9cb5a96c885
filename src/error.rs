//! Error types for wgctrl

use std::io;

use thiserror::Error;

use crate::backend::BackendKind;

/// Main error type for wgctrl
#[derive(Error, Debug)]
pub enum WgCtrlError {
    /// A backend could not be opened while building a client
    #[error("Failed to initialize {backend} backend: {source}")]
    Init {
        backend: BackendKind,
        #[source]
        source: io::Error,
    },

    /// No backend owns a device with this name
    #[error("Device not found: {name}")]
    NotFound { name: String },

    /// Any other failure reported by a backend
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A backend failed to release its resources
    #[error("Failed to release {backend} backend: {source}")]
    Release {
        backend: BackendKind,
        #[source]
        source: io::Error,
    },
}

/// Backend transport failures other than "not found"
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Netlink request failed with errno {errno}")]
    Netlink { errno: i32 },

    #[error("Userspace daemon returned errno {errno}")]
    Uapi { errno: i32 },

    #[error("Malformed response: {message}")]
    Malformed { message: String },

    #[error("Request of {len} bytes does not fit in one message")]
    RequestTooLarge { len: usize },
}

impl WgCtrlError {
    /// Build the not-found error for a device name
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Build a malformed-response transport error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Transport(TransportError::Malformed {
            message: message.into(),
        })
    }

    /// Check if this error means "no such device"
    ///
    /// Callers commonly branch on this, so it is the only classification
    /// exposed beyond the variants themselves.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NotFound { .. } => 1,
            _ => 2,
        }
    }
}

impl From<io::Error> for WgCtrlError {
    fn from(e: io::Error) -> Self {
        Self::Transport(TransportError::Io(e))
    }
}

/// Converts to the platform "file not found" convention for the not-found
/// case, so `err.kind() == ErrorKind::NotFound` works for io-based callers.
///
/// Every other variant keeps the kind of its io source, except that a
/// source of kind `NotFound` becomes `Other`.
impl From<WgCtrlError> for io::Error {
    fn from(e: WgCtrlError) -> Self {
        if e.is_not_found() {
            return io::Error::new(io::ErrorKind::NotFound, e);
        }
        let kind = match &e {
            WgCtrlError::Transport(TransportError::Io(inner)) => inner.kind(),
            WgCtrlError::Init { source, .. } | WgCtrlError::Release { source, .. } => source.kind(),
            _ => io::ErrorKind::Other,
        };
        match kind {
            io::ErrorKind::NotFound => io::Error::other(e),
            kind => io::Error::new(kind, e),
        }
    }
}

/// Result type alias for wgctrl operations
pub type Result<T> = std::result::Result<T, WgCtrlError>;
