//! Error handling for the component runtime.
//!
//! Every fallible operation of the handler returns [`Result`]. Errors are
//! returned to the immediate caller; panics raised by loader backends or
//! library code are caught at the loader boundary and surface as
//! [`Error::Io`].

/// Error type for the component registry and library loader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Empty component id, empty library path or otherwise unusable argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A component with the same id is already registered.
    #[error("Component already registered: {0}")]
    AlreadyExists(String),

    /// Unknown component id or library path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The loader backend rejected the library.
    #[error("Failed to load library {path} ({backend}): {reason}")]
    LoadFailure {
        path: String,
        backend: &'static str,
        reason: String,
    },

    /// The prototype could not produce a running instance.
    #[error("Can not spawn component: {0}")]
    SpawnFailure(String),

    /// The spawned instance rejected its init parameters.
    #[error("Initialization of component {id} failed with error {code}")]
    InitFailure { id: String, code: i32 },

    /// Failure or panic inside the loader backend.
    #[error("I/O error: {0}")]
    Io(String),

    /// The operation conflicts with the current runtime state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// errno values used by the C interface of the component handler.
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const EINVAL: i32 = 22;
    pub const ELIBACC: i32 = 79;
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Negative errno equivalent, as returned by the C handler interface.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Error::InvalidArgument(_) | Error::Config(_) => errno::EINVAL,
            Error::AlreadyExists(_) => errno::EEXIST,
            Error::NotFound(_) | Error::SpawnFailure(_) => errno::ENOENT,
            Error::LoadFailure { .. } => errno::ELIBACC,
            Error::Io(_) => errno::EIO,
            Error::InvalidState(_) => errno::EBUSY,
            // A zero init code still reports a failure.
            Error::InitFailure { code: 0, .. } => errno::EINVAL,
            Error::InitFailure { code, .. } => code.saturating_abs(),
        };
        -code
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Convert a caught panic payload into a printable message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
