//! Server error types.

use std::fmt;

use secim_core::{LoadError, ProtocolError};

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable directories).
    ///
    /// Fatal: prevents server startup. Fix configuration and restart.
    Config(String),

    /// Trust store could not be built at startup.
    ///
    /// Fatal: the server has no identity to present. See `LoadError`.
    Load(LoadError),

    /// Transport/network error (accept failure, broken socket).
    ///
    /// Fatal for the affected connection only.
    Transport(String),

    /// Session protocol violation that ends the connection.
    ///
    /// Only fatal protocol errors (see `ProtocolError::is_fatal`) surface
    /// here; recoverable ones drop a single message and are logged.
    Protocol(ProtocolError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Load(err) => write!(f, "trust store error: {err}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Load(err) => Some(err),
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LoadError> for ServerError {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
