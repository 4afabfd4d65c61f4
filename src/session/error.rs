//! Session errors.

use std::time::Duration;

/// Errors that end a single session.
///
/// None of these are fatal to the server: the connection is closed and the
/// accept loop moves on.
#[derive(Debug)]
pub enum SessionError {
    Read(std::io::Error),
    Write(std::io::Error),
    IdleTimeout(Duration),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Read(e) => write!(f, "read failed: {}", e),
            SessionError::Write(e) => write!(f, "write failed: {}", e),
            SessionError::IdleTimeout(d) => {
                write!(f, "no data received for {}s", d.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Read(e) | SessionError::Write(e) => Some(e),
            SessionError::IdleTimeout(_) => None,
        }
    }
}
