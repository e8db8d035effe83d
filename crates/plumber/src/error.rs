use thiserror::Error;

use crate::rules::CompileError;
use crate::session::SessionError;

/// Errors that stop the plumber.
///
/// Everything recoverable (a port vanishing mid-batch, the server refusing a
/// rename) is reported per action and never surfaces here.
#[derive(Debug, Error)]
pub enum PlumberError {
    #[error("session lost: {0}")]
    SessionLost(String),

    #[error("invalid rules: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Config(#[from] plumbconf::ConfigError),

    #[error("session error: {0}")]
    Session(SessionError),
}

impl From<SessionError> for PlumberError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Lost(reason) => PlumberError::SessionLost(reason),
            other => PlumberError::Session(other),
        }
    }
}

impl PlumberError {
    pub fn is_session_lost(&self) -> bool {
        matches!(self, PlumberError::SessionLost(_))
    }
}
