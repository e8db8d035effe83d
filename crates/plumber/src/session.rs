//! The audio server session, as the plumber sees it.
//!
//! Backends implement [`Session`] for queries and commands and feed
//! [`Notification`]s into a [`NotificationSender`](crate::dispatcher::NotificationSender)
//! from their callback context.

#[cfg(feature = "jack")]
pub mod jack;
pub mod memory;

#[cfg(feature = "jack")]
pub use self::jack::JackSession;
pub use memory::MemorySession;

use thiserror::Error;

use crate::port::{PortId, PortSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The server went away. Fatal.
    #[error("session lost: {0}")]
    Lost(String),

    #[error("port not found: {0}")]
    PortNotFound(String),

    /// The server refused a request it understood.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Port lifecycle event from the server's callback context.
///
/// Carries names only; the worker re-resolves everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    PortRegistered(String),
    PortUnregistered(String),
    PortRenamed { old: String, new: String },
    /// The backend lost track of something; re-enumerate.
    Resync,
}

/// Query and command surface of the server.
///
/// Calls are expected to be quick and must never be issued from a
/// notification callback.
pub trait Session {
    /// Every port currently registered.
    fn list_ports(&self) -> Result<Vec<PortSnapshot>, SessionError>;

    /// Look one port up by full name. `Ok(None)` if it is gone.
    fn port(&self, full_name: &str) -> Result<Option<PortSnapshot>, SessionError>;

    fn is_connected(&self, output: &str, input: &str) -> Result<bool, SessionError>;

    /// Rename `full_name`. `new_name` may be a full name for the same client
    /// or a bare short name.
    fn rename_port(&mut self, full_name: &str, new_name: &str) -> Result<(), SessionError>;

    fn connect(&mut self, output: &str, input: &str) -> Result<(), SessionError>;

    fn disconnect(&mut self, output: &str, input: &str) -> Result<(), SessionError>;

    /// `Err(SessionError::Lost)` once the server has shut us down.
    fn check_alive(&self) -> Result<(), SessionError>;
}

/// Where a rename of `current` to `new_name` lands.
///
/// Ports cannot change owner, so a full name for another client is refused.
pub fn rename_target(current: &PortId, new_name: &str) -> Result<PortId, SessionError> {
    match PortId::parse(new_name) {
        Some(target) if target.client == current.client => Ok(target),
        Some(target) => Err(SessionError::Rejected(format!(
            "cannot move {} to client {}",
            current, target.client
        ))),
        None if !new_name.is_empty() && !new_name.contains(':') => {
            Ok(PortId::new(current.client.clone(), new_name))
        }
        None => Err(SessionError::Rejected(format!(
            "invalid port name {:?}",
            new_name
        ))),
    }
}
