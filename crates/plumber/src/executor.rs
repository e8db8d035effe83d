//! Carrying out planned actions against the live session.
//!
//! Every action is re-checked right before it is issued: the graph can move
//! between planning and execution, and a port that has gone away is a
//! normal outcome rather than an error.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::engine::Action;
use crate::error::PlumberError;
use crate::session::{rename_target, Session, SessionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The graph already looked the way the action wanted.
    AlreadySatisfied,
    /// Dry run: the action would have been issued.
    Planned,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    PortGone(String),
    Rejected(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PortGone(name) => write!(f, "port {} is gone", name),
            SkipReason::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

pub struct ActionExecutor {
    dry_run: bool,
    slow_call: Duration,
}

impl ActionExecutor {
    pub fn new(dry_run: bool, slow_call: Duration) -> Self {
        Self { dry_run, slow_call }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Issue one action. Only a lost session is an error.
    pub fn execute<S: Session>(&self, session: &mut S, action: &Action) -> Result<Outcome, PlumberError> {
        let outcome = match action {
            Action::Rename { port, new_name } => self.rename(session, &port.full_name, new_name),
            Action::Connect { output, input } => {
                self.connect(session, &output.full_name, &input.full_name)
            }
            Action::Disconnect { output, input } => {
                self.disconnect(session, &output.full_name, &input.full_name)
            }
        };

        match outcome {
            Ok(Outcome::Applied) => info!(%action, "applied"),
            Ok(Outcome::Planned) => info!(%action, "dry run"),
            Ok(Outcome::AlreadySatisfied) => debug!(%action, "already satisfied"),
            Ok(Outcome::Skipped(SkipReason::PortGone(ref name))) => {
                debug!(%action, port = %name, "skipped, port gone")
            }
            Ok(Outcome::Skipped(SkipReason::Rejected(ref reason))) => {
                warn!(%action, %reason, "rejected by server")
            }
            Err(ref e) => warn!(%action, error = %e, "action failed"),
        }

        outcome.map_err(PlumberError::from)
    }

    fn rename<S: Session>(&self, session: &mut S, current: &str, new_name: &str) -> Result<Outcome, SessionError> {
        let Some(port) = session.port(current)? else {
            return Ok(Outcome::Skipped(SkipReason::PortGone(current.to_string())));
        };
        let target = match rename_target(&port.id, new_name) {
            Ok(target) => target.full_name(),
            Err(e) => return skip(e),
        };
        if target == port.full_name {
            return Ok(Outcome::AlreadySatisfied);
        }
        if session.port(&target)?.is_some() {
            return Ok(Outcome::Skipped(SkipReason::Rejected(format!(
                "{} already exists",
                target
            ))));
        }
        if self.dry_run {
            return Ok(Outcome::Planned);
        }

        match self.timed("rename_port", || session.rename_port(current, &target)) {
            Ok(()) => Ok(Outcome::Applied),
            Err(e) => skip(e),
        }
    }

    fn connect<S: Session>(&self, session: &mut S, output: &str, input: &str) -> Result<Outcome, SessionError> {
        if let Some(gone) = missing_endpoint(session, output, input)? {
            return Ok(Outcome::Skipped(SkipReason::PortGone(gone)));
        }
        if session.is_connected(output, input)? {
            return Ok(Outcome::AlreadySatisfied);
        }
        if self.dry_run {
            return Ok(Outcome::Planned);
        }

        match self.timed("connect", || session.connect(output, input)) {
            Ok(()) => Ok(Outcome::Applied),
            Err(e) => skip(e),
        }
    }

    fn disconnect<S: Session>(&self, session: &mut S, output: &str, input: &str) -> Result<Outcome, SessionError> {
        if let Some(gone) = missing_endpoint(session, output, input)? {
            return Ok(Outcome::Skipped(SkipReason::PortGone(gone)));
        }
        if !session.is_connected(output, input)? {
            return Ok(Outcome::AlreadySatisfied);
        }
        if self.dry_run {
            return Ok(Outcome::Planned);
        }

        match self.timed("disconnect", || session.disconnect(output, input)) {
            Ok(()) => Ok(Outcome::Applied),
            Err(e) => skip(e),
        }
    }

    /// Server calls are synchronous and cannot be cancelled; a slow one is
    /// only reported.
    fn timed<T>(&self, call: &'static str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        if elapsed > self.slow_call {
            warn!(call, elapsed_ms = elapsed.as_millis() as u64, "slow server call");
        }
        result
    }
}

fn missing_endpoint<S: Session>(session: &S, output: &str, input: &str) -> Result<Option<String>, SessionError> {
    for name in [output, input] {
        if session.port(name)?.is_none() {
            return Ok(Some(name.to_string()));
        }
    }
    Ok(None)
}

fn skip(err: SessionError) -> Result<Outcome, SessionError> {
    match err {
        SessionError::Lost(reason) => Err(SessionError::Lost(reason)),
        SessionError::PortNotFound(name) => Ok(Outcome::Skipped(SkipReason::PortGone(name))),
        SessionError::Rejected(reason) => Ok(Outcome::Skipped(SkipReason::Rejected(reason))),
    }
}
