//! The plumber core: observer, engine and executor wired around one session.
//!
//! [`Plumber`] is synchronous. The [`Dispatcher`](crate::dispatcher::Dispatcher)
//! decides when it runs; tests can also drive it directly.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::engine::{Action, Established, RuleEngine};
use crate::error::PlumberError;
use crate::executor::{ActionExecutor, Outcome, SkipReason};
use crate::observer::{GraphObserver, Inventory, InventoryChange};
use crate::rules::RuleSet;
use crate::session::{Notification, Session};

#[derive(Debug, Clone)]
pub struct PlumberOptions {
    pub dry_run: bool,
    /// Server calls taking longer than this are logged.
    pub slow_call: Duration,
}

impl Default for PlumberOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            slow_call: Duration::from_millis(50),
        }
    }
}

/// Running totals, logged at shutdown and printed by `once`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlumberStats {
    pub batches: u64,
    pub notifications: u64,
    pub resyncs: u64,
    pub renames: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub already_satisfied: u64,
    pub planned: u64,
    pub skipped_gone: u64,
    pub rejected: u64,
}

impl PlumberStats {
    fn record(&mut self, action: &Action, outcome: &Outcome) {
        match outcome {
            Outcome::Applied => match action {
                Action::Rename { .. } => self.renames += 1,
                Action::Connect { .. } => self.connects += 1,
                Action::Disconnect { .. } => self.disconnects += 1,
            },
            Outcome::AlreadySatisfied => self.already_satisfied += 1,
            Outcome::Planned => self.planned += 1,
            Outcome::Skipped(SkipReason::PortGone(_)) => self.skipped_gone += 1,
            Outcome::Skipped(SkipReason::Rejected(_)) => self.rejected += 1,
        }
    }
}

/// What one reconciliation did, action by action.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<(Action, Outcome)>,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| *o == Outcome::Applied)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|(_, o)| pred(o)).count()
    }
}

pub struct Plumber<S: Session> {
    session: S,
    observer: GraphObserver,
    engine: RuleEngine,
    executor: ActionExecutor,
    established: Established,
    /// Names our own renames produced, until their notification comes back.
    own_renames: HashSet<String>,
    stats: PlumberStats,
}

impl<S: Session> Plumber<S> {
    pub fn new(session: S, rules: RuleSet, options: PlumberOptions) -> Self {
        Self {
            session,
            observer: GraphObserver::new(),
            engine: RuleEngine::new(rules),
            executor: ActionExecutor::new(options.dry_run, options.slow_call),
            established: Established::new(),
            own_renames: HashSet::new(),
            stats: PlumberStats::default(),
        }
    }

    /// Seed the inventory and reconcile every existing port.
    ///
    /// The notification subscription must already be live.
    pub fn start(&mut self) -> Result<BatchReport, PlumberError> {
        let change = self.observer.seed(&self.session)?;
        info!(
            ports = self.observer.inventory().len(),
            rename_rules = self.engine.rules().rename_rules().len(),
            connect_rules = self.engine.rules().connect_rules().len(),
            "initial reconciliation"
        );
        self.reconcile(change)
    }

    /// Handle one batch of notifications.
    pub fn process(&mut self, notifications: &[Notification]) -> Result<BatchReport, PlumberError> {
        self.stats.batches += 1;
        self.stats.notifications += notifications.len() as u64;
        if notifications.iter().any(|n| *n == Notification::Resync) {
            self.stats.resyncs += 1;
        }

        let change = self.observer.apply(&self.session, notifications)?;
        self.reconcile(change)
    }

    /// Re-enumerate the graph and reconcile the difference.
    pub fn resync(&mut self) -> Result<BatchReport, PlumberError> {
        self.stats.resyncs += 1;
        let change = self.observer.resync(&self.session)?;
        self.reconcile(change)
    }

    pub fn inventory(&self) -> &Inventory {
        self.observer.inventory()
    }

    pub fn stats(&self) -> &PlumberStats {
        &self.stats
    }

    pub fn established(&self) -> &Established {
        &self.established
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn check_alive(&self) -> Result<(), PlumberError> {
        self.session.check_alive().map_err(PlumberError::from)
    }

    fn reconcile(&mut self, mut change: InventoryChange) -> Result<BatchReport, PlumberError> {
        for (old, port) in &change.renamed {
            self.established.rename_port(old, &port.full_name);
        }
        for port in &change.removed {
            let forgotten = self.established.forget_port(&port.full_name);
            if forgotten > 0 {
                debug!(port = %port.full_name, forgotten, "port gone, forgetting its connections");
            }
        }
        // a resync reports our renames as additions
        for port in &change.added {
            self.own_renames.remove(&port.full_name);
        }
        // rename rules already ran on ports we renamed ourselves
        let own = &mut self.own_renames;
        change.renamed.retain(|(_, port)| !own.remove(&port.full_name));

        let actions = self.engine.reconcile(
            self.observer.inventory(),
            &change,
            &self.established,
            &self.session,
        )?;

        let mut report = BatchReport::default();
        for action in actions {
            let outcome = self.executor.execute(&mut self.session, &action)?;
            self.stats.record(&action, &outcome);
            self.track(&action, &outcome);
            report.results.push((action, outcome));
        }

        if report.is_empty() {
            debug!("nothing to do");
        } else {
            info!(
                actions = report.results.len(),
                applied = report.applied(),
                skipped = report.skipped(),
                "batch reconciled"
            );
        }
        Ok(report)
    }

    fn track(&mut self, action: &Action, outcome: &Outcome) {
        match (action, outcome) {
            (Action::Rename { port, new_name }, Outcome::Applied) => {
                self.established.rename_port(&port.full_name, new_name);
                self.own_renames.insert(new_name.clone());
            }
            (Action::Connect { output, input }, Outcome::Applied) => {
                self.established.insert(&output.full_name, &input.full_name);
            }
            (Action::Disconnect { output, input }, Outcome::Applied | Outcome::AlreadySatisfied)
            | (Action::Disconnect { output, input }, Outcome::Skipped(SkipReason::PortGone(_))) => {
                self.established.remove(&output.full_name, &input.full_name);
            }
            _ => {}
        }
    }
}
