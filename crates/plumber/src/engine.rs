//! Reconciliation
//!
//! Given the inventory, what changed, and the rule set, work out which
//! renames, connects and disconnects bring the graph to the desired state.
//!
//! Ordering within a batch:
//! 1. Renames for added and renamed ports. Rules compose: each matching
//!    rule rewrites the name produced by the previous one.
//! 2. Connects, evaluated against the names the ports will have once the
//!    renames land. Live connection state is asked of the session every
//!    time, never remembered.
//! 3. Disconnects, only for connections this process established and no
//!    rule wants any more.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use tracing::{debug, trace, warn};

use crate::observer::{Inventory, InventoryChange};
use crate::port::PortSnapshot;
use crate::rules::RuleSet;
use crate::session::{rename_target, Session, SessionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `port` is the snapshot the decision was made on; its name is what
    /// the executor expects to find.
    Rename { port: PortSnapshot, new_name: String },
    Connect { output: PortSnapshot, input: PortSnapshot },
    Disconnect { output: PortSnapshot, input: PortSnapshot },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Rename { port, new_name } => {
                write!(f, "rename({} -> {})", port.full_name, new_name)
            }
            Action::Connect { output, input } => {
                write!(f, "connect({}, {})", output.full_name, input.full_name)
            }
            Action::Disconnect { output, input } => {
                write!(f, "disconnect({}, {})", output.full_name, input.full_name)
            }
        }
    }
}

/// Connections this process made, as `(output, input)` full names.
///
/// The only connections the engine may ever take down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Established {
    pairs: BTreeSet<(String, String)>,
}

impl Established {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, output: &str, input: &str) -> bool {
        self.pairs.insert((output.to_string(), input.to_string()))
    }

    pub fn remove(&mut self, output: &str, input: &str) -> bool {
        self.pairs.remove(&(output.to_string(), input.to_string()))
    }

    pub fn contains(&self, output: &str, input: &str) -> bool {
        self.pairs.contains(&(output.to_string(), input.to_string()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(o, i)| (o.as_str(), i.as_str()))
    }

    /// Follow a port to its new name.
    pub fn rename_port(&mut self, old: &str, new: &str) {
        if !self.pairs.iter().any(|(o, i)| o == old || i == old) {
            return;
        }
        self.pairs = std::mem::take(&mut self.pairs)
            .into_iter()
            .map(|(o, i)| {
                let o = if o == old { new.to_string() } else { o };
                let i = if i == old { new.to_string() } else { i };
                (o, i)
            })
            .collect();
    }

    /// Drop every pair touching a port that no longer exists.
    pub fn forget_port(&mut self, name: &str) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|(o, i)| o != name && i != name);
        before - self.pairs.len()
    }
}

pub struct RuleEngine {
    rules: RuleSet,
}

impl RuleEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// The full name the rename rules give `port`, if it differs from the
    /// current one.
    ///
    /// A result the session cannot honour (another client's name) is
    /// returned as-is so execution reports it.
    pub fn propose_name(&self, port: &PortSnapshot) -> Option<String> {
        let mut name = port.full_name.clone();

        for rule in self.rules.rename_rules() {
            if !rule.applies_to(&port.kind) {
                continue;
            }
            let Some(next) = rule.apply(&name) else {
                continue;
            };
            // a bare short name stays with the port's own client
            let next = match rename_target(&port.id, &next) {
                Ok(target) => target.full_name(),
                Err(e) => {
                    // the session will refuse it; stop composing here
                    warn!(port = %port.full_name, rule = %rule.label, proposed = %next, error = %e, "rename cannot succeed");
                    return Some(next);
                }
            };
            trace!(rule = %rule.label, from = %name, to = %next, "rename rule matched");
            name = next;
            if rule.is_exclusive() {
                break;
            }
        }

        (name != port.full_name).then_some(name)
    }

    /// Compute the ordered actions for one batch.
    ///
    /// Only `SessionError::Lost` is returned as an error; a port vanishing
    /// while its connection state is queried just means "not connected".
    pub fn reconcile<S: Session>(
        &self,
        inventory: &Inventory,
        change: &InventoryChange,
        established: &Established,
        session: &S,
    ) -> Result<Vec<Action>, SessionError> {
        let mut actions = Vec::new();

        // current name -> name after this batch's renames
        let mut planned: HashMap<String, String> = HashMap::new();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for port in change.touched() {
            if !seen.insert(port.full_name.as_str()) || !inventory.contains(&port.full_name) {
                continue;
            }
            if let Some(new_name) = self.propose_name(port) {
                debug!(port = %port.full_name, new_name = %new_name, "rename planned");
                // A rename onto a held name will be rejected, so the port keeps its name
                let free = !inventory.contains(&new_name) && !claimed.contains(&new_name);
                if free && rename_target(&port.id, &new_name).is_ok() {
                    claimed.insert(new_name.clone());
                    planned.insert(port.full_name.clone(), new_name.clone());
                }
                actions.push(Action::Rename {
                    port: port.clone(),
                    new_name,
                });
            }
        }

        let view: Vec<(&PortSnapshot, &str)> = inventory
            .iter()
            .map(|p| {
                let name = planned.get(&p.full_name).map_or(p.full_name.as_str(), String::as_str);
                (p, name)
            })
            .collect();

        let desired = self.desired_connections(&view);
        let desired_names: HashSet<(&str, &str)> =
            desired.iter().map(|(o, i)| (o.1, i.1)).collect();

        for ((output, out_name), (input, in_name)) in &desired {
            if live_connected(session, &output.full_name, &input.full_name)? {
                trace!(output = %out_name, input = %in_name, "already connected");
                continue;
            }
            actions.push(Action::Connect {
                output: as_named(output, out_name),
                input: as_named(input, in_name),
            });
        }

        for (out, inp) in established.iter() {
            let (Some(output), Some(input)) = (inventory.get(out), inventory.get(inp)) else {
                continue;
            };
            let out_name = planned.get(out).map_or(out, String::as_str);
            let in_name = planned.get(inp).map_or(inp, String::as_str);
            if desired_names.contains(&(out_name, in_name)) {
                continue;
            }
            if !live_connected(session, out, inp)? {
                continue;
            }
            debug!(output = %out_name, input = %in_name, "no rule wants this connection any more");
            actions.push(Action::Disconnect {
                output: as_named(output, out_name),
                input: as_named(input, in_name),
            });
        }

        Ok(actions)
    }

    /// Every (output, input) pair some connect rule asks for, in rule order
    /// and without duplicates.
    fn desired_connections<'a>(
        &self,
        view: &[(&'a PortSnapshot, &'a str)],
    ) -> Vec<((&'a PortSnapshot, &'a str), (&'a PortSnapshot, &'a str))> {
        let mut desired = Vec::new();
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut claimed: HashSet<&str> = HashSet::new();

        for rule in self.rules.connect_rules() {
            let outputs: Vec<_> = view
                .iter()
                .filter(|(p, name)| !claimed.contains(p.full_name.as_str()) && rule.matches_source(p, name))
                .collect();
            if outputs.is_empty() {
                continue;
            }
            let inputs: Vec<_> = view
                .iter()
                .filter(|(p, name)| !claimed.contains(p.full_name.as_str()) && rule.matches_destination(p, name))
                .collect();

            let mut paired: Vec<&str> = Vec::new();
            for &&(output, out_name) in &outputs {
                for &&(input, in_name) in &inputs {
                    if !output.kind.is_compatible(&input.kind) {
                        continue;
                    }
                    if rule.is_exclusive() {
                        paired.push(output.full_name.as_str());
                        paired.push(input.full_name.as_str());
                    }
                    if seen.insert((out_name, in_name)) {
                        desired.push(((output, out_name), (input, in_name)));
                    }
                }
            }
            claimed.extend(paired);
        }

        desired
    }
}

fn live_connected<S: Session>(session: &S, output: &str, input: &str) -> Result<bool, SessionError> {
    match session.is_connected(output, input) {
        Ok(connected) => Ok(connected),
        Err(SessionError::Lost(reason)) => Err(SessionError::Lost(reason)),
        Err(e) => {
            trace!(output, input, error = %e, "connection state unknown");
            Ok(false)
        }
    }
}

fn as_named(port: &PortSnapshot, name: &str) -> PortSnapshot {
    if port.full_name == name {
        return port.clone();
    }
    port.renamed(name).unwrap_or_else(|| port.clone())
}
