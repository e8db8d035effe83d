//! In-memory session for tests and offline runs.
//!
//! Clones share one graph, so a test can keep a handle and play the part of
//! the server and other clients while a plumber owns its own clone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{rename_target, Notification, Session, SessionError};
use crate::dispatcher::NotificationSender;
use crate::port::PortSnapshot;

#[derive(Default)]
struct MemoryGraph {
    ports: BTreeMap<String, PortSnapshot>,
    connections: BTreeSet<(String, String)>,
    lost: Option<String>,
    sender: Option<NotificationSender>,
    calls: Vec<String>,
}

impl MemoryGraph {
    fn emit(&self, notification: Notification) {
        if let Some(sender) = &self.sender {
            sender.notify(notification);
        }
    }

    fn alive(&self) -> Result<(), SessionError> {
        match &self.lost {
            Some(reason) => Err(SessionError::Lost(reason.clone())),
            None => Ok(()),
        }
    }

    fn endpoints(&self, output: &str, input: &str) -> Result<(&PortSnapshot, &PortSnapshot), SessionError> {
        let out = self
            .ports
            .get(output)
            .ok_or_else(|| SessionError::PortNotFound(output.to_string()))?;
        let inp = self
            .ports
            .get(input)
            .ok_or_else(|| SessionError::PortNotFound(input.to_string()))?;
        Ok((out, inp))
    }
}

#[derive(Clone, Default)]
pub struct MemorySession {
    graph: Arc<Mutex<MemoryGraph>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports(ports: impl IntoIterator<Item = PortSnapshot>) -> Self {
        let session = Self::new();
        {
            let mut graph = session.graph();
            for port in ports {
                graph.ports.insert(port.full_name.clone(), port);
            }
        }
        session
    }

    fn graph(&self) -> MutexGuard<'_, MemoryGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver notifications for every later change to `sender`.
    pub fn attach(&self, sender: NotificationSender) {
        self.graph().sender = Some(sender);
    }

    /// A client registers a port.
    pub fn add_port(&self, port: PortSnapshot) {
        let mut graph = self.graph();
        let name = port.full_name.clone();
        graph.ports.insert(name.clone(), port);
        graph.emit(Notification::PortRegistered(name));
    }

    /// A client unregisters a port; its connections go with it.
    pub fn remove_port(&self, full_name: &str) {
        let mut graph = self.graph();
        if graph.ports.remove(full_name).is_some() {
            graph
                .connections
                .retain(|(out, inp)| out != full_name && inp != full_name);
            graph.emit(Notification::PortUnregistered(full_name.to_string()));
        }
    }

    /// Another client renames a port.
    pub fn rename_external(&self, old: &str, new: &str) {
        let mut graph = self.graph();
        apply_rename(&mut graph, old, new);
    }

    /// The user patches two ports by hand.
    pub fn connect_external(&self, output: &str, input: &str) {
        self.graph()
            .connections
            .insert((output.to_string(), input.to_string()));
    }

    /// The server shuts the client down.
    pub fn lose(&self, reason: &str) {
        let mut graph = self.graph();
        graph.lost = Some(reason.to_string());
        if let Some(sender) = &graph.sender {
            sender.session_lost();
        }
    }

    pub fn port_names(&self) -> Vec<String> {
        self.graph().ports.keys().cloned().collect()
    }

    pub fn connections(&self) -> Vec<(String, String)> {
        self.graph().connections.iter().cloned().collect()
    }

    pub fn has_connection(&self, output: &str, input: &str) -> bool {
        self.graph()
            .connections
            .contains(&(output.to_string(), input.to_string()))
    }

    /// Commands issued through [`Session`], oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.graph().calls.clone()
    }
}

fn apply_rename(graph: &mut MemoryGraph, old: &str, new: &str) {
    let Some(port) = graph.ports.remove(old) else {
        return;
    };
    let Some(renamed) = port.renamed(new) else {
        graph.ports.insert(old.to_string(), port);
        return;
    };
    graph.ports.insert(new.to_string(), renamed);
    graph.connections = graph
        .connections
        .iter()
        .map(|(out, inp)| {
            let out = if out == old { new.to_string() } else { out.clone() };
            let inp = if inp == old { new.to_string() } else { inp.clone() };
            (out, inp)
        })
        .collect();
    graph.emit(Notification::PortRenamed {
        old: old.to_string(),
        new: new.to_string(),
    });
}

impl Session for MemorySession {
    fn list_ports(&self) -> Result<Vec<PortSnapshot>, SessionError> {
        let graph = self.graph();
        graph.alive()?;
        Ok(graph.ports.values().cloned().collect())
    }

    fn port(&self, full_name: &str) -> Result<Option<PortSnapshot>, SessionError> {
        let graph = self.graph();
        graph.alive()?;
        Ok(graph.ports.get(full_name).cloned())
    }

    fn is_connected(&self, output: &str, input: &str) -> Result<bool, SessionError> {
        let graph = self.graph();
        graph.alive()?;
        graph.endpoints(output, input)?;
        Ok(graph
            .connections
            .contains(&(output.to_string(), input.to_string())))
    }

    fn rename_port(&mut self, full_name: &str, new_name: &str) -> Result<(), SessionError> {
        let mut graph = self.graph();
        graph.alive()?;
        graph.calls.push(format!("rename {} -> {}", full_name, new_name));

        let port = graph
            .ports
            .get(full_name)
            .ok_or_else(|| SessionError::PortNotFound(full_name.to_string()))?;
        let target = rename_target(&port.id, new_name)?.full_name();
        if target != full_name && graph.ports.contains_key(&target) {
            return Err(SessionError::Rejected(format!("{} already exists", target)));
        }

        apply_rename(&mut graph, full_name, &target);
        Ok(())
    }

    fn connect(&mut self, output: &str, input: &str) -> Result<(), SessionError> {
        let mut graph = self.graph();
        graph.alive()?;
        graph.calls.push(format!("connect {} -> {}", output, input));

        let (out, inp) = graph.endpoints(output, input)?;
        if !out.is_output() || !inp.is_input() {
            return Err(SessionError::Rejected(format!(
                "{} -> {} is not output to input",
                output, input
            )));
        }
        if !out.kind.is_compatible(&inp.kind) {
            return Err(SessionError::Rejected(format!(
                "cannot connect {} port to {} port",
                out.kind, inp.kind
            )));
        }
        if !graph
            .connections
            .insert((output.to_string(), input.to_string()))
        {
            return Err(SessionError::Rejected("already connected".to_string()));
        }
        Ok(())
    }

    fn disconnect(&mut self, output: &str, input: &str) -> Result<(), SessionError> {
        let mut graph = self.graph();
        graph.alive()?;
        graph.calls.push(format!("disconnect {} -> {}", output, input));

        graph.endpoints(output, input)?;
        if !graph
            .connections
            .remove(&(output.to_string(), input.to_string()))
        {
            return Err(SessionError::Rejected("not connected".to_string()));
        }
        Ok(())
    }

    fn check_alive(&self) -> Result<(), SessionError> {
        self.graph().alive()
    }
}
