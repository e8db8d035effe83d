//! JACK backend, also usable against PipeWire's JACK layer.
//!
//! The notification thread only resolves a port id to its name and pushes
//! it into the queue. Everything else happens on the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jack::{AsyncClient, Client, ClientOptions, ClientStatus, Control, NotificationHandler, PortFlags};
use tracing::{debug, info};

use super::{rename_target, Notification, Session, SessionError};
use crate::dispatcher::NotificationSender;
use crate::port::{Direction, PortId, PortKind, PortSnapshot};

pub struct Notifier {
    sender: NotificationSender,
    lost: Arc<AtomicBool>,
}

impl NotificationHandler for Notifier {
    unsafe fn shutdown(&mut self, _status: ClientStatus, _reason: &str) {
        // anything beyond an atomic store is unsafe here
        self.lost.store(true, Ordering::Release);
        self.sender.session_lost();
    }

    fn port_registration(&mut self, client: &Client, port_id: jack::PortId, is_registered: bool) {
        let name = client.port_by_id(port_id).and_then(|port| port.name().ok());
        let notification = match (name, is_registered) {
            (Some(name), true) => Notification::PortRegistered(name),
            (Some(name), false) => Notification::PortUnregistered(name),
            // already gone; let the worker re-enumerate
            (None, _) => Notification::Resync,
        };
        self.sender.notify(notification);
    }

    fn port_rename(
        &mut self,
        _client: &Client,
        _port_id: jack::PortId,
        old_name: &str,
        new_name: &str,
    ) -> Control {
        self.sender.notify(Notification::PortRenamed {
            old: old_name.to_string(),
            new: new_name.to_string(),
        });
        Control::Continue
    }
}

pub struct JackSession {
    client: AsyncClient<Notifier, ()>,
    lost: Arc<AtomicBool>,
}

impl JackSession {
    /// Open a client and activate it with notifications going to `sender`.
    ///
    /// Notifications may arrive before this returns; seed the inventory
    /// afterwards.
    pub fn open(client_name: &str, start_server: bool, sender: NotificationSender) -> Result<Self, SessionError> {
        let options = if start_server {
            ClientOptions::empty()
        } else {
            ClientOptions::NO_START_SERVER
        };
        let (client, status) = Client::new(client_name, options)
            .map_err(|e| SessionError::Lost(format!("cannot open JACK client {:?}: {}", client_name, e)))?;
        debug!(?status, "JACK client opened");

        let lost = Arc::new(AtomicBool::new(false));
        let notifier = Notifier {
            sender,
            lost: lost.clone(),
        };
        let client = client
            .activate_async(notifier, ())
            .map_err(|e| SessionError::Lost(format!("cannot activate JACK client: {}", e)))?;

        info!(
            client = %client.as_client().name(),
            sample_rate = client.as_client().sample_rate(),
            "connected to JACK"
        );
        Ok(Self { client, lost })
    }

    fn client(&self) -> Result<&Client, SessionError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(SessionError::Lost("JACK server shut the client down".into()));
        }
        Ok(self.client.as_client())
    }

    fn unowned(&self, full_name: &str) -> Result<jack::Port<jack::Unowned>, SessionError> {
        self.client()?
            .port_by_name(full_name)
            .ok_or_else(|| SessionError::PortNotFound(full_name.to_string()))
    }

    fn snapshot(&self, full_name: &str) -> Result<Option<PortSnapshot>, SessionError> {
        let Some(port) = self.client()?.port_by_name(full_name) else {
            return Ok(None);
        };
        let flags = port.flags();
        let direction = if flags.contains(PortFlags::IS_OUTPUT) {
            Direction::Output
        } else {
            Direction::Input
        };
        let kind = PortKind::from_type_name(&port.port_type().unwrap_or_default());
        Ok(PortSnapshot::new(full_name, direction, kind))
    }

    fn refused(&self, err: jack::Error) -> SessionError {
        if self.lost.load(Ordering::Acquire) {
            SessionError::Lost(err.to_string())
        } else {
            SessionError::Rejected(err.to_string())
        }
    }
}

impl Session for JackSession {
    fn list_ports(&self) -> Result<Vec<PortSnapshot>, SessionError> {
        let names = self.client()?.ports(None, None, PortFlags::empty());
        let mut ports = Vec::with_capacity(names.len());
        for name in names {
            // unregistered between listing and lookup
            if let Some(port) = self.snapshot(&name)? {
                ports.push(port);
            }
        }
        Ok(ports)
    }

    fn port(&self, full_name: &str) -> Result<Option<PortSnapshot>, SessionError> {
        self.snapshot(full_name)
    }

    fn is_connected(&self, output: &str, input: &str) -> Result<bool, SessionError> {
        let port = self.unowned(output)?;
        if self.client()?.port_by_name(input).is_none() {
            return Err(SessionError::PortNotFound(input.to_string()));
        }
        port.is_connected_to(input).map_err(|e| self.refused(e))
    }

    fn rename_port(&mut self, full_name: &str, new_name: &str) -> Result<(), SessionError> {
        let current = PortId::parse(full_name)
            .ok_or_else(|| SessionError::PortNotFound(full_name.to_string()))?;
        let target = rename_target(&current, new_name)?;
        let mut port = self.unowned(full_name)?;
        port.set_name(&target.port).map_err(|e| self.refused(e))
    }

    fn connect(&mut self, output: &str, input: &str) -> Result<(), SessionError> {
        self.client()?
            .connect_ports_by_name(output, input)
            .map_err(|e| self.refused(e))
    }

    fn disconnect(&mut self, output: &str, input: &str) -> Result<(), SessionError> {
        self.client()?
            .disconnect_ports_by_name(output, input)
            .map_err(|e| self.refused(e))
    }

    fn check_alive(&self) -> Result<(), SessionError> {
        self.client().map(|_| ())
    }
}
