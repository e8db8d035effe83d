//! Port inventory and change tracking
//!
//! The observer is the worker's picture of the server's ports. It is seeded
//! by a full enumeration and then moved forward one notification batch at a
//! time, producing an [`InventoryChange`] per batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, trace};

use crate::port::PortSnapshot;
use crate::session::{Notification, Session, SessionError};

/// All currently known ports, keyed by full name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    ports: BTreeMap<String, PortSnapshot>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ports(ports: impl IntoIterator<Item = PortSnapshot>) -> Self {
        Self {
            ports: ports
                .into_iter()
                .map(|p| (p.full_name.clone(), p))
                .collect(),
        }
    }

    pub fn get(&self, full_name: &str) -> Option<&PortSnapshot> {
        self.ports.get(full_name)
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.ports.contains_key(full_name)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Ports in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PortSnapshot> {
        self.ports.values()
    }

    fn insert(&mut self, port: PortSnapshot) -> Option<PortSnapshot> {
        self.ports.insert(port.full_name.clone(), port)
    }

    fn remove(&mut self, full_name: &str) -> Option<PortSnapshot> {
        self.ports.remove(full_name)
    }
}

/// Net effect of one batch of notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryChange {
    pub added: Vec<PortSnapshot>,
    pub removed: Vec<PortSnapshot>,
    /// `(name before the batch, port as it is now)`
    pub renamed: Vec<(String, PortSnapshot)>,
}

impl InventoryChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.renamed.is_empty()
    }

    /// Every port in the inventory, as if just registered.
    pub fn everything(inventory: &Inventory) -> Self {
        Self {
            added: inventory.iter().cloned().collect(),
            ..Default::default()
        }
    }

    /// Ports whose names the rename pass should look at.
    pub fn touched(&self) -> impl Iterator<Item = &PortSnapshot> {
        self.added.iter().chain(self.renamed.iter().map(|(_, p)| p))
    }
}

#[derive(Debug, Default)]
pub struct GraphObserver {
    inventory: Inventory,
}

impl GraphObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Replace the inventory with a full enumeration.
    ///
    /// Call after the notification subscription is live; anything that
    /// registered in between is either in the enumeration or still queued.
    pub fn seed<S: Session>(&mut self, session: &S) -> Result<InventoryChange, SessionError> {
        self.inventory = Inventory::from_ports(session.list_ports()?);
        debug!(ports = self.inventory.len(), "inventory seeded");
        Ok(InventoryChange::everything(&self.inventory))
    }

    /// Re-enumerate and diff against what we had.
    ///
    /// Renames cannot be told apart from remove + add here.
    pub fn resync<S: Session>(&mut self, session: &S) -> Result<InventoryChange, SessionError> {
        let fresh = Inventory::from_ports(session.list_ports()?);
        let mut change = InventoryChange::default();

        for port in self.inventory.iter() {
            match fresh.get(&port.full_name) {
                Some(now) if now == port => {}
                Some(now) => {
                    change.removed.push(port.clone());
                    change.added.push(now.clone());
                }
                None => change.removed.push(port.clone()),
            }
        }
        for port in fresh.iter() {
            if !self.inventory.contains(&port.full_name) {
                change.added.push(port.clone());
            }
        }

        debug!(
            added = change.added.len(),
            removed = change.removed.len(),
            "inventory resynced"
        );
        self.inventory = fresh;
        Ok(change)
    }

    /// Apply one batch of notifications and return its net change.
    ///
    /// Registration of an already-known port is a no-op, so notifications
    /// buffered during seeding flush harmlessly.
    pub fn apply<S: Session>(
        &mut self,
        session: &S,
        notifications: &[Notification],
    ) -> Result<InventoryChange, SessionError> {
        let mut baseline: HashMap<String, Option<PortSnapshot>> = HashMap::new();
        // current name -> name before the batch
        let mut origins: HashMap<String, String> = HashMap::new();

        for notification in notifications {
            trace!(?notification, "applying");
            match notification {
                Notification::PortRegistered(name) => {
                    self.remember(&mut baseline, name);
                    match session.port(name)? {
                        Some(port) => {
                            self.inventory.insert(port);
                        }
                        // already gone again
                        None => {
                            self.inventory.remove(name);
                        }
                    }
                }
                Notification::PortUnregistered(name) => {
                    self.remember(&mut baseline, name);
                    self.inventory.remove(name);
                    origins.remove(name);
                }
                Notification::PortRenamed { old, new } => {
                    self.remember(&mut baseline, old);
                    self.remember(&mut baseline, new);
                    let previous = self.inventory.remove(old);
                    // keep the chain even through names we could not resolve
                    let origin = origins
                        .remove(old)
                        .or_else(|| previous.as_ref().map(|_| old.clone()));
                    if let Some(port) = session.port(new)? {
                        self.inventory.insert(port);
                    }
                    if let Some(origin) = origin {
                        origins.insert(new.clone(), origin);
                    }
                }
                Notification::Resync => {
                    // Fold what we have so far into a full diff.
                    let mut change = self.resync(session)?;
                    change.added.retain(|p| !baseline.contains_key(&p.full_name));
                    change.removed.retain(|p| !baseline.contains_key(&p.full_name));
                    let rest = self.net_change(baseline, origins);
                    change.added.extend(rest.added);
                    change.removed.extend(rest.removed);
                    change.renamed.extend(rest.renamed);
                    return Ok(change);
                }
            }
        }

        Ok(self.net_change(baseline, origins))
    }

    fn remember(&self, baseline: &mut HashMap<String, Option<PortSnapshot>>, name: &str) {
        baseline
            .entry(name.to_string())
            .or_insert_with(|| self.inventory.get(name).cloned());
    }

    fn net_change(
        &self,
        baseline: HashMap<String, Option<PortSnapshot>>,
        origins: HashMap<String, String>,
    ) -> InventoryChange {
        let mut change = InventoryChange::default();
        let mut handled: BTreeSet<String> = BTreeSet::new();

        let mut origins: Vec<_> = origins.into_iter().collect();
        origins.sort();
        for (current, origin) in origins {
            if current == origin {
                continue;
            }
            let before = baseline.get(&origin).cloned().flatten();
            let now = self.inventory.get(&current);
            if let (Some(_), Some(now)) = (before, now) {
                change.renamed.push((origin.clone(), now.clone()));
                handled.insert(origin);
                handled.insert(current);
            }
        }

        let mut names: Vec<_> = baseline.into_iter().collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, before) in names {
            if handled.contains(&name) {
                continue;
            }
            match (before, self.inventory.get(&name)) {
                (None, Some(now)) => change.added.push(now.clone()),
                (Some(was), None) => change.removed.push(was),
                (Some(was), Some(now)) if &was != now => {
                    change.removed.push(was);
                    change.added.push(now.clone());
                }
                _ => {}
            }
        }

        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;

    fn session() -> MemorySession {
        MemorySession::with_ports([
            PortSnapshot::audio_out("synth:voice_out").unwrap(),
            PortSnapshot::audio_in("recorder:ch1_in").unwrap(),
        ])
    }

    fn seeded(session: &MemorySession) -> GraphObserver {
        let mut observer = GraphObserver::new();
        let change = observer.seed(session).unwrap();
        assert_eq!(change.added.len(), 2);
        observer
    }

    #[test]
    fn test_registration_adds_port() {
        let session = session();
        let mut observer = seeded(&session);
        session.add_port(PortSnapshot::audio_out("app1:out_1").unwrap());

        let change = observer
            .apply(&session, &[Notification::PortRegistered("app1:out_1".into())])
            .unwrap();
        assert_eq!(change.added.len(), 1);
        assert_eq!(change.added[0].full_name, "app1:out_1");
        assert!(observer.inventory().contains("app1:out_1"));
    }

    #[test]
    fn test_known_registration_is_noop() {
        let session = session();
        let mut observer = seeded(&session);

        let change = observer
            .apply(&session, &[Notification::PortRegistered("synth:voice_out".into())])
            .unwrap();
        assert!(change.is_empty());
    }

    #[test]
    fn test_unknown_unregistration_is_noop() {
        let session = session();
        let mut observer = seeded(&session);

        let change = observer
            .apply(&session, &[Notification::PortUnregistered("ghost:out".into())])
            .unwrap();
        assert!(change.is_empty());
    }

    #[test]
    fn test_register_then_unregister_nets_to_nothing() {
        let session = session();
        let mut observer = seeded(&session);

        let change = observer
            .apply(
                &session,
                &[
                    Notification::PortRegistered("flash:out".into()),
                    Notification::PortUnregistered("flash:out".into()),
                ],
            )
            .unwrap();
        assert!(change.is_empty());
        assert!(!observer.inventory().contains("flash:out"));
    }

    #[test]
    fn test_rename_chain_collapses() {
        let session = session();
        let mut observer = seeded(&session);
        session.rename_external("synth:voice_out", "synth:lead");
        session.rename_external("synth:lead", "synth:lead_out");

        let change = observer
            .apply(
                &session,
                &[
                    Notification::PortRenamed {
                        old: "synth:voice_out".into(),
                        new: "synth:lead".into(),
                    },
                    Notification::PortRenamed {
                        old: "synth:lead".into(),
                        new: "synth:lead_out".into(),
                    },
                ],
            )
            .unwrap();

        assert_eq!(change.renamed.len(), 1);
        assert_eq!(change.renamed[0].0, "synth:voice_out");
        assert_eq!(change.renamed[0].1.full_name, "synth:lead_out");
        assert!(change.added.is_empty());
        assert!(change.removed.is_empty());
    }

    #[test]
    fn test_unregistration_removes_port() {
        let session = session();
        let mut observer = seeded(&session);
        session.remove_port("recorder:ch1_in");

        let change = observer
            .apply(&session, &[Notification::PortUnregistered("recorder:ch1_in".into())])
            .unwrap();
        assert_eq!(change.removed.len(), 1);
        assert_eq!(observer.inventory().len(), 1);
    }

    #[test]
    fn test_resync_diffs() {
        let session = session();
        let mut observer = seeded(&session);
        session.remove_port("recorder:ch1_in");
        session.add_port(PortSnapshot::midi_in("sampler:midi_in").unwrap());

        let change = observer.resync(&session).unwrap();
        assert_eq!(change.removed.len(), 1);
        assert_eq!(change.removed[0].full_name, "recorder:ch1_in");
        assert_eq!(change.added.len(), 1);
        assert_eq!(change.added[0].full_name, "sampler:midi_in");
    }

    #[test]
    fn test_resync_notification_in_batch() {
        let session = session();
        let mut observer = seeded(&session);
        session.add_port(PortSnapshot::audio_out("app1:out_1").unwrap());
        session.add_port(PortSnapshot::audio_out("app2:out_1").unwrap());

        let change = observer
            .apply(
                &session,
                &[
                    Notification::PortRegistered("app1:out_1".into()),
                    Notification::Resync,
                ],
            )
            .unwrap();
        let mut added: Vec<_> = change.added.iter().map(|p| p.full_name.as_str()).collect();
        added.sort();
        assert_eq!(added, vec!["app1:out_1", "app2:out_1"]);
    }

    #[test]
    fn test_lost_session_surfaces() {
        let session = session();
        let mut observer = seeded(&session);
        session.lose("gone");
        let err = observer
            .apply(&session, &[Notification::PortRegistered("x:y".into())])
            .unwrap_err();
        assert!(matches!(err, SessionError::Lost(_)));
    }
}
