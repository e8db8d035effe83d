//! jack-plumber core
//!
//! Keeps an audio server's port graph in line with a set of regex rules:
//! ports get renamed, matching outputs get connected to matching inputs, and
//! everything is re-evaluated as ports come and go.
//!
//! # Layers
//!
//! - [`session`]: the server interface and its JACK and in-memory backends
//! - [`observer`]: local port inventory, updated from notification batches
//! - [`rules`]: compiled rename and connect rules
//! - [`engine`]: turns inventory changes into rename/connect/disconnect actions
//! - [`executor`]: re-validates and issues actions, reporting an [`Outcome`] each
//! - [`daemon`]: [`Plumber`], the above wired around one session
//! - [`dispatcher`]: bounded notification queue and the single worker loop
//!
//! # Example
//!
//! ```
//! use plumber::{MemorySession, Plumber, PlumberOptions, PortSnapshot, RuleSet};
//! use plumbconf::{ConnectRuleDef, RuleSource};
//!
//! let rules = RuleSet::compile(&RuleSource {
//!     rename: vec![],
//!     connect: vec![ConnectRuleDef {
//!         source: Some("^synth:".into()),
//!         destination: Some("^recorder:".into()),
//!         ..Default::default()
//!     }],
//! })
//! .unwrap();
//!
//! let graph = MemorySession::with_ports([
//!     PortSnapshot::audio_out("synth:out").unwrap(),
//!     PortSnapshot::audio_in("recorder:in").unwrap(),
//! ]);
//! let mut plumber = Plumber::new(graph.clone(), rules, PlumberOptions::default());
//! plumber.start().unwrap();
//! assert!(graph.has_connection("synth:out", "recorder:in"));
//! ```

pub mod daemon;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod observer;
pub mod port;
pub mod rules;
pub mod session;

pub use daemon::{BatchReport, Plumber, PlumberOptions, PlumberStats};
pub use dispatcher::{channel, DispatchSettings, Dispatcher, NotificationQueue, NotificationSender};
pub use engine::{Action, Established, RuleEngine};
pub use error::PlumberError;
pub use executor::{ActionExecutor, Outcome, SkipReason};
pub use observer::{GraphObserver, Inventory, InventoryChange};
pub use port::{Direction, PortId, PortKind, PortSnapshot};
pub use rules::{CompileError, RuleSet};
#[cfg(feature = "jack")]
pub use session::JackSession;
pub use session::{MemorySession, Notification, Session, SessionError};
