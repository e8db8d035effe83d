//! Notification delivery and the worker loop.
//!
//! Server callbacks run on a thread we do not own and must not block, so
//! they only push names into a bounded queue. If the queue is full the
//! notification is dropped and an overflow flag is raised; the worker then
//! re-enumerates instead of trusting an incomplete stream.
//!
//! A single worker drains the queue in batches, so reconciliation never
//! runs concurrently with itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::daemon::{Plumber, PlumberStats};
use crate::error::PlumberError;
use crate::session::{Notification, Session};

/// Create a linked sender/queue pair holding at most `capacity` pending
/// notifications.
pub fn channel(capacity: usize) -> (NotificationSender, NotificationQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let overflow = Arc::new(AtomicBool::new(false));
    let lost = Arc::new(AtomicBool::new(false));
    (
        NotificationSender {
            tx,
            overflow: overflow.clone(),
            lost: lost.clone(),
        },
        NotificationQueue { rx, overflow, lost },
    )
}

/// Callback-side handle. Never blocks, never allocates beyond the message.
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<Notification>,
    overflow: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
}

impl NotificationSender {
    pub fn notify(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.overflow.store(true, Ordering::Release),
            // worker is gone, nobody to tell
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// The server shut the client down. Only touches an atomic, so it is
    /// safe from a signal-like shutdown callback.
    pub fn session_lost(&self) {
        self.lost.store(true, Ordering::Release);
    }
}

pub struct NotificationQueue {
    rx: mpsc::Receiver<Notification>,
    overflow: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
}

impl NotificationQueue {
    /// Whether notifications were dropped since the last call.
    pub fn take_overflow(&self) -> bool {
        self.overflow.swap(false, Ordering::AcqRel)
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// `first` plus whatever is already queued, up to `max_batch` entries.
    ///
    /// Repeated resync requests collapse to one.
    pub fn drain(&mut self, first: Notification, max_batch: usize) -> Vec<Notification> {
        let mut batch = vec![first];
        while batch.len() < max_batch.max(1) {
            match self.rx.try_recv() {
                Ok(notification) => {
                    if notification == Notification::Resync && batch.contains(&Notification::Resync) {
                        continue;
                    }
                    batch.push(notification);
                }
                Err(_) => break,
            }
        }
        batch
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_batch: usize,
    /// How often the lost and overflow flags are checked while idle.
    pub poll_interval: Duration,
    /// Periodic full resync; `None` disables it.
    pub resync_interval: Option<Duration>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_batch: 256,
            poll_interval: Duration::from_millis(250),
            resync_interval: None,
        }
    }
}

impl From<&plumbconf::DispatchConfig> for DispatchSettings {
    fn from(config: &plumbconf::DispatchConfig) -> Self {
        Self {
            max_batch: config.max_batch,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            resync_interval: (config.resync_interval_secs > 0)
                .then(|| Duration::from_secs(config.resync_interval_secs)),
        }
    }
}

pub struct Dispatcher<S: Session> {
    plumber: Plumber<S>,
    queue: NotificationQueue,
    settings: DispatchSettings,
}

impl<S: Session> Dispatcher<S> {
    pub fn new(plumber: Plumber<S>, queue: NotificationQueue, settings: DispatchSettings) -> Self {
        Self {
            plumber,
            queue,
            settings,
        }
    }

    /// Run until `shutdown` fires or the session is lost.
    ///
    /// A batch in progress always completes before the loop exits.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<PlumberStats, PlumberError> {
        self.plumber.start()?;

        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_resync = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown requested, worker exiting");
                    break;
                }

                received = self.queue.recv() => {
                    let Some(first) = received else {
                        error!("notification channel closed");
                        return Err(PlumberError::SessionLost("notification channel closed".into()));
                    };
                    self.check_lost()?;
                    let mut batch = self.queue.drain(first, self.settings.max_batch);
                    if self.queue.take_overflow() {
                        warn!("notification queue overflowed, resyncing");
                        batch.push(Notification::Resync);
                    }
                    debug!(notifications = batch.len(), "processing batch");
                    self.plumber.process(&batch)?;
                    if batch.contains(&Notification::Resync) {
                        last_resync = Instant::now();
                    }
                }

                _ = poll.tick() => {
                    self.check_lost()?;
                    let overflowed = self.queue.take_overflow();
                    if overflowed {
                        warn!("notification queue overflowed, resyncing");
                    }
                    let due = self
                        .settings
                        .resync_interval
                        .is_some_and(|every| last_resync.elapsed() >= every);
                    if overflowed || due {
                        self.plumber.resync()?;
                        last_resync = Instant::now();
                    }
                }
            }
        }

        Ok(self.plumber.stats().clone())
    }

    fn check_lost(&self) -> Result<(), PlumberError> {
        if !self.queue.is_lost() {
            return Ok(());
        }
        let err = match self.plumber.check_alive() {
            Err(e) => e,
            Ok(()) => PlumberError::SessionLost("server shut the client down".into()),
        };
        error!(error = %err, "session lost");
        Err(err)
    }
}
