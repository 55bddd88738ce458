//! Runs a [`DuelSession`] on a tokio task.
//!
//! The session itself is synchronous and never blocks. [`SessionDriver`] owns it on a
//! background task and multiplexes its three triggers with `tokio::select!`:
//!
//! - intents sent through [`SessionDriver::send_intent`],
//! - a poll interval that drains the frame channel and advances timers,
//! - a shutdown signal.
//!
//! After every trigger the driver publishes a fresh [`SessionSnapshot`] on a watch channel
//! and forwards queued [`DuelEvent`]s to a bounded event channel.
//!
//! ```no_run
//! use captcha_duel::driver::{DriverConfig, SessionDriver};
//! use captcha_duel::{Intent, SessionBuilder};
//!
//! # async fn run() -> Result<(), captcha_duel::DuelError> {
//! let session = SessionBuilder::new().build()?;
//! let mut driver = SessionDriver::spawn(session, DriverConfig::default());
//! driver.send_intent(Intent::StartLocalMatch)?;
//! while let Some(event) = driver.next_event().await {
//!     if let Some(cue) = event.sound_cue() {
//!         // hand the cue to the audio layer
//! #       let _ = cue;
//!     }
//! }
//! let _session = driver.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use web_time::{Duration, Instant};

use crate::{DuelError, DuelEvent, DuelResult, DuelSession, Intent, SessionSnapshot};

/// Settings for [`SessionDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// How often the channel is drained and timers advanced.
    pub poll_interval: Duration,
    /// Capacity of the event channel. Clamped to at least 1.
    pub event_capacity: usize,
    /// How long [`SessionDriver::shutdown`] waits for the task.
    pub shutdown_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            event_capacity: 64,
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Handle to a session running on a background task.
pub struct SessionDriver {
    intents: mpsc::UnboundedSender<Intent>,
    events: mpsc::Receiver<DuelEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<DuelSession>>,
    shutdown_timeout: Duration,
}

impl SessionDriver {
    /// Moves `session` onto a new tokio task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use = "dropping the driver stops the session"]
    pub fn spawn(session: DuelSession, config: DriverConfig) -> Self {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot(clock_now()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(drive(
            session,
            intent_rx,
            event_tx,
            snapshot_tx,
            shutdown_rx,
            config.poll_interval,
        ));

        Self {
            intents: intent_tx,
            events: event_rx,
            snapshots: snapshot_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Queues a user intent.
    ///
    /// # Errors
    /// - Returns [`DuelError::Channel`] if the driver task has stopped.
    pub fn send_intent(&self, intent: Intent) -> DuelResult<()> {
        self.intents.send(intent).map_err(|err| DuelError::Channel {
            context: format!("driver stopped, {:?} not delivered", err.0),
        })
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that is notified whenever a new snapshot is published.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Waits for the next session event. Returns `None` once the task has stopped and all
    /// events were received.
    pub async fn next_event(&mut self) -> Option<DuelEvent> {
        self.events.recv().await
    }

    /// Stops the task and hands the session back.
    ///
    /// # Errors
    /// - Returns [`DuelError::Channel`] if the task panicked or did not stop in time.
    pub async fn shutdown(mut self) -> DuelResult<DuelSession> {
        debug!("session driver shutdown requested");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return Err(DuelError::Channel {
                context: "driver task already gone".to_owned(),
            });
        };
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(join_err)) => Err(DuelError::Channel {
                context: format!("driver task failed: {join_err}"),
            }),
            Err(_) => {
                warn!("driver task did not stop in time; aborting");
                task.abort();
                Err(DuelError::Channel {
                    context: "driver task did not stop in time".to_owned(),
                })
            },
        }
    }
}

impl std::fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("state", &self.snapshots.borrow().state)
            .field("has_task", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Reads the clock through tokio so a paused test runtime drives the session too.
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn drive(
    mut session: DuelSession,
    mut intents: mpsc::UnboundedReceiver<Intent>,
    events: mpsc::Sender<DuelEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    mut shutdown_rx: oneshot::Receiver<()>,
    poll_interval: Duration,
) -> DuelSession {
    debug!("session driver started");
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            intent = intents.recv() => match intent {
                Some(intent) => {
                    if let Err(err) = session.apply_intent(intent, clock_now()) {
                        warn!("intent rejected: {err}");
                    }
                },
                None => {
                    debug!("intent channel closed, stopping driver");
                    break;
                },
            },
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                break;
            },
            _ = poll.tick() => {
                let now = clock_now();
                session.poll_remote(now);
                session.tick(now);
            },
        }
        publish(&mut session, &events, &snapshots);
    }

    debug!("session driver exited");
    session
}

fn publish(
    session: &mut DuelSession,
    events: &mpsc::Sender<DuelEvent>,
    snapshots: &watch::Sender<SessionSnapshot>,
) {
    for event in session.events() {
        match events.try_send(event) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping {dropped:?}");
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {},
        }
    }
    let snapshot = session.snapshot(clock_now());
    snapshots.send_if_modified(|current| {
        if *current == snapshot {
            false
        } else {
            *current = snapshot;
            true
        }
    });
}
