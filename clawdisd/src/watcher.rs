//! Refcounted permission polling for UI observers.
//!
//! The watcher holds the last known grant snapshot behind a `watch` channel.
//! Polling only runs while at least one observer is registered; the timer is
//! torn down on the last unregister. Polls are debounced to a minimum gap and
//! overlapping polls collapse into one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clawdis_ipc::{Capability, PermissionSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::authorizer::CapabilityAuthorizer;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MIN_POLL_GAP: Duration = Duration::from_millis(500);

pub struct PermissionWatcher {
    authorizer: Arc<dyn CapabilityAuthorizer>,
    snapshot: watch::Sender<PermissionSnapshot>,
    inner: Mutex<WatcherInner>,
    in_flight: AtomicBool,
}

struct WatcherInner {
    registrations: usize,
    timer: Option<JoinHandle<()>>,
    last_poll: Option<Instant>,
}

impl PermissionWatcher {
    pub fn new(authorizer: Arc<dyn CapabilityAuthorizer>) -> Arc<Self> {
        let (snapshot, _) = watch::channel(PermissionSnapshot::new());
        Arc::new(PermissionWatcher {
            authorizer,
            snapshot,
            inner: Mutex::new(WatcherInner {
                registrations: 0,
                timer: None,
                last_poll: None,
            }),
            in_flight: AtomicBool::new(false),
        })
    }

    /// Observe snapshot changes. The initial value is empty until the first
    /// poll lands.
    pub fn subscribe(&self) -> watch::Receiver<PermissionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Add one observer. The first registration starts the poll timer and
    /// forces an immediate poll.
    pub fn register(self: &Arc<Self>) {
        let mut inner = self.inner.lock().unwrap();
        inner.registrations += 1;
        if inner.registrations > 1 {
            return;
        }

        debug!("starting permission polling");
        let watcher = Arc::clone(self);
        inner.timer = Some(tokio::spawn(async move {
            watcher.poll(true).await;
            let mut ticks = tokio::time::interval(POLL_INTERVAL);
            // The first tick fires immediately; the forced poll covered it.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                watcher.poll(false).await;
            }
        }));
    }

    /// Drop one observer. The last unregister stops the timer.
    pub fn unregister(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.registrations == 0 {
            return;
        }
        inner.registrations -= 1;
        if inner.registrations > 0 {
            return;
        }

        debug!("stopping permission polling");
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.last_poll = None;
    }

    /// Whether the poll timer is currently running.
    pub fn is_polling(&self) -> bool {
        self.inner.lock().unwrap().registrations > 0
    }

    /// Poll immediately, ignoring the debounce gap.
    pub async fn refresh(&self) {
        self.poll(true).await;
    }

    async fn poll(&self, force: bool) {
        {
            let mut inner = self.inner.lock().unwrap();
            if !force {
                if let Some(last) = inner.last_poll {
                    if last.elapsed() < MIN_POLL_GAP {
                        return;
                    }
                }
            }
            inner.last_poll = Some(Instant::now());
        }

        // Collapse overlapping polls; a slow OS probe must not pile up.
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return;
        }
        // The timer task is aborted on the last unregister, which can cancel
        // a poll while it is awaiting the probe. Clearing on drop keeps the
        // flag honest across that cancellation.
        let _in_flight = ClearOnDrop(&self.in_flight);

        match self.authorizer.status(&Capability::ALL).await {
            Ok(snapshot) => {
                self.snapshot.send_if_modified(|current| {
                    if *current == snapshot {
                        false
                    } else {
                        *current = snapshot;
                        true
                    }
                });
            }
            Err(err) => {
                // Keep the previous snapshot rather than publishing a guess.
                debug!("permission probe failed, keeping last snapshot: {err}");
            }
        }
    }
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
