//! Change feed built on repeated registry snapshots.
//!
//! The registry offers no subscription primitive, so a [`Watcher`] polls the
//! full application listing on a fixed interval, diffs it against the
//! previous listing and reports one [`Event`] per instance that appeared,
//! changed or disappeared.
//!
//! Events are delivered through a single-slot channel. The polling task waits
//! for every event to be received before it moves on, so a consumer that stops
//! reading also stops the polling.


use crate::registry::{Application, Instance, Registry};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Registered,
    Deregistered,
    /// Status, metadata or address of a known instance changed.
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub instance: Instance,
}

impl Event {
    fn new(kind: EventKind, instance: Instance) -> Self {
        Self { kind, instance }
    }
}

/// Last observed instances, keyed by application name and instance id.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    instances: BTreeMap<String, Instance>,
}

impl Snapshot {
    /// Events leading from this snapshot to `apps`, and the snapshot of `apps`.
    pub(crate) fn diff(&self, apps: &[Application]) -> (Vec<Event>, Snapshot) {
        let mut previous = self.instances.clone();
        let mut current = BTreeMap::new();
        let mut events = Vec::new();

        for app in apps {
            for instance in &app.instances {
                let key = key(app, instance);

                match previous.remove(&key) {
                    None => events.push(Event::new(EventKind::Registered, instance.clone())),
                    Some(prev) if prev != *instance => {
                        events.push(Event::new(EventKind::Updated, instance.clone()))
                    }
                    Some(_) => {}
                }

                current.insert(key, instance.clone());
            }
        }

        // whatever was not matched above is gone
        events.extend(
            previous
                .into_values()
                .map(|instance| Event::new(EventKind::Deregistered, instance)),
        );

        (events, Snapshot { instances: current })
    }

    pub(crate) fn len(&self) -> usize {
        self.instances.len()
    }
}

// instance ids are only unique within an application
fn key(app: &Application, instance: &Instance) -> String {
    format!("{}-{}", app.name, instance.instance_id)
}

pub struct Watcher {
    events: mpsc::Receiver<Event>,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Watcher {
    /// Starts polling `source` right away; the first fetch happens one
    /// interval after creation.
    pub fn new<R>(source: R, poll_interval: Duration) -> Self
    where
        R: Registry + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let handle = tokio::spawn(poll(source, poll_interval, events_tx, stop_rx));

        Self {
            events: events_rx,
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Next observed change. Returns `None` once the watcher has stopped and
    /// all delivered events were consumed.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Stops polling. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_tx.is_none() || self.handle.is_finished()
    }

    /// Stops polling and waits for the polling task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        let _ = (&mut self.handle).await;
    }
}

async fn poll<R: Registry>(
    source: R,
    period: Duration,
    events: mpsc::Sender<Event>,
    mut stop: mpsc::Receiver<()>,
) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut snapshot = Snapshot::default();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let fetched = tokio::select! {
                    fetched = source.apps() => fetched,
                    _ = stop.recv() => {
                        info!("Stopping watcher");
                        return;
                    }
                };

                let apps = match fetched {
                    Ok(apps) => apps,
                    Err(e) => {
                        debug!("Skipping poll cycle, failed to fetch applications: {:#}", e);
                        continue;
                    }
                };

                let (changes, next) = snapshot.diff(&apps);
                debug!(changes = changes.len(), instances = next.len(), "Polled registry");

                for event in changes {
                    tokio::select! {
                        sent = events.send(event) => {
                            if sent.is_err() {
                                info!("Event receiver dropped, stopping watcher");
                                return;
                            }
                        }
                        _ = stop.recv() => {
                            info!("Stopping watcher");
                            return;
                        }
                    }
                }

                snapshot = next;
            }
            _ = stop.recv() => {
                info!("Stopping watcher");
                return;
            }
        }
    }
}
