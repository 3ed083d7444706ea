//! The watch loop: raw `notify` events in, catalog updates out.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, info_span, warn};

use super::handler::LocationHandler;
use crate::error::MonitorError;

/// How long the first half of a split rename waits for its second half.
pub const RENAME_WINDOW: Duration = Duration::from_millis(500);

/// One monitored location, driven on its own thread.
pub struct LocationMonitor {
    handler: LocationHandler,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl LocationMonitor {
    pub fn new(handler: LocationHandler, poll_interval: Duration, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            handler,
            poll_interval,
            shutdown,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<Result<(), MonitorError>>> {
        let name = format!("monitor-{}", self.handler.location().id);
        std::thread::Builder::new().name(name).spawn(move || self.run())
    }

    fn watcher(&self, tx: crossbeam_channel::Sender<notify::Result<Event>>) -> Result<Box<dyn Watcher>, MonitorError> {
        let root = self.handler.location().root().to_path_buf();
        let to_error = |e: notify::Error| MonitorError::Watch {
            path: root.clone(),
            reason: e.to_string(),
        };
        let forward = move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        };

        let mut watcher: Box<dyn Watcher> = if self.handler.location().network {
            let config = NotifyConfig::default().with_poll_interval(self.poll_interval);
            Box::new(PollWatcher::new(forward, config).map_err(to_error)?)
        } else {
            Box::new(RecommendedWatcher::new(forward, NotifyConfig::default()).map_err(to_error)?)
        };
        watcher.watch(&root, RecursiveMode::Recursive).map_err(to_error)?;
        Ok(watcher)
    }

    /// Scans the location once, then processes events until shutdown.
    pub fn run(self) -> Result<(), MonitorError> {
        let location = self.handler.location().clone();
        let span = info_span!("monitor", location = location.id, root = %location.root_path);
        let _guard = span.enter();

        let (tx, rx) = unbounded();
        // Subscribe before the scan so nothing created during it is lost.
        let _watcher = self.watcher(tx)?;
        self.handler.initial_scan()?;

        info!(
            "Watching {} ({})",
            location.root_path,
            if location.network { "polling" } else { "native events" }
        );

        let mut renames = RenamePairing::new(RENAME_WINDOW);
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(event)) => {
                    debug!("Event {:?} on {:?}", event.kind, event.paths);
                    let actions = renames.actions(&event, Instant::now());
                    self.apply(actions);
                }
                Ok(Err(e)) => warn!("Watch error: {}", e),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.apply(renames.expire(Instant::now()));
        }
        self.apply(renames.flush());

        info!("Stopped watching {}", location.root_path);
        Ok(())
    }

    fn apply(&self, actions: Vec<Action>) {
        for action in actions {
            let result = match &action {
                Action::Upsert(path) => self.handler.upsert(path),
                Action::Remove(path) => self.handler.remove(path),
                Action::Rename(from, to) => self.handler.rename(from, to),
            };
            if let Err(e) = result {
                warn!("Failed to apply {:?}: {}", action, e);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Upsert(PathBuf),
    Remove(PathBuf),
    Rename(PathBuf, PathBuf),
}

/// Joins the `From` and `To` halves of a rename that share a tracker, so a
/// moved entry keeps its catalog record.
///
/// A `From` is held back until its `To` arrives. If none arrives within the
/// window the entry left the location and is removed. Once a pair has been
/// turned into a rename, the combined `Both` event for the same tracker is
/// dropped.
#[derive(Debug)]
pub struct RenamePairing {
    window: Duration,
    pending: HashMap<usize, (PathBuf, Instant)>,
    paired: HashMap<usize, Instant>,
}

impl RenamePairing {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            paired: HashMap::new(),
        }
    }

    pub fn actions(&mut self, event: &Event, now: Instant) -> Vec<Action> {
        let (EventKind::Modify(ModifyKind::Name(mode)), Some(tracker)) = (&event.kind, event.tracker()) else {
            return actions_for(event);
        };

        match mode {
            RenameMode::From if event.paths.len() == 1 => {
                self.pending.insert(tracker, (event.paths[0].clone(), now));
                Vec::new()
            }
            RenameMode::To if event.paths.len() == 1 => match self.pending.remove(&tracker) {
                Some((from, _)) => {
                    self.paired.insert(tracker, now);
                    vec![Action::Rename(from, event.paths[0].clone())]
                }
                None => actions_for(event),
            },
            RenameMode::Both if self.paired.remove(&tracker).is_some() => Vec::new(),
            RenameMode::Both => {
                self.pending.remove(&tracker);
                actions_for(event)
            }
            _ => actions_for(event),
        }
    }

    /// Removes held-back entries whose rename never completed.
    pub fn expire(&mut self, now: Instant) -> Vec<Action> {
        let window = self.window;
        self.paired.retain(|_, at| now.duration_since(*at) < window);

        let mut expired: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= window)
            .map(|(tracker, _)| *tracker)
            .collect();
        expired.sort_unstable();
        expired
            .into_iter()
            .filter_map(|tracker| self.pending.remove(&tracker))
            .map(|(path, _)| Action::Remove(path))
            .collect()
    }

    /// Everything still held back, as removals.
    pub fn flush(&mut self) -> Vec<Action> {
        self.paired.clear();
        self.pending.drain().map(|(_, (path, _))| Action::Remove(path)).collect()
    }
}

/// Catalog actions for one raw event taken on its own.
pub fn actions_for(event: &Event) -> Vec<Action> {
    let each = |f: fn(PathBuf) -> Action| -> Vec<Action> { event.paths.iter().cloned().map(f).collect() };

    match &event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Remove(_) => each(Action::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![Action::Rename(event.paths[0].clone(), event.paths[1].clone())]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(Action::Remove),
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() {
                    Action::Upsert(p.clone())
                } else {
                    Action::Remove(p.clone())
                }
            })
            .collect(),
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any | EventKind::Other => each(Action::Upsert),
    }
}
