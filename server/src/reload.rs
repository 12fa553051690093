use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use lively_shared::{extension_of, normalize_extension};
use log::debug;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::channel::{Broadcaster, Message};

/// Where the coordinator is between two flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A batch is collecting changes until the flush timer fires.
    FlushScheduled,
}

/// Outcome of a flushed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Every path can be hot-swapped; one signal per path.
    Inject(Vec<String>),
    FullReload,
}

/// Classifies a batch: a single non-injectable path makes it a full reload.
pub fn classify(batch: &[String], injectable: &HashSet<String>) -> Classification {
    let all_injectable = batch.iter().all(|url| {
        let ext = extension_of(std::path::Path::new(url));
        !ext.is_empty() && injectable.contains(&ext)
    });

    if all_injectable {
        Classification::Inject(batch.to_vec())
    } else {
        Classification::FullReload
    }
}

#[derive(Default)]
struct State {
    batch: Vec<String>,
    flush: Option<JoinHandle<()>>,
    full_reload: Option<JoinHandle<()>>,
    closed: bool,
}

struct Inner {
    delay: Duration,
    debounce: Duration,
    injectable: HashSet<String>,
    broadcaster: Broadcaster,
    state: Mutex<State>,
}

/// Turns bursts of raw change notifications into reload signals.
///
/// Two timers, each with at most one live instance: the batch timer
/// (`delay`) collects changes until a flush, and the full-reload timer
/// (`debounce`) absorbs every full-reload-worthy flush that lands while
/// it is pending.
#[derive(Clone)]
pub struct ReloadCoordinator {
    inner: Arc<Inner>,
}

impl ReloadCoordinator {
    pub fn new<I, S>(
        delay: Duration,
        debounce: Duration,
        injectable: I,
        broadcaster: Broadcaster,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            inner: Arc::new(Inner {
                delay,
                debounce,
                injectable: injectable
                    .into_iter()
                    .map(|ext| normalize_extension(ext.as_ref()))
                    .collect(),
                broadcaster,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Adds a changed source URL to the current batch, starting the batch
    /// timer when none is pending.
    pub fn notify_change(&self, url: impl Into<String>) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.batch.push(url.into());

        if state.flush.is_none() {
            let inner = Arc::clone(&self.inner);
            state.flush = Some(tokio::spawn(async move {
                tokio::time::sleep(inner.delay).await;
                inner.flush();
            }));
        }
    }

    pub fn phase(&self) -> Phase {
        if self.inner.state.lock().flush.is_some() {
            Phase::FlushScheduled
        } else {
            Phase::Idle
        }
    }

    pub fn full_reload_pending(&self) -> bool {
        self.inner.state.lock().full_reload.is_some()
    }

    /// Cancels both timers without firing them and drops the batch. Later
    /// notifications are ignored.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.batch.clear();
        if let Some(flush) = state.flush.take() {
            flush.abort();
        }
        if let Some(full_reload) = state.full_reload.take() {
            full_reload.abort();
        }
    }
}

impl Inner {
    fn flush(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.flush = None;
        if state.closed {
            return;
        }
        let batch = std::mem::take(&mut state.batch);

        match classify(&batch, &self.injectable) {
            Classification::Inject(paths) => {
                for path in paths {
                    debug!("injecting {}", path);
                    self.broadcaster.send(Message::FileReload { path });
                }
            }
            Classification::FullReload => {
                if state.full_reload.is_some() {
                    debug!("full reload already scheduled, {} changes absorbed", batch.len());
                    return;
                }
                let inner = Arc::clone(self);
                state.full_reload = Some(tokio::spawn(async move {
                    tokio::time::sleep(inner.debounce).await;
                    inner.fire_full_reload();
                }));
            }
        }
    }

    fn fire_full_reload(&self) {
        let mut state = self.state.lock();
        state.full_reload = None;
        if state.closed {
            return;
        }
        debug!("full reload");
        self.broadcaster.send(Message::Reload);
    }
}
