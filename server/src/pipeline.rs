use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lively_shared::{LivelyError, LivelyResult};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

use crate::channel::{Broadcaster, InboundMessage, Message};
use crate::config::{PipelineConfig, WatchConfig};
use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::edit::{EditHandler, Handled};
use crate::reload::ReloadCoordinator;
use crate::resolver::ResolverRegistry;
use crate::watcher::{FileWatcher, WatchSignal};

const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 2000;

/// Pipeline-level events for the host, distinct from per-resource errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A watch root's backend failed; changes under it may be missed.
    WatchError { root: PathBuf, error: String },
    /// An inbound browser message the pipeline does not handle itself.
    Message(InboundMessage),
}

/// Shared by the change loop and the manual triggers.
struct ChangeHandler {
    ctx: Arc<Context>,
    dispatcher: Dispatcher,
    coordinator: ReloadCoordinator,
    paused: AtomicBool,
    log_changes: bool,
}

impl ChangeHandler {
    fn on_change(&self, path: &Path) {
        if self.paused.load(Ordering::SeqCst) {
            tracing::trace!("paused, dropping change to {}", path.display());
            return;
        }

        let url = self.ctx.url_for(path);
        if self.log_changes {
            info!(target: "lively", "changed: {}", url);
        }
        self.coordinator.notify_change(url);
        self.dispatcher.dispatch(path);
    }
}

/// A running change-propagation pipeline.
///
/// Raw changes fan out to two independent consumers: the [`Dispatcher`]
/// (content updates) and the [`ReloadCoordinator`] (reload signals).
pub struct Pipeline {
    handler: Arc<ChangeHandler>,
    watcher: Mutex<Option<FileWatcher>>,
    inbound: UnboundedSender<InboundMessage>,
    events: broadcast::Sender<PipelineEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    is_closed: AtomicBool,
}

impl Pipeline {
    /// Builds every resolver, starts the watchers and the event loops.
    ///
    /// # Errors
    ///
    /// Fails when the source root is missing, an artifact map cannot be
    /// loaded or a watch root cannot be watched.
    pub fn start(config: PipelineConfig, broadcaster: Broadcaster) -> LivelyResult<Self> {
        let ctx = Arc::new(Context::new(&config, broadcaster.clone())?);
        let registry = Arc::new(ResolverRegistry::from_config(&config.resolvers, ctx.src())?);

        let handler = Arc::new(ChangeHandler {
            ctx: Arc::clone(&ctx),
            dispatcher: Dispatcher::new(Arc::clone(&registry), Arc::clone(&ctx)),
            coordinator: ReloadCoordinator::new(
                config.reload_delay(),
                config.reload_debounce(),
                &config.inject_file_types,
                broadcaster,
            ),
            paused: AtomicBool::new(false),
            log_changes: config.log_file_changes,
        });

        let (watch_tx, watch_rx) = unbounded_channel();
        let mut watcher = FileWatcher::new(watch_tx);
        if config.watchers.is_empty() {
            watcher.watch(&WatchConfig::new(ctx.src()))?;
        } else {
            for watch in &config.watchers {
                watcher.watch(watch)?;
            }
        }

        let (events, _) = broadcast::channel(64);
        let (inbound, inbound_rx) = unbounded_channel();

        let tasks = vec![
            tokio::spawn(Self::change_loop(
                Arc::clone(&handler),
                watch_rx,
                events.clone(),
            )),
            tokio::spawn(Self::inbound_loop(
                EditHandler::new(registry, ctx),
                inbound_rx,
                events.clone(),
            )),
        ];

        Ok(Self {
            handler,
            watcher: Mutex::new(Some(watcher)),
            inbound,
            events,
            tasks: Mutex::new(tasks),
            is_closed: AtomicBool::new(false),
        })
    }

    async fn change_loop(
        handler: Arc<ChangeHandler>,
        mut rx: UnboundedReceiver<WatchSignal>,
        events: broadcast::Sender<PipelineEvent>,
    ) {
        while let Some(signal) = rx.recv().await {
            match signal {
                WatchSignal::Changed(event) => {
                    handler.on_change(&event.absolute(handler.ctx.src()));
                }
                WatchSignal::Failed { root, error } => {
                    error!(target: "lively", "watcher failed for {}: {}", root.display(), error);
                    let _ = events.send(PipelineEvent::WatchError { root, error });
                }
            }
        }
        debug!("change loop finished");
    }

    async fn inbound_loop(
        edits: EditHandler,
        mut rx: UnboundedReceiver<InboundMessage>,
        events: broadcast::Sender<PipelineEvent>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Handled::Unhandled(msg) = edits.handle(msg).await {
                debug!("passing on browser message {:?}", msg.action);
                let _ = events.send(PipelineEvent::Message(msg));
            }
        }
    }

    /// Sender browser sessions push their messages into.
    pub fn inbound(&self) -> &UnboundedSender<InboundMessage> {
        &self.inbound
    }

    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        self.handler.ctx.broadcaster()
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.handler.ctx
    }

    pub fn coordinator(&self) -> &ReloadCoordinator {
        &self.handler.coordinator
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watcher
            .lock()
            .as_ref()
            .map(FileWatcher::watched_paths)
            .unwrap_or_default()
    }

    /// Drops file changes until [`Pipeline::resume`] is called.
    pub fn pause(&self) {
        info!(target: "lively", "paused");
        self.handler.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        info!(target: "lively", "resumed");
        self.handler.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.handler.paused.load(Ordering::SeqCst)
    }

    /// Reloads every connected browser right away.
    pub fn reload(&self) -> LivelyResult {
        self.ensure_not_closed()?;
        self.broadcaster().send(Message::Reload);
        Ok(())
    }

    /// Shows `message` in every connected browser. Empty messages are ignored.
    pub fn notify(&self, message: &str, timeout_ms: Option<u64>) -> LivelyResult {
        self.ensure_not_closed()?;
        if message.is_empty() {
            return Ok(());
        }
        self.broadcaster().send(Message::Notify {
            message: message.to_string(),
            timeout: timeout_ms.unwrap_or(DEFAULT_NOTIFY_TIMEOUT_MS),
        });
        Ok(())
    }

    /// Handles `path` as if the watcher had reported it. Relative paths are
    /// taken from the source root.
    pub fn touch<P: AsRef<Path>>(&self, path: P) -> LivelyResult {
        self.ensure_not_closed()?;
        self.handler
            .on_change(&self.handler.ctx.resolve_path(path.as_ref()));
        Ok(())
    }

    /// Waits for every resolve scheduled so far.
    pub async fn settle(&self) {
        self.handler.dispatcher.drain().await;
    }

    /// Stops watching, ends the event loops, cancels pending reload timers
    /// without firing them and waits for resolves already in flight.
    /// Closing twice is a no-op.
    ///
    /// The loops stop before the drain, so changes still queued from the
    /// watcher are dropped instead of dispatched after close.
    pub async fn close(&self) -> LivelyResult {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.close();
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
            if let Err(e) = task.await
                && e.is_panic()
            {
                warn!("pipeline task panicked: {}", e);
            }
        }

        self.handler.coordinator.close();
        self.handler.dispatcher.drain().await;
        info!(target: "lively", "pipeline closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }

    fn ensure_not_closed(&self) -> LivelyResult {
        if self.is_closed() {
            Err(LivelyError::PipelineClosed)
        } else {
            Ok(())
        }
    }
}
