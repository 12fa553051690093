use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use lively_shared::{LivelyError, LivelyResult, canonicalize_with_strip};
use log::{info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use sugar_path::SugarPath;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::WatchConfig;

/// A change under one watch root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Changed path, relative to `root`.
    pub relative: PathBuf,
    /// Absolute watch root the change was seen under.
    pub root: PathBuf,
}

impl WatchEvent {
    /// Absolute path of the change: the root's position inside `src`, then
    /// the relative path under it.
    pub fn absolute(&self, src: &Path) -> PathBuf {
        src.join(self.root.relative(src))
            .join(&self.relative)
            .normalize()
    }
}

/// What the watcher reports to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Changed(WatchEvent),
    /// The backend of a root failed; the root may no longer be watched.
    Failed { root: PathBuf, error: String },
}

/// Decides which raw paths under a root are reported.
///
/// Filters by:
/// - Globs relative to the root (no globs means every file)
/// - Dot files and dot directories, unless enabled
/// - Temporary/backup files (always filtered)
#[derive(Debug)]
pub struct RootFilter {
    root: PathBuf,
    globs: Option<GlobSet>,
    watch_dot_files: bool,
}

impl RootFilter {
    pub fn new(root: PathBuf, files: &[String], watch_dot_files: bool) -> LivelyResult<Self> {
        let globs = if files.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in files {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        Ok(Self {
            root,
            globs,
            watch_dot_files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `path` relative to the root, if it should be reported.
    pub fn accept(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.root).ok()?;

        let file_name = relative.file_name()?.to_str()?;
        if is_temporary_file(file_name) {
            return None;
        }

        if !self.watch_dot_files && has_dot_component(relative) {
            return None;
        }

        if let Some(globs) = &self.globs
            && !globs.is_match(relative)
        {
            return None;
        }

        Some(relative.to_path_buf())
    }

    /// Converts one raw backend result into signals on `tx`.
    pub fn handle(&self, res: notify::Result<Event>, tx: &UnboundedSender<WatchSignal>) {
        match res {
            Ok(event) => {
                for path in changed_paths(&event) {
                    tracing::trace!("raw event {:?} {}", event.kind, path.display());
                    if let Some(relative) = self.accept(path) {
                        let _ = tx.send(WatchSignal::Changed(WatchEvent {
                            relative,
                            root: self.root.clone(),
                        }));
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(WatchSignal::Failed {
                    root: self.root.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Paths of `event` that now hold changed content. A rename only reports
/// its destination; the source path no longer exists.
fn changed_paths(event: &Event) -> &[PathBuf] {
    match event.kind {
        EventKind::Create(_) => &event.paths,
        EventKind::Modify(ModifyKind::Metadata(_)) => &[],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => &[],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.len() {
            0 => &[],
            n => &event.paths[n - 1..],
        },
        EventKind::Modify(_) => &event.paths,
        _ => &[],
    }
}

fn has_dot_component(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => name.to_str().is_some_and(|n| n.starts_with('.')),
        _ => false,
    })
}

#[inline]
fn is_temporary_file(file_name: &str) -> bool {
    // Editor backup files
    if file_name.ends_with('~')
        || file_name.ends_with(".swp")
        || file_name.ends_with(".swo")
        || file_name.ends_with(".swx")
    {
        return true;
    }

    // Emacs auto-save files
    if file_name.starts_with('#') && file_name.ends_with('#') {
        return true;
    }

    if file_name.starts_with(".~") || file_name.ends_with(".tmp") || file_name.ends_with(".temp") {
        return true;
    }

    // JetBrains safe-write files
    if file_name.starts_with("___")
        || file_name.ends_with("___jb_tmp___")
        || file_name.ends_with("___jb_old___")
    {
        return true;
    }

    file_name.ends_with(".bak") || file_name.ends_with(".backup")
}

enum Backend {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

impl Backend {
    fn watch(&mut self, path: &Path) -> notify::Result<()> {
        match self {
            Backend::Native(w) => w.watch(path, RecursiveMode::Recursive),
            Backend::Poll(w) => w.watch(path, RecursiveMode::Recursive),
        }
    }
}

struct WatchedRoot {
    // Dropping the backend stops watching.
    _backend: Backend,
    filter: Arc<RootFilter>,
}

/// Watches any number of roots and reports normalized changes on one channel.
///
/// ```no_run
/// use lively_server::config::WatchConfig;
/// use lively_server::watcher::{FileWatcher, WatchSignal};
///
/// # async fn run() -> lively_shared::LivelyResult {
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// let mut watcher = FileWatcher::new(tx);
/// watcher.watch(&WatchConfig::new("./src").with_files(["**/*.hbs"]))?;
///
/// while let Some(WatchSignal::Changed(event)) = rx.recv().await {
///     println!("changed: {}", event.relative.display());
/// }
/// # Ok(())
/// # }
/// ```
pub struct FileWatcher {
    tx: UnboundedSender<WatchSignal>,
    roots: Vec<WatchedRoot>,
}

impl FileWatcher {
    pub fn new(tx: UnboundedSender<WatchSignal>) -> Self {
        Self {
            tx,
            roots: Vec::new(),
        }
    }

    pub fn watch(&mut self, config: &WatchConfig) -> LivelyResult {
        let root = canonicalize_with_strip(&config.root)
            .map_err(|_| LivelyError::FileNotFound(config.root.display().to_string()))?;
        let filter = Arc::new(RootFilter::new(
            root.clone(),
            &config.files,
            config.watch_dot_files,
        )?);

        if config.use_watchman {
            warn!("watchman is not supported, using the native watcher for {}", root.display());
        }

        let handler_filter = Arc::clone(&filter);
        let tx = self.tx.clone();
        let handler = move |res: notify::Result<Event>| handler_filter.handle(res, &tx);

        let mut backend = if config.use_file_polling {
            let config = Config::default().with_poll_interval(config.polling_interval());
            Backend::Poll(PollWatcher::new(handler, config)?)
        } else {
            Backend::Native(RecommendedWatcher::new(handler, Config::default())?)
        };
        backend
            .watch(&root)
            .map_err(|e| LivelyError::Watcher(format!("Failed to watch {}: {}", root.display(), e)))?;

        info!(target: "lively", "watching {}", root.display());
        self.roots.push(WatchedRoot {
            _backend: backend,
            filter,
        });
        Ok(())
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.roots
            .iter()
            .map(|r| r.filter.root().to_path_buf())
            .collect()
    }

    /// Stops every root.
    pub fn close(&mut self) {
        for root in self.roots.drain(..) {
            info!(target: "lively", "stop watching {}", root.filter.root().display());
        }
    }
}
