mod command;
mod exec;
mod passthrough;
pub mod sourcemap;
mod template;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use lively_shared::{LivelyResult, extension_of, normalize_extension};
use log::debug;

pub use command::*;
pub use exec::*;
pub use passthrough::*;
pub use template::*;

use crate::channel::PushKind;
use crate::config::ResolverConfig;
use crate::context::Context;
use crate::index::{SharedRecord, SourceIndex};

/// A changed original source, as handed to a resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Absolute path of the original file.
    pub path: PathBuf,
    /// Source-relative, `/`-separated URL of the same file.
    pub url: String,
}

/// Turns one changed source into outbound messages and/or compiled artifacts.
///
/// All side effects go through the [`Context`]: artifact writes under
/// `ctx.dest()` and messages through `ctx.broadcast`. A returned error is
/// reported to the browser as an `error` message for `change.url`; it never
/// reaches the watch loop.
pub trait Resolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Index of tracked sources, for resolvers that keep one.
    fn index(&self) -> Option<&SourceIndex> {
        None
    }

    /// Whether this resolver takes `path`; untracked paths go to the fallback.
    fn handles(&self, path: &Path) -> bool {
        self.index().is_none_or(|index| index.contains(path))
    }

    fn resolve<'a>(&'a self, change: &'a Change, ctx: &'a Context) -> BoxFuture<'a, LivelyResult>;
}

/// Starts a resolve over `record`: takes the single-use cache (or reads the
/// file), stores the result as the pending sync value and says how the
/// outgoing message is to be marked.
///
/// A read is a first load (`Sync`) unless the previous push is still
/// pending, in which case the browser already holds a baseline (`Named`).
pub(crate) async fn begin_resolve(
    record: &SharedRecord,
    path: &Path,
) -> LivelyResult<(Vec<u8>, PushKind)> {
    let (cached, had_pending) = {
        let mut record = record.lock();
        (record.take_cached(), record.pending().is_some())
    };

    let (content, kind) = match cached {
        Some(content) => (content, PushKind::Named),
        None => {
            let content = fs_err::tokio::read(path).await?;
            let kind = if had_pending {
                PushKind::Named
            } else {
                PushKind::Sync
            };
            (content, kind)
        }
    };

    record.lock().set_pending(content.clone());
    Ok((content, kind))
}

/// Extension-keyed resolver lookup with a passthrough fallback.
pub struct ResolverRegistry {
    by_extension: HashMap<String, Arc<dyn Resolver>>,
    fallback: Arc<dyn Resolver>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self {
            by_extension: HashMap::new(),
            fallback: Arc::new(PassthroughResolver),
        }
    }

    /// Builds every configured resolver, loading their artifact maps.
    ///
    /// # Errors
    ///
    /// A missing or malformed map is fatal: the pipeline cannot run without it.
    pub fn from_config<'a, I>(resolvers: I, src_root: &Path) -> LivelyResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a ResolverConfig)>,
    {
        let mut registry = Self::new();
        for (ext, config) in resolvers {
            let resolver: Arc<dyn Resolver> = match config {
                ResolverConfig::Handlebars {
                    map,
                    runtime,
                    reload,
                } => Arc::new(TemplateResolver::handlebars(
                    SourceIndex::load(map, src_root)?,
                    runtime.clone(),
                    reload.or(Some(true)),
                )),
                ResolverConfig::Bundle { map } => {
                    Arc::new(TemplateResolver::bundle(SourceIndex::load(map, src_root)?))
                }
                ResolverConfig::Command { map, cmd } => Arc::new(CommandResolver::new(
                    SourceIndex::load(map, src_root)?,
                    cmd.clone(),
                )),
                ResolverConfig::Exec { cmd, reload } => {
                    Arc::new(ExecResolver::new(cmd.clone(), *reload))
                }
            };
            debug!("registered {} resolver for .{}", resolver.name(), ext);
            registry.register(ext, resolver);
        }
        Ok(registry)
    }

    pub fn register(&mut self, ext: &str, resolver: Arc<dyn Resolver>) {
        self.by_extension.insert(normalize_extension(ext), resolver);
    }

    /// Resolver registered for the extension of `path`, tracked or not.
    pub fn for_extension_of(&self, path: &Path) -> Option<&Arc<dyn Resolver>> {
        self.by_extension.get(&extension_of(path))
    }

    /// Resolver to run for `path`: the registered one when it handles the
    /// path, the passthrough otherwise.
    pub fn lookup(&self, path: &Path) -> Arc<dyn Resolver> {
        match self.for_extension_of(path) {
            Some(resolver) if resolver.handles(path) => Arc::clone(resolver),
            _ => Arc::clone(&self.fallback),
        }
    }

    /// Record of `path` in its extension resolver's index.
    pub fn record_for(&self, path: &Path) -> Option<SharedRecord> {
        self.for_extension_of(path)?.index()?.get(path)
    }

    pub fn extensions(&self) -> impl Iterator<Item = &String> {
        self.by_extension.keys()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
