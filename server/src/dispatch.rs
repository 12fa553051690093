use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::resolver::{Change, ResolverRegistry};

/// Runs resolvers for changed paths.
///
/// Changes to different paths resolve concurrently. Changes to the same
/// path run one after another in arrival order: each task waits for the
/// previous task of its path before touching the record.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ResolverRegistry>,
    ctx: Arc<Context>,
    inflight: Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ResolverRegistry>, ctx: Arc<Context>) -> Self {
        Self {
            registry,
            ctx,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedules a resolve of `path`. Failures are reported to the browser
    /// as `error` messages and never surface here.
    pub fn dispatch(&self, path: &Path) {
        let change = Change {
            path: path.to_path_buf(),
            url: self.ctx.url_for(path),
        };
        let resolver = self.registry.lookup(path);
        let ctx = Arc::clone(&self.ctx);

        let mut inflight = self.inflight.lock();
        inflight.retain(|_, handle| !handle.is_finished());
        let previous = inflight.remove(path);

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }

            debug!("{} resolving {}", resolver.name(), change.url);
            if let Err(e) = resolver.resolve(&change, &ctx).await {
                ctx.report_error(&change.url, &e);
            }
        });
        inflight.insert(path.to_path_buf(), handle);
    }

    /// Waits until every scheduled resolve has finished.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<_> = {
                let mut inflight = self.inflight.lock();
                inflight.drain().map(|(_, handle)| handle).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    error!(target: "lively", "resolver task panicked: {}", e);
                }
            }
        }
    }
}
