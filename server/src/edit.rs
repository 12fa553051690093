use std::sync::Arc;

use lively_shared::LivelyError;
use log::{debug, info};

use crate::channel::{InboundMessage, Message};
use crate::context::Context;
use crate::resolver::ResolverRegistry;

/// Applies browser-originated messages to the source tree.
///
/// Only tracked sources are ever written or answered; messages about other
/// resources are dropped without a reply.
pub struct EditHandler {
    registry: Arc<ResolverRegistry>,
    ctx: Arc<Context>,
}

/// What became of an inbound message.
#[derive(Debug, PartialEq)]
pub enum Handled {
    Done,
    /// Not a message this handler knows; passed on to host listeners.
    Unhandled(InboundMessage),
}

impl EditHandler {
    pub fn new(registry: Arc<ResolverRegistry>, ctx: Arc<Context>) -> Self {
        Self { registry, ctx }
    }

    pub async fn handle(&self, msg: InboundMessage) -> Handled {
        match msg.action.as_str() {
            "update" => {
                self.update(&msg).await;
                Handled::Done
            }
            "sync" => {
                self.sync(&msg);
                Handled::Done
            }
            "page" => {
                if let Some(url) = &msg.url {
                    self.ctx.set_page_url(url);
                }
                Handled::Done
            }
            _ => Handled::Unhandled(msg),
        }
    }

    /// Writes browser-edited content back onto the original file.
    ///
    /// The content is seeded as the record's cache first, so the resolve
    /// triggered by the write pushes exactly what the browser sent.
    async fn update(&self, msg: &InboundMessage) {
        let (Some(url), Some(content)) = (msg.url.as_deref(), msg.content.as_deref()) else {
            debug!("ignoring edit without url or content");
            return;
        };
        let path = self.ctx.original_path_for_url(url);
        let Some(record) = self.registry.record_for(&path) else {
            debug!("ignoring edit of untracked {}", url);
            return;
        };
        if !self.ctx.is_within_src(&path) {
            return;
        }

        let content = content.as_bytes().to_vec();
        record.lock().seed_cache(content.clone());

        match fs_err::tokio::write(&path, &content).await {
            Ok(()) => info!(target: "lively", "saved browser edit to {}", path.display()),
            Err(e) => {
                record.lock().take_cached();
                self.ctx
                    .report_error(&self.ctx.relative_url(url), &LivelyError::from(e));
            }
        }
    }

    /// Answers a browser's request for the content last pushed for a
    /// resource. The pending value is consumed.
    fn sync(&self, msg: &InboundMessage) {
        let Some(url) = msg.url.as_deref() else {
            return;
        };
        let path = self.ctx.original_path_for_url(url);
        let Some(record) = self.registry.record_for(&path) else {
            debug!("ignoring sync of untracked {}", url);
            return;
        };

        let pending = record.lock().take_pending().unwrap_or_default();
        self.ctx.broadcast(Message::Sync {
            resource_url: self.ctx.relative_url(url),
            content: String::from_utf8_lossy(&pending).into_owned(),
            resource_name: Some(url.to_string()),
        });
    }
}
