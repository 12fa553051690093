use futures::FutureExt;
use futures::future::BoxFuture;
use lively_shared::LivelyResult;

use crate::channel::{Message, ResourceUpdate};
use crate::context::Context;
use crate::resolver::{Change, Resolver};

/// Fallback resolver: pushes the raw file content, writes nothing.
pub struct PassthroughResolver;

impl Resolver for PassthroughResolver {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn resolve<'a>(&'a self, change: &'a Change, ctx: &'a Context) -> BoxFuture<'a, LivelyResult> {
        async move {
            let content = fs_err::tokio::read(&change.path).await?;
            ctx.broadcast(Message::Update(ResourceUpdate::new(
                change.url.clone(),
                String::from_utf8_lossy(&content),
            )));
            Ok(())
        }
        .boxed()
    }
}
