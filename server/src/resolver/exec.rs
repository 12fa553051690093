use futures::FutureExt;
use futures::future::BoxFuture;
use lively_shared::LivelyResult;

use crate::channel::{Message, ResourceUpdate};
use crate::context::Context;
use crate::resolver::{Change, Resolver};
use crate::shell::run_shell;

/// Ignores content: runs a command (typically a build tool that owns the
/// output) and then tells the browser to re-fetch.
pub struct ExecResolver {
    cmd: Option<String>,
    reload: bool,
}

impl ExecResolver {
    pub fn new(cmd: Option<String>, reload: bool) -> Self {
        Self {
            cmd: cmd.filter(|c| !c.trim().is_empty()),
            reload,
        }
    }
}

impl Resolver for ExecResolver {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn resolve<'a>(&'a self, _change: &'a Change, ctx: &'a Context) -> BoxFuture<'a, LivelyResult> {
        async move {
            if let Some(cmd) = &self.cmd {
                run_shell(cmd, ctx.src()).await?;
            }
            ctx.broadcast(Message::Update(
                ResourceUpdate::default().with_reload(Some(self.reload)),
            ));
            Ok(())
        }
        .boxed()
    }
}
