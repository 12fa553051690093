use std::path::{Path, PathBuf};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use lively_shared::{LivelyError, LivelyResult, url_path_from};
use sugar_path::SugarPath;

use crate::channel::{Message, PushKind, ResourceUpdate};
use crate::context::Context;
use crate::index::{Artifact, SourceIndex};
use crate::resolver::{Change, Resolver, begin_resolve};
use crate::shell::{expand, run_shell};

/// Recompiles every output derived from a tracked source by running an
/// external command, one `update` per output.
///
/// `cmd` may use `{output}` (absolute output path) and `{url}` (output path
/// relative to the destination root). The command's stdout is the compiled
/// content; when stdout is empty the output file is read instead.
pub struct CommandResolver {
    index: SourceIndex,
    cmd: String,
}

impl CommandResolver {
    pub fn new(index: SourceIndex, cmd: String) -> Self {
        Self { index, cmd }
    }

    async fn compile_output(
        &self,
        output: &Path,
        ctx: &Context,
        kind: PushKind,
        name: &str,
    ) -> LivelyResult {
        let url = url_path_from(output, ctx.dest())
            .unwrap_or_else(|| output.to_slash_lossy().into_owned());
        let output_path = output.to_string_lossy();
        let cmd = expand(
            &self.cmd,
            &[("output", output_path.as_ref()), ("url", url.as_str())],
        );

        let result = run_shell(&cmd, ctx.src()).await?;
        let content = if result.stdout.is_empty() {
            fs_err::tokio::read(output).await?
        } else {
            result.stdout
        };

        let mut map_path = output.as_os_str().to_owned();
        map_path.push(".map");
        let source_map = fs_err::tokio::read_to_string(PathBuf::from(map_path))
            .await
            .ok();

        let mut update = ResourceUpdate::new(ctx.artifact_url(&url), String::from_utf8(content)?)
            .marked(kind, name);
        update.source_map = source_map;
        ctx.broadcast(Message::Update(update));
        Ok(())
    }
}

impl Resolver for CommandResolver {
    fn name(&self) -> &'static str {
        "command"
    }

    fn index(&self) -> Option<&SourceIndex> {
        Some(&self.index)
    }

    fn resolve<'a>(&'a self, change: &'a Change, ctx: &'a Context) -> BoxFuture<'a, LivelyResult> {
        async move {
            let record = self
                .index
                .get(&change.path)
                .ok_or_else(|| LivelyError::FileNotFound(change.url.clone()))?;

            let outputs: Vec<PathBuf> = match &record.lock().artifact {
                Artifact::Outputs(links) => links.iter().map(|l| ctx.dest().join(l)).collect(),
                Artifact::Module { path, .. } => vec![ctx.dest().join(path)],
            };

            let (_, kind) = begin_resolve(&record, &change.path).await?;
            let name = ctx.resource_name(&change.url);

            let results = join_all(
                outputs
                    .iter()
                    .map(|output| self.compile_output(output, ctx, kind, &name)),
            )
            .await;

            for (output, result) in outputs.iter().zip(results) {
                if let Err(e) = result {
                    let url = url_path_from(output, ctx.dest())
                        .unwrap_or_else(|| change.url.clone());
                    ctx.report_error(&url, &e);
                }
            }
            Ok(())
        }
        .boxed()
    }
}
