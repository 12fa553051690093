use futures::FutureExt;
use futures::future::BoxFuture;
use lively_shared::{LivelyError, LivelyResult};
use log::debug;

use crate::channel::{Message, ResourceUpdate};
use crate::context::Context;
use crate::index::{Artifact, SourceIndex};
use crate::resolver::{Change, Resolver, begin_resolve, sourcemap};

/// Source-to-module transform applied before wrapping.
pub trait Transform: Send + Sync {
    fn transform(&self, source: &str) -> LivelyResult<String>;
}

/// Compiles a Handlebars template into a CommonJS module.
pub struct HandlebarsTransform {
    runtime: String,
}

impl HandlebarsTransform {
    pub fn new(runtime: Option<String>) -> Self {
        Self {
            runtime: runtime.unwrap_or_else(|| "handlebars".to_string()),
        }
    }
}

impl Transform for HandlebarsTransform {
    fn transform(&self, source: &str) -> LivelyResult<String> {
        let runtime = serde_json::to_string(&self.runtime)?;
        let template = serde_json::to_string(source)?;
        Ok(format!(
            "var Handlebars = require({runtime});\nmodule.exports = Handlebars.compile({template});\n"
        ))
    }
}

/// Bundled modules are re-wrapped as written.
pub struct BundleTransform;

impl Transform for BundleTransform {
    fn transform(&self, source: &str) -> LivelyResult<String> {
        Ok(source.to_string())
    }
}

/// Rewrites the module of a tracked source inside its compiled bundle and
/// pushes the new module body to the browser.
pub struct TemplateResolver {
    name: &'static str,
    index: SourceIndex,
    transform: Box<dyn Transform>,
    reload: Option<bool>,
}

impl TemplateResolver {
    pub fn new(
        name: &'static str,
        index: SourceIndex,
        transform: Box<dyn Transform>,
        reload: Option<bool>,
    ) -> Self {
        Self {
            name,
            index,
            transform,
            reload,
        }
    }

    pub fn handlebars(index: SourceIndex, runtime: Option<String>, reload: Option<bool>) -> Self {
        Self::new(
            "handlebars",
            index,
            Box::new(HandlebarsTransform::new(runtime)),
            reload,
        )
    }

    pub fn bundle(index: SourceIndex) -> Self {
        Self::new("bundle", index, Box::new(BundleTransform), None)
    }

    /// Wraps transformed output in the record's anchor and a closing brace,
    /// followed by an inline source map pointing at the original file.
    fn compose(&self, anchor: &str, file_url: &str, source: &str) -> LivelyResult<String> {
        let transformed = self.transform.transform(source)?;
        let map = sourcemap::inline_comment(&format!("/{}", file_url), &transformed, 1)?;
        Ok(format!("{anchor}\n{transformed}\n}}{map}"))
    }
}

impl Resolver for TemplateResolver {
    fn name(&self) -> &'static str {
        self.name
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

            let (artifact_path, anchor) = match &record.lock().artifact {
                Artifact::Module { path, anchor } => (path.clone(), anchor.clone()),
                Artifact::Outputs(_) => {
                    return Err(LivelyError::Config(format!(
                        "{} is mapped to derived outputs, not a module",
                        change.url
                    )));
                }
            };

            let (source, kind) = begin_resolve(&record, &change.path).await?;
            let source = String::from_utf8(source)?;
            let content = self.compose(&anchor, &change.url, &source)?;

            let artifact = ctx.dest().join(&artifact_path);
            if let Some(parent) = artifact.parent() {
                fs_err::tokio::create_dir_all(parent).await?;
            }
            fs_err::tokio::write(&artifact, &content).await?;
            debug!("wrote {} for {}", artifact.display(), change.url);

            ctx.broadcast(Message::Update(
                ResourceUpdate::new(ctx.artifact_url(&artifact_path), content)
                    .marked(kind, ctx.resource_name(&change.url))
                    .with_reload(self.reload),
            ));
            Ok(())
        }
        .boxed()
    }
}
