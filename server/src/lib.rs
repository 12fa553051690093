pub mod channel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod edit;
pub mod index;
pub mod pipeline;
pub mod reload;
pub mod resolver;
pub mod server;
mod shell;
pub mod watcher;

pub use pipeline::{Pipeline, PipelineEvent};
pub use server::Server;
