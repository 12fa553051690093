mod cli;
mod logger;

use crate::cli::{Cli, Commands};
use crate::logger::LOGGER;
use clap::Parser;
use lively_server::channel::create_channel;
use lively_server::config::LivelyConfig;
use lively_server::{Pipeline, PipelineEvent, Server};
use lively_shared::Context;
use log::{LevelFilter, error, info};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = "lively.toml";

#[tokio::main]
async fn main() -> lively_shared::Result<()> {
    let cli = Cli::parse();

    // Map verbosity count (-v, -vv) to log levels
    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log_level))
        .map_err(|e| lively_shared::anyhow!("Failed to set logger: {e}"))?;

    match cli.command {
        Commands::Dev {
            config,
            host,
            port,
            src,
        } => {
            let mut config = load_config(config)?;
            if let Some(host) = host {
                config.server = config.server.with_host(host);
            }
            if let Some(port) = port {
                config.server = config.server.with_port(port);
            }
            if let Some(src) = src {
                config.pipeline.src = src;
            }
            if config.pipeline.client.hostname.is_none() {
                config.pipeline.client.hostname =
                    Some(format!("http://{}", config.server.address()));
            }

            info!(target: "lively", "initializing...");

            let pipeline = Pipeline::start(config.pipeline, create_channel())
                .context("Failed to start the pipeline")?;

            let mut events = pipeline.events();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        PipelineEvent::WatchError { root, error } => {
                            error!(target: "lively", "watching {} failed: {}", root.display(), error)
                        }
                        PipelineEvent::Message(msg) => {
                            info!(target: "lively", "browser says {}: {:?}", msg.action, msg.extra)
                        }
                    }
                }
            });

            let server = Server::new(config.server, &pipeline);
            let result = server
                .serve_with_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!(target: "lively", "shutting down...");
                })
                .await;

            pipeline.close().await?;
            result?;
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> lively_shared::Result<LivelyConfig> {
    match path {
        Some(path) => LivelyConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).is_file() => {
            LivelyConfig::load(DEFAULT_CONFIG).context("Failed to load lively.toml")
        }
        None => Ok(LivelyConfig::default()),
    }
}
