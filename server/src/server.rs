use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use lively_shared::LivelyResult;
use log::info;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;

use crate::channel::{Broadcaster, InboundMessage, ws_handler};
use crate::config::ServerConfig;
use crate::pipeline::Pipeline;

/// Carries browser sessions to and from a [`Pipeline`] over WebSockets.
pub struct Server {
    config: ServerConfig,
    broadcaster: Broadcaster,
    inbound: UnboundedSender<InboundMessage>,
}

impl Server {
    pub fn new(config: ServerConfig, pipeline: &Pipeline) -> Self {
        Self {
            config,
            broadcaster: pipeline.broadcaster().clone(),
            inbound: pipeline.inbound().clone(),
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[inline(always)]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    #[inline(always)]
    pub fn inbound(&self) -> &UnboundedSender<InboundMessage> {
        &self.inbound
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(&self.config.ws_path, get(ws_handler))
            .with_state(self)
    }

    pub async fn serve(self) -> LivelyResult {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serves until `signal` completes.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> LivelyResult
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tcp = TcpListener::bind(self.config.address()).await?;
        info!(
            target: "lively",
            "listening on ws://{}{}",
            self.config.address(),
            self.config.ws_path
        );

        let app = Arc::new(self).router();
        axum::serve(tcp, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(Into::into)
    }
}
