mod ws;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use ws::*;

/// Outbound message fanned out to every connected browser session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum Message {
    /// New content for a resource the browser already has loaded.
    #[serde(rename = "update")]
    Update(ResourceUpdate),

    /// Answer to a browser-initiated request for a resource's current content.
    #[serde(rename = "sync")]
    Sync {
        #[serde(rename = "resourceURL")]
        resource_url: String,
        content: String,
        #[serde(rename = "resourceName", skip_serializing_if = "Option::is_none")]
        resource_name: Option<String>,
    },

    /// A resolver failed for the given resource.
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "resourceURL")]
        resource_url: String,
        contents: String,
    },

    /// Reload the whole page.
    #[serde(rename = "reload")]
    Reload,

    /// Hot-swap a single injectable resource.
    #[serde(rename = "file-reload")]
    FileReload { path: String },

    #[serde(rename = "notify")]
    Notify { message: String, timeout: u64 },

    #[serde(rename = "connected")]
    Connected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceUpdate {
    #[serde(rename = "resourceURL", skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "sourceMap", skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
    /// Set on a first load: the browser should store this content as its baseline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<String>,
    /// Set when pushing content that already reflects an applied edit.
    #[serde(rename = "resourceName", skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reload: Option<bool>,
}

/// How an outgoing `update` is marked for the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    /// First observation: ask the browser to acknowledge with a `sync`.
    Sync,
    /// Content already known to the round trip: push it under its name.
    Named,
}

impl ResourceUpdate {
    pub fn new(resource_url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            resource_url: Some(resource_url.into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Marks the update with `name` either as a `sync` request or as a `resourceName`.
    #[must_use]
    pub fn marked(mut self, kind: PushKind, name: impl Into<String>) -> Self {
        match kind {
            PushKind::Sync => self.sync = Some(name.into()),
            PushKind::Named => self.resource_name = Some(name.into()),
        }
        self
    }

    #[must_use]
    pub fn with_reload(mut self, reload: Option<bool>) -> Self {
        self.reload = reload;
        self
    }
}

/// Message received from a browser session: `{action, url, content}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Anything else the browser sent, kept for host-side listeners.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InboundMessage {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            url: None,
            content: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Sending half of the browser fan-out.
///
/// Sending never fails: with no session connected the message is dropped.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Message>,
}

impl Broadcaster {
    pub fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            log::trace!("no browser session connected, message dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tx.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub fn create_channel() -> Broadcaster {
    let (tx, _) = broadcast::channel(256);
    Broadcaster { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn update_serializes_with_wire_names() {
        let msg = Message::Update(
            ResourceUpdate::new("http://localhost:8080/js/app.js", "body")
                .marked(PushKind::Sync, "http://localhost:8080/templates/item.hbs"),
        );
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "action": "update",
                "resourceURL": "http://localhost:8080/js/app.js",
                "content": "body",
                "sync": "http://localhost:8080/templates/item.hbs",
            })
        );
    }

    #[test]
    fn bare_update_carries_only_reload_hint() {
        let msg = Message::Update(ResourceUpdate::default().with_reload(Some(true)));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "action": "update", "reload": true })
        );
    }

    #[test]
    fn reload_signals_serialize() {
        assert_eq!(
            serde_json::to_value(Message::Reload).unwrap(),
            json!({ "action": "reload" })
        );
        assert_eq!(
            serde_json::to_value(Message::FileReload { path: "css/site.css".into() }).unwrap(),
            json!({ "action": "file-reload", "path": "css/site.css" })
        );
        assert_eq!(
            serde_json::to_value(Message::Error {
                resource_url: "a.hbs".into(),
                contents: "boom".into()
            })
            .unwrap(),
            json!({ "action": "error", "resourceURL": "a.hbs", "contents": "boom" })
        );
    }

    #[test]
    fn inbound_keeps_unknown_fields() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"action":"ping","url":"/x","ts":42}"#).unwrap();
        assert_eq!(msg.action, "ping");
        assert_eq!(msg.url.as_deref(), Some("/x"));
        assert_eq!(msg.content, None);
        assert_eq!(msg.extra["ts"], json!(42));
    }

    #[test]
    fn send_without_sessions_is_silent() {
        let broadcaster = create_channel();
        broadcaster.send(Message::Reload);
        assert_eq!(broadcaster.session_count(), 0);

        let mut rx = broadcaster.subscribe();
        broadcaster.send(Message::Connected);
        assert_eq!(rx.try_recv().unwrap(), Message::Connected);
    }
}
