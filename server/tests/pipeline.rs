use std::path::Path;
use std::time::Duration;

use lively_server::channel::{InboundMessage, Message, ResourceUpdate, create_channel};
use lively_server::config::{PipelineConfig, ResolverConfig, WatchConfig};
use lively_server::{Pipeline, PipelineEvent};
use lively_shared::LivelyError;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::broadcast::Receiver;
use tokio::time::timeout;

const ITEM_URL: &str = "http://localhost:8080/templates/item.hbs";

/// Source tree with one tracked template. The only watch root is an empty
/// side directory so every change in these tests is fed in explicitly.
fn project() -> (TempDir, PipelineConfig) {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs_err::create_dir_all(src.join("templates")).unwrap();
    fs_err::create_dir_all(dir.path().join("unwatched")).unwrap();
    fs_err::create_dir_all(src.join("css")).unwrap();
    fs_err::write(src.join("templates/item.hbs"), "<p>{{title}}</p>").unwrap();
    fs_err::write(src.join("css/site.css"), "body {}").unwrap();

    let map = dir.path().join("templates.json");
    fs_err::write(
        &map,
        r#"[{"index": "templates/item.hbs", "src": "js/bundle.js", "line": "_m1 = function(require,module,exports){"}]"#,
    )
    .unwrap();

    let config = PipelineConfig::new()
        .with_src(&src)
        .with_dest(dir.path().join("public"))
        .with_resolver(
            "hbs",
            ResolverConfig::Handlebars {
                map,
                runtime: None,
                reload: None,
            },
        )
        .with_watcher(WatchConfig::new(dir.path().join("unwatched")));
    (dir, config)
}

async fn next_update(rx: &mut Receiver<Message>) -> ResourceUpdate {
    loop {
        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Ok(Message::Update(update))) => return update,
            Ok(Ok(_)) => continue,
            other => panic!("no update received: {other:?}"),
        }
    }
}

async fn next_sync(rx: &mut Receiver<Message>) -> (String, String) {
    loop {
        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Ok(Message::Sync {
                resource_url,
                content,
                ..
            })) => return (resource_url, content),
            Ok(Ok(_)) => continue,
            other => panic!("no sync received: {other:?}"),
        }
    }
}

/// Everything broadcast during the next `window`.
async fn collect_for(rx: &mut Receiver<Message>, window: Duration) -> Vec<Message> {
    let mut out = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(msg)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        out.push(msg);
    }
    out
}

/// Pipeline watching its own source root, with short reload timers.
async fn watching_src() -> (TempDir, Pipeline) {
    let (dir, mut config) = project();
    config.watchers.clear();
    let config = config
        .with_reload_delay(Duration::from_millis(50))
        .with_reload_debounce(Duration::from_millis(100));
    let pipeline = Pipeline::start(config, create_channel()).unwrap();
    // Let the backend settle before the first write.
    tokio::time::sleep(Duration::from_millis(150)).await;
    (dir, pipeline)
}

async fn wait_for_content(path: &Path, expected: &str) {
    for _ in 0..100 {
        if fs_err::read_to_string(path).is_ok_and(|c| c == expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never became {:?}", path.display(), expected);
}

#[tokio::test]
async fn browser_round_trip() {
    let (_dir, config) = project();
    let pipeline = Pipeline::start(config, create_channel()).unwrap();
    let mut rx = pipeline.broadcaster().subscribe();
    let source = pipeline.context().src().join("templates/item.hbs");

    // First observation asks the browser for a baseline.
    pipeline.touch("templates/item.hbs").unwrap();
    pipeline.settle().await;
    let update = next_update(&mut rx).await;
    assert_eq!(update.sync.as_deref(), Some(ITEM_URL));
    assert_eq!(update.reload, Some(true));
    assert!(pipeline.context().dest().join("js/bundle.js").is_file());

    // The browser acknowledges and gets what was pushed.
    pipeline
        .inbound()
        .send(InboundMessage::new("sync").with_url(ITEM_URL))
        .unwrap();
    assert_eq!(
        next_sync(&mut rx).await,
        ("templates/item.hbs".to_string(), "<p>{{title}}</p>".to_string())
    );

    // An edit made in the browser lands on disk and is pushed back by name.
    pipeline
        .inbound()
        .send(
            InboundMessage::new("update")
                .with_url(ITEM_URL)
                .with_content("<p>{{name}}</p>"),
        )
        .unwrap();
    wait_for_content(&source, "<p>{{name}}</p>").await;

    pipeline.touch(&source).unwrap();
    pipeline.settle().await;
    let update = next_update(&mut rx).await;
    assert_eq!(update.sync, None);
    assert_eq!(update.resource_name.as_deref(), Some(ITEM_URL));
    assert!(
        update
            .content
            .unwrap()
            .contains("Handlebars.compile(\"<p>{{name}}</p>\")")
    );

    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn untracked_edit_is_ignored() {
    let (_dir, config) = project();
    let pipeline = Pipeline::start(config, create_channel()).unwrap();
    let mut rx = pipeline.broadcaster().subscribe();

    pipeline
        .inbound()
        .send(
            InboundMessage::new("update")
                .with_url("/vendor/lib.js")
                .with_content("alert(1)"),
        )
        .unwrap();
    // A sync for the untracked path goes through the same loop, after the update.
    pipeline
        .inbound()
        .send(InboundMessage::new("sync").with_url("/vendor/lib.js"))
        .unwrap();
    pipeline
        .inbound()
        .send(InboundMessage::new("sync").with_url(ITEM_URL))
        .unwrap();

    let (url, content) = next_sync(&mut rx).await;
    assert_eq!(url, "templates/item.hbs");
    assert_eq!(content, "");
    assert!(!pipeline.context().src().join("vendor/lib.js").exists());
    while let Ok(msg) = rx.try_recv() {
        assert!(!matches!(msg, Message::Error { .. }), "unexpected {msg:?}");
    }

    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn unknown_browser_messages_become_events() {
    let (_dir, config) = project();
    let pipeline = Pipeline::start(config, create_channel()).unwrap();
    let mut events = pipeline.events();

    pipeline.inbound().send(InboundMessage::new("ping")).unwrap();
    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, PipelineEvent::Message(InboundMessage::new("ping")));

    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn paused_pipeline_drops_changes() {
    let (_dir, config) = project();
    let pipeline = Pipeline::start(config, create_channel()).unwrap();
    let mut rx = pipeline.broadcaster().subscribe();

    pipeline.pause();
    assert!(pipeline.is_paused());
    pipeline.touch("templates/item.hbs").unwrap();
    pipeline.settle().await;
    assert!(rx.try_recv().is_err());

    pipeline.resume();
    pipeline.touch("templates/item.hbs").unwrap();
    pipeline.settle().await;
    assert!(next_update(&mut rx).await.sync.is_some());

    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn manual_triggers_and_close() {
    let (_dir, config) = project();
    let pipeline = Pipeline::start(config, create_channel()).unwrap();
    let mut rx = pipeline.broadcaster().subscribe();

    pipeline.notify("", None).unwrap();
    pipeline.notify("rebuilt", None).unwrap();
    pipeline.reload().unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        Message::Notify {
            message: "rebuilt".into(),
            timeout: 2000
        }
    );
    assert_eq!(rx.try_recv().unwrap(), Message::Reload);

    pipeline.close().await.unwrap();
    pipeline.close().await.unwrap();
    assert!(pipeline.is_closed());
    assert!(pipeline.watched_paths().is_empty());
    assert!(matches!(pipeline.reload(), Err(LivelyError::PipelineClosed)));
}

#[tokio::test]
async fn missing_artifact_map_fails_start() {
    let (dir, config) = project();
    let config = config.with_resolver(
        "js",
        ResolverConfig::Bundle {
            map: dir.path().join("missing.json"),
        },
    );
    assert!(Pipeline::start(config, create_channel()).is_err());
}

#[tokio::test]
async fn default_watch_root_is_the_source_root() {
    let (_dir, mut config) = project();
    config.watchers.clear();
    let pipeline = Pipeline::start(config, create_channel()).unwrap();
    assert_eq!(pipeline.watched_paths(), vec![pipeline.context().src().clone()]);
    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn tracked_file_change_updates_then_reloads_once() {
    let (_dir, pipeline) = watching_src().await;
    let mut rx = pipeline.broadcaster().subscribe();
    let source = pipeline.context().src().join("templates/item.hbs");

    fs_err::write(&source, "<p>{{name}}</p>").unwrap();

    let mut updates = Vec::new();
    loop {
        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Ok(Message::Update(update))) => updates.push(update),
            Ok(Ok(Message::Reload)) => break,
            Ok(Ok(other)) => panic!("unexpected {other:?}"),
            other => panic!("no reload received: {other:?}"),
        }
    }
    // The first observation of the file asks the browser for a baseline.
    let first = updates.first().expect("reload arrived before any update");
    assert_eq!(first.sync.as_deref(), Some(ITEM_URL));

    let rest = collect_for(&mut rx, Duration::from_millis(400)).await;
    assert!(
        !rest.iter().any(|msg| *msg == Message::Reload),
        "reloaded more than once: {rest:?}"
    );

    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn stylesheet_change_is_injected_without_reload() {
    let (_dir, pipeline) = watching_src().await;
    let mut rx = pipeline.broadcaster().subscribe();

    fs_err::write(pipeline.context().src().join("css/site.css"), "body { color: red }").unwrap();

    let messages = collect_for(&mut rx, Duration::from_millis(600)).await;
    assert!(
        messages
            .iter()
            .any(|msg| *msg == Message::FileReload { path: "css/site.css".into() }),
        "no file-reload in {messages:?}"
    );
    assert!(!messages.contains(&Message::Reload), "unexpected reload in {messages:?}");

    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn nothing_is_pushed_after_close() {
    let (_dir, pipeline) = watching_src().await;
    let mut rx = pipeline.broadcaster().subscribe();
    let source = pipeline.context().src().join("templates/item.hbs");

    for i in 0..5 {
        fs_err::write(&source, format!("<p>{i}</p>")).unwrap();
    }
    pipeline.close().await.unwrap();
    while rx.try_recv().is_ok() {}

    let late = collect_for(&mut rx, Duration::from_millis(400)).await;
    assert!(late.is_empty(), "pushed after close: {late:?}");
    assert!(matches!(pipeline.touch(&source), Err(LivelyError::PipelineClosed)));
}
