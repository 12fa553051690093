use std::path::{Path, PathBuf};

use arcstr::ArcStr;
use fs_err::create_dir_all;
use lively_shared::LivelyError::FileNotFound;
use lively_shared::{LivelyError, LivelyResult, canonicalize_with_strip, url_path_from};
use log::{error, warn};
use parking_lot::RwLock;
use sugar_path::SugarPath;

use crate::channel::{Broadcaster, Message};
use crate::config::{ClientConfig, PipelineConfig};

const DEFAULT_HOSTNAME: &str = "http://localhost:8080";

/// Context holds everything a resolver may touch while handling a change:
/// the canonicalized source and destination roots, the browser target and
/// the broadcast channel.
#[derive(Debug)]
pub struct Context {
    /// The canonicalized root of original sources
    src: PathBuf,
    /// The canonicalized destination (compiled artifact) root
    dest: PathBuf,
    client: RwLock<ClientTarget>,
    broadcaster: Broadcaster,
}

/// Where the running browser page lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTarget {
    /// Origin without a trailing slash, e.g. `http://localhost:8080`.
    pub hostname: ArcStr,
    /// Page the session is showing; artifact URLs are resolved against it.
    pub page_url: ArcStr,
}

impl ClientTarget {
    fn from_config(config: &ClientConfig) -> Self {
        let hostname = trim_trailing_slash(config.hostname.as_deref().unwrap_or(DEFAULT_HOSTNAME));
        let page_url = config
            .page_url
            .clone()
            .unwrap_or_else(|| format!("{}/", hostname));

        Self {
            hostname: hostname.into(),
            page_url: page_url.into(),
        }
    }
}

fn trim_trailing_slash(s: &str) -> String {
    s.strip_suffix('/').unwrap_or(s).to_string()
}

impl Context {
    /// Creates a new Context from the pipeline configuration.
    /// The destination directory is created when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the source root cannot be canonicalized.
    pub fn new(config: &PipelineConfig, broadcaster: Broadcaster) -> LivelyResult<Self> {
        let src = canonicalize_with_strip(&config.src)
            .map_err(|_| FileNotFound(config.src.to_string_lossy().to_string()))?;

        if !config.dest.exists() {
            create_dir_all(&config.dest)?;
        }
        let dest = canonicalize_with_strip(&config.dest)
            .map_err(|_| FileNotFound(config.dest.to_string_lossy().to_string()))?;

        Ok(Self {
            src,
            dest,
            client: RwLock::new(ClientTarget::from_config(&config.client)),
            broadcaster,
        })
    }

    /// Returns a reference to the canonicalized source root.
    #[inline(always)]
    pub fn src(&self) -> &PathBuf {
        &self.src
    }

    /// Returns a reference to the canonicalized destination root.
    #[inline(always)]
    pub fn dest(&self) -> &PathBuf {
        &self.dest
    }

    #[inline(always)]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn client(&self) -> ClientTarget {
        self.client.read().clone()
    }

    /// Browser origin, without a trailing slash.
    pub fn client_hostname(&self) -> ArcStr {
        self.client.read().hostname.clone()
    }

    pub fn client_page_url(&self) -> ArcStr {
        self.client.read().page_url.clone()
    }

    /// Records the page a browser session reported; the hostname follows
    /// the page's origin.
    pub fn set_page_url(&self, page_url: &str) {
        let mut client = self.client.write();
        match url::Url::parse(page_url) {
            Ok(parsed) => {
                client.hostname = trim_trailing_slash(&parsed.origin().ascii_serialization()).into();
                client.page_url = page_url.into();
            }
            Err(e) => warn!("ignoring page url {:?}: {}", page_url, e),
        }
    }

    /// Public URL of an artifact given its destination-relative path.
    pub fn artifact_url(&self, artifact_path: &str) -> String {
        let page_url = self.client_page_url();
        match url::Url::parse(&page_url).and_then(|base| base.join(artifact_path)) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", page_url, artifact_path),
        }
    }

    /// Name under which the browser knows an original source, e.g.
    /// `http://localhost:8080/templates/item.hbs`.
    pub fn resource_name(&self, file_url: &str) -> String {
        format!("{}/{}", self.client_hostname(), file_url)
    }

    /// Source-relative, `/`-separated URL of an original file.
    ///
    /// Paths outside the source root fall back to their full display form.
    pub fn url_for(&self, path: &Path) -> String {
        url_path_from(path, &self.src).unwrap_or_else(|| path.to_slash_lossy().into_owned())
    }

    /// Source-relative URL for a browser-supplied resource URL: strips the
    /// known hostname and any leading slash.
    pub fn relative_url(&self, url: &str) -> String {
        let hostname = self.client_hostname();
        let stripped = url
            .strip_prefix(hostname.as_str())
            .unwrap_or(url)
            .trim_start_matches('/');
        stripped.split(['?', '#']).next().unwrap_or_default().to_string()
    }

    /// Maps a browser-supplied resource URL back onto an original file path.
    pub fn original_path_for_url(&self, url: &str) -> PathBuf {
        self.src.join(self.relative_url(url)).normalize()
    }

    /// Resolves a path relative to the source root.
    pub fn resolve_path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.src.join(path).normalize()
    }

    /// Checks if a path is within the source root (prevents directory traversal).
    pub fn is_within_src(&self, path: &Path) -> bool {
        path.starts_with(&self.src)
    }

    pub fn broadcast(&self, message: Message) {
        self.broadcaster.send(message);
    }

    /// Reports a failed resource to the browser as an `error` message.
    pub fn report_error(&self, resource_url: &str, err: &LivelyError) {
        if err.is_fatal() {
            error!(target: "lively", "{}: {}", resource_url, err);
        } else {
            warn!(target: "lively", "{}: {}", resource_url, err);
        }
        self.broadcast(Message::Error {
            resource_url: resource_url.to_string(),
            contents: err.browser_message(),
        });
    }
}
