use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lively_shared::{LivelyError, LivelyResult, normalize_extension};
use serde::Deserialize;

/// Top-level configuration, as read from `lively.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LivelyConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
}

impl LivelyConfig {
    /// Reads and validates a TOML config file.
    ///
    /// Relative paths inside the file are resolved against the file's own
    /// directory, so a config can be used from any working directory.
    pub fn load<P: AsRef<Path>>(path: P) -> LivelyResult<Self> {
        let path = path.as_ref();
        let raw = fs_err::read_to_string(path)?;
        let mut config: LivelyConfig = toml::from_str(&raw)?;

        if let Some(dir) = path.parent() {
            config.pipeline.rebase(dir);
        }
        config.pipeline.validate()?;
        Ok(config)
    }
}

/// Configuration for the server, including host and port settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The IP address or hostname where the server will bind.
    pub host: String,
    /// The TCP port on which the server will listen to.
    pub port: u16,
    /// Route on which browser sessions open their WebSocket.
    pub ws_path: String,
}

impl ServerConfig {
    /// Creates a new `ServerConfig` with default values:
    /// host: `127.0.0.1`, port: `8080`, ws path: `/__lively`.
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ws_path: "/__lively".to_string(),
        }
    }

    /// Returns a reference to the current host.
    #[inline(always)]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the configured port.
    #[inline(always)]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns a new `ServerConfig` with the specified port.
    #[must_use]
    #[inline(always)]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Returns a new `ServerConfig` with the specified host.
    #[must_use]
    #[inline(always)]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    /// Returns the full address in the format `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the change-propagation pipeline needs to run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the original, human-authored sources.
    pub src: PathBuf,
    /// Root of the compiled artifact tree resolvers write into.
    pub dest: PathBuf,
    /// Resolver per file extension.
    pub resolvers: BTreeMap<String, ResolverConfig>,
    pub watchers: Vec<WatchConfig>,
    /// Batch debounce before a reload decision is made.
    pub reload_delay_ms: u64,
    /// Window in which at most one full reload is sent.
    pub reload_debounce_ms: u64,
    /// Extensions a browser can hot-swap without navigating.
    pub inject_file_types: Vec<String>,
    pub log_file_changes: bool,
    pub client: ClientConfig,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self {
            src: PathBuf::from("."),
            dest: PathBuf::from("."),
            resolvers: BTreeMap::new(),
            watchers: Vec::new(),
            reload_delay_ms: 100,
            reload_debounce_ms: 250,
            inject_file_types: ["css", "png", "jpg", "jpeg", "svg", "gif", "webp", "map"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            log_file_changes: true,
            client: ClientConfig::default(),
        }
    }

    #[must_use]
    pub fn with_src<P: Into<PathBuf>>(mut self, src: P) -> Self {
        self.src = src.into();
        self
    }

    #[must_use]
    pub fn with_dest<P: Into<PathBuf>>(mut self, dest: P) -> Self {
        self.dest = dest.into();
        self
    }

    /// Registers a resolver for `ext` (with or without the leading dot).
    #[must_use]
    pub fn with_resolver(mut self, ext: &str, resolver: ResolverConfig) -> Self {
        self.resolvers.insert(normalize_extension(ext), resolver);
        self
    }

    #[must_use]
    pub fn with_watcher(mut self, watcher: WatchConfig) -> Self {
        self.watchers.push(watcher);
        self
    }

    #[must_use]
    pub fn with_reload_delay(mut self, delay: Duration) -> Self {
        self.reload_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_reload_debounce(mut self, debounce: Duration) -> Self {
        self.reload_debounce_ms = debounce.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_inject_file_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inject_file_types = types
            .into_iter()
            .map(|t| normalize_extension(t.as_ref()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    #[inline(always)]
    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }

    #[inline(always)]
    pub fn reload_debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }

    /// Joins every relative path in the config onto `dir`.
    pub fn rebase(&mut self, dir: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };

        rebase(&mut self.src);
        rebase(&mut self.dest);
        for watcher in &mut self.watchers {
            rebase(&mut watcher.root);
        }
        for resolver in self.resolvers.values_mut() {
            if let Some(map) = resolver.map_mut() {
                rebase(map);
            }
        }
    }

    /// Normalizes extension keys and rejects configs that cannot run.
    pub fn validate(&mut self) -> LivelyResult {
        let resolvers = std::mem::take(&mut self.resolvers);
        for (ext, resolver) in resolvers {
            let ext = normalize_extension(&ext);
            if ext.is_empty() {
                return Err(LivelyError::Config("resolver registered for an empty extension".into()));
            }
            if let ResolverConfig::Command { cmd, .. } = &resolver
                && cmd.trim().is_empty()
            {
                return Err(LivelyError::Config(format!("command resolver for .{ext} has no cmd")));
            }
            self.resolvers.insert(ext, resolver);
        }

        for ty in &mut self.inject_file_types {
            *ty = normalize_extension(ty);
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-extension resolver settings, tagged by the `resolver` key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "resolver", rename_all = "lowercase")]
pub enum ResolverConfig {
    /// Template precompile: source becomes a module wrapping a compiled template.
    Handlebars {
        map: PathBuf,
        /// Module the generated code requires for the template runtime.
        runtime: Option<String>,
        reload: Option<bool>,
    },
    /// Bundler module replacement: source is re-wrapped as-is.
    #[serde(alias = "browserify")]
    Bundle { map: PathBuf },
    /// Runs `cmd` once per derived output listed in the map.
    #[serde(alias = "sass")]
    Command { map: PathBuf, cmd: String },
    /// Runs `cmd` (if any) and tells the browser to re-fetch.
    Exec {
        cmd: Option<String>,
        #[serde(default)]
        reload: bool,
    },
}

impl ResolverConfig {
    /// Path of the artifact map this resolver loads at startup, if any.
    pub fn map(&self) -> Option<&Path> {
        match self {
            ResolverConfig::Handlebars { map, .. }
            | ResolverConfig::Bundle { map }
            | ResolverConfig::Command { map, .. } => Some(map),
            ResolverConfig::Exec { .. } => None,
        }
    }

    fn map_mut(&mut self) -> Option<&mut PathBuf> {
        match self {
            ResolverConfig::Handlebars { map, .. }
            | ResolverConfig::Bundle { map }
            | ResolverConfig::Command { map, .. } => Some(map),
            ResolverConfig::Exec { .. } => None,
        }
    }
}

/// One watched root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchConfig {
    pub root: PathBuf,
    /// Globs relative to `root`; empty means every file.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub use_watchman: bool,
    #[serde(default)]
    pub use_file_polling: bool,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default)]
    pub watch_dot_files: bool,
}

fn default_polling_interval_ms() -> u64 {
    100
}

impl WatchConfig {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            files: Vec::new(),
            use_watchman: false,
            use_file_polling: false,
            polling_interval_ms: default_polling_interval_ms(),
            watch_dot_files: false,
        }
    }

    #[must_use]
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_polling(mut self, interval: Duration) -> Self {
        self.use_file_polling = true;
        self.polling_interval_ms = interval.as_millis() as u64;
        self
    }

    #[inline(always)]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

/// Initial browser target, until a session reports its own page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub hostname: Option<String>,
    pub page_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 9000

        [pipeline]
        src = "app"
        dest = "public"
        reload_delay_ms = 50
        inject_file_types = [".CSS", "png"]

        [pipeline.resolvers.".hbs"]
        resolver = "handlebars"
        map = "build/templates.json"

        [pipeline.resolvers.scss]
        resolver = "sass"
        map = "build/styles.json"
        cmd = "sassc {output}"

        [pipeline.resolvers.ts]
        resolver = "exec"
        cmd = "make"
        reload = true

        [[pipeline.watchers]]
        root = "app"
        files = ["**/*.hbs", "**/*.scss"]
        use_file_polling = true
    "#;

    #[test]
    fn parses_full_config() {
        let mut config: LivelyConfig = toml::from_str(SAMPLE).unwrap();
        config.pipeline.validate().unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.reload_delay(), Duration::from_millis(50));
        assert_eq!(config.pipeline.reload_debounce_ms, 250);
        assert_eq!(config.pipeline.inject_file_types, vec!["css", "png"]);

        let hbs = &config.pipeline.resolvers["hbs"];
        assert_eq!(hbs.map(), Some(Path::new("build/templates.json")));
        assert!(matches!(
            config.pipeline.resolvers["scss"],
            ResolverConfig::Command { .. }
        ));
        assert_eq!(
            config.pipeline.resolvers["ts"],
            ResolverConfig::Exec {
                cmd: Some("make".into()),
                reload: true
            }
        );

        let watcher = &config.pipeline.watchers[0];
        assert!(watcher.use_file_polling);
        assert_eq!(watcher.polling_interval(), Duration::from_millis(100));
        assert!(!watcher.watch_dot_files);
    }

    #[test]
    fn rebase_joins_relative_paths() {
        let mut config: LivelyConfig = toml::from_str(SAMPLE).unwrap();
        config.pipeline.rebase(Path::new("/project"));

        assert_eq!(config.pipeline.src, PathBuf::from("/project/app"));
        assert_eq!(config.pipeline.dest, PathBuf::from("/project/public"));
        assert_eq!(config.pipeline.watchers[0].root, PathBuf::from("/project/app"));
        assert_eq!(
            config.pipeline.resolvers[".hbs"].map(),
            Some(Path::new("/project/build/templates.json"))
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        let mut config = PipelineConfig::new().with_resolver(
            "scss",
            ResolverConfig::Command {
                map: "m.json".into(),
                cmd: "  ".into(),
            },
        );
        assert!(matches!(config.validate(), Err(LivelyError::Config(_))));
    }

    #[test]
    fn load_reads_file_relative_to_its_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lively.toml");
        fs_err::write(&path, "[pipeline]\nsrc = \"site\"\n").unwrap();

        let config = LivelyConfig::load(&path).unwrap();
        assert_eq!(config.pipeline.src, dir.path().join("site"));
        assert_eq!(config.server.address(), "127.0.0.1:8080");
    }
}
