use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lively_shared::{LivelyResult, canonicalize_with_strip};
use log::debug;
use parking_lot::Mutex;
use serde::Deserialize;
use sugar_path::SugarPath;

/// What a tracked source compiles into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A single module inside a compiled bundle.
    Module {
        /// Destination-relative path of the artifact.
        path: String,
        /// Line the artifact opens with (e.g. a module-wrapper header).
        anchor: String,
    },
    /// Several compiled outputs derived from one source (e.g. stylesheets
    /// importing a shared partial).
    Outputs(Vec<PathBuf>),
}

/// Per-source synchronization state.
///
/// `cached_content` is single-use: taking it leaves the record empty so the
/// next resolve reads from disk. `pending_sync` holds the last content sent
/// to the browser and is replaced, never appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub artifact: Artifact,
    cached_content: Option<Vec<u8>>,
    pending_sync: Option<Vec<u8>>,
}

impl SourceRecord {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            cached_content: None,
            pending_sync: None,
        }
    }

    pub fn take_cached(&mut self) -> Option<Vec<u8>> {
        self.cached_content.take()
    }

    /// Stores content a producer (a browser edit or an upstream compiler)
    /// has just written, so the next resolve does not re-read it from disk.
    pub fn seed_cache(&mut self, content: Vec<u8>) {
        self.cached_content = Some(content);
    }

    pub fn has_cached(&self) -> bool {
        self.cached_content.is_some()
    }

    pub fn set_pending(&mut self, content: Vec<u8>) {
        self.pending_sync = Some(content);
    }

    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        self.pending_sync.take()
    }

    pub fn pending(&self) -> Option<&[u8]> {
        self.pending_sync.as_deref()
    }
}

pub type SharedRecord = Arc<Mutex<SourceRecord>>;

/// One entry of a static artifact map written by the upstream compiler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MapEntry {
    Module {
        index: String,
        src: String,
        line: String,
    },
    Outputs {
        index: String,
        links: Vec<String>,
    },
}

impl MapEntry {
    fn index(&self) -> &str {
        match self {
            MapEntry::Module { index, .. } | MapEntry::Outputs { index, .. } => index,
        }
    }

    fn into_artifact(self) -> Artifact {
        match self {
            MapEntry::Module { src, line, .. } => Artifact::Module {
                path: src,
                anchor: line,
            },
            MapEntry::Outputs { links, .. } => {
                Artifact::Outputs(links.into_iter().map(PathBuf::from).collect())
            }
        }
    }
}

/// Mapping from original absolute source path to its record.
#[derive(Debug, Default)]
pub struct SourceIndex {
    records: HashMap<PathBuf, SharedRecord>,
}

impl SourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads an artifact map file. Relative `index` entries are resolved
    /// against `src_root`.
    pub fn load<P: AsRef<Path>>(map_path: P, src_root: &Path) -> LivelyResult<Self> {
        let map_path = map_path.as_ref();
        let raw = fs_err::read_to_string(map_path)?;
        let entries: Vec<MapEntry> = serde_json::from_str(&raw)?;

        let index = Self::from_entries(entries, src_root);
        debug!(
            "loaded {} tracked sources from {}",
            index.len(),
            map_path.display()
        );
        Ok(index)
    }

    pub fn from_entries<I>(entries: I, src_root: &Path) -> Self
    where
        I: IntoIterator<Item = MapEntry>,
    {
        let mut index = Self::new();
        for entry in entries {
            let path = src_root.join(entry.index());
            index.insert(path, SourceRecord::new(entry.into_artifact()));
        }
        index
    }

    pub fn insert<P: AsRef<Path>>(&mut self, path: P, record: SourceRecord) {
        self.records
            .insert(Self::key(path.as_ref()), Arc::new(Mutex::new(record)));
    }

    /// Returns the record for `path`, or `None` for untracked sources.
    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<SharedRecord> {
        self.records.get(&Self::key(path.as_ref())).cloned()
    }

    pub fn contains<P: AsRef<Path>>(&self, path: P) -> bool {
        self.records.contains_key(&Self::key(path.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.records.keys()
    }

    /// Lookup key: canonical when the file exists, lexically normalized otherwise.
    fn key(path: &Path) -> PathBuf {
        canonicalize_with_strip(path).unwrap_or_else(|_| path.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"[
        {"index": "templates/item.hbs", "src": "js/bundle.js", "line": "_m42 = function(require,module,exports){"},
        {"index": "/abs/styles/_vars.scss", "links": ["/dest/css/site.css", "/dest/css/print.css"]}
    ]"#;

    #[test]
    fn loads_both_map_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("map.json");
        fs_err::write(&map, MAP).unwrap();

        let index = SourceIndex::load(&map, Path::new("/project/src")).unwrap();
        assert_eq!(index.len(), 2);

        let record = index.get("/project/src/templates/item.hbs").unwrap();
        assert_eq!(
            record.lock().artifact,
            Artifact::Module {
                path: "js/bundle.js".into(),
                anchor: "_m42 = function(require,module,exports){".into(),
            }
        );

        let record = index.get("/abs/styles/_vars.scss").unwrap();
        assert!(matches!(&record.lock().artifact, Artifact::Outputs(links) if links.len() == 2));
    }

    #[test]
    fn untracked_paths_are_none() {
        let index = SourceIndex::from_entries(Vec::new(), Path::new("/src"));
        assert!(index.is_empty());
        assert!(index.get("/src/vendor/lib.js").is_none());
    }

    #[test]
    fn lookups_normalize_the_path() {
        let mut index = SourceIndex::new();
        index.insert(
            "/src/a/item.hbs",
            SourceRecord::new(Artifact::Outputs(Vec::new())),
        );
        assert!(index.contains("/src/b/../a/./item.hbs"));
    }

    #[test]
    fn malformed_map_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("map.json");
        fs_err::write(&map, r#"[{"index": 1}]"#).unwrap();
        assert!(SourceIndex::load(&map, dir.path()).is_err());
    }

    #[test]
    fn cache_is_single_use_and_pending_is_replaced() {
        let mut record = SourceRecord::new(Artifact::Outputs(Vec::new()));
        record.seed_cache(b"edited".to_vec());
        assert!(record.has_cached());
        assert_eq!(record.take_cached().as_deref(), Some(&b"edited"[..]));
        assert_eq!(record.take_cached(), None);

        record.set_pending(b"first".to_vec());
        record.set_pending(b"second".to_vec());
        assert_eq!(record.pending(), Some(&b"second"[..]));
        assert_eq!(record.take_pending().as_deref(), Some(&b"second"[..]));
        assert_eq!(record.pending(), None);
    }
}
