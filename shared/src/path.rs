use std::io;
use std::path::{Path, PathBuf};

use sugar_path::SugarPath;

/// Canonicalizes a path, stripping the Windows verbatim prefix (`\\?\`) so
/// the result compares equal to paths built by joining plain components.
pub fn canonicalize_with_strip<P: AsRef<Path>>(path: P) -> io::Result<PathBuf> {
    let canonical = fs_err::canonicalize(path.as_ref())?;

    #[cfg(windows)]
    {
        let s = canonical.to_string_lossy();
        if let Some(stripped) = s.strip_prefix(r"\\?\") {
            return Ok(PathBuf::from(stripped));
        }
    }

    Ok(canonical)
}

/// Converts `path` into a `/`-separated URL path relative to `base`.
///
/// Returns `None` when `path` does not live under `base`.
pub fn url_path_from(path: &Path, base: &Path) -> Option<String> {
    let path = path.normalize();
    let base = base.normalize();
    if !path.starts_with(&base) {
        return None;
    }

    let relative = path.relative(&base);
    Some(relative.to_slash_lossy().into_owned())
}

/// Normalizes a file extension the way extension-keyed lookups expect:
/// no leading dot, lowercase.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

/// Returns the normalized extension of `path`, or an empty string.
pub fn extension_of<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(normalize_extension)
        .unwrap_or_default()
}
