use std::path::{Path, PathBuf};

use dirs_next::home_dir;

/// Key suffixes whose values are treated as filesystem paths during config resolution.
pub const PATH_KEY_SUFFIXES: &[&str] = &["_dir", "_file", "_prefix", "_index"];

/// Bare keys treated as paths. Backend sections name their reference index plainly `index`.
pub const PATH_KEYS: &[&str] = &["index"];

pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Make `value` absolute: tilde-expanded, then left as is when absolute, else joined onto `root`.
///
/// Applying this to its own output returns the same path.
pub fn resolve_against(root: &Path, value: &str) -> PathBuf {
    let expanded = expand_tilde(value);
    if expanded.is_absolute() { expanded } else { root.join(expanded) }
}

/// Returns `true` when a configuration key names a path-valued entry.
pub fn is_path_like_key(key: &str) -> bool {
    PATH_KEYS.contains(&key) || PATH_KEY_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
}

/// File name without any of the given extensions, e.g. `S1.fq.gz` -> `S1` for `[".fq.gz", ".fastq.gz"]`.
///
/// Falls back to [`Path::file_stem`] when no extension matches.
pub fn strip_extensions(path: &Path, extensions: &[&str]) -> String {
    let name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
    for extension in extensions {
        if let Some(stem) = name.strip_suffix(extension)
            && !stem.is_empty()
        {
            return stem.to_string();
        }
    }
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or(name)
}
