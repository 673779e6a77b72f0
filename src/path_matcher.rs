//! Folder membership for remote paths.
//!
//! Remote listings and configured folders disagree on case and trailing
//! slashes, so every comparison goes through [`normalize_path`]. A folder only
//! contains an entry at a `/` boundary: `/pdf/input` holds `/pdf/input/a.pdf`
//! but not `/pdf/inputbackup/a.pdf`.

use serde::{Deserialize, Serialize};

/// Lower-cases, trims whitespace, collapses repeated `/` and strips trailing `/`.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.trim().chars() {
        if c == '/' {
            if !previous_slash {
                normalized.push('/');
            }
            previous_slash = true;
        } else {
            normalized.extend(c.to_lowercase());
            previous_slash = false;
        }
    }
    while normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Returns true when `entry_path` is `folder` itself or lies below it.
pub fn belongs_to(entry_path: &str, folder: &str) -> bool {
    contains_normalized(&normalize_path(entry_path), &normalize_path(folder))
}

fn contains_normalized(entry: &str, folder: &str) -> bool {
    if entry.is_empty() {
        return false;
    }
    if entry == folder {
        return true;
    }
    entry
        .strip_prefix(folder)
        .map_or(false, |rest| rest.starts_with('/'))
}

/// Returns the part of `entry_path` below `folder`, keeping the entry's casing.
///
/// `relative_path("/PDF/In/Sub/A.pdf", "/pdf/in")` is `Some("Sub/A.pdf")`.
pub fn relative_path<'a>(entry_path: &'a str, folder: &str) -> Option<&'a str> {
    let folder = normalize_path(folder);
    let entry = entry_path.trim();
    let mut folder_chars = folder.chars().peekable();
    let mut rest = entry;

    // Walk the entry, consuming folder characters case-insensitively and
    // ignoring repeated separators the normalized folder no longer has.
    while folder_chars.peek().is_some() {
        let mut entry_chars = rest.chars();
        let c = entry_chars.next()?;
        if c == '/' && rest[1..].starts_with('/') {
            rest = &rest[1..];
            continue;
        }
        for lower in c.to_lowercase() {
            if folder_chars.next() != Some(lower) {
                return None;
            }
        }
        rest = entry_chars.as_str();
    }

    let rest = rest.trim_start_matches('/');
    let boundary_ok = folder.is_empty() || entry[..entry.len() - rest.len()].ends_with('/');
    if rest.is_empty() || !boundary_ok {
        return None;
    }
    Some(rest.trim_end_matches('/'))
}

/// Joins a folder and a relative path with exactly one separator.
pub fn join_remote(folder: &str, relative: &str) -> String {
    let folder = folder.trim().trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    format!("{}/{}", folder, relative)
}

/// Final path component of a remote path.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// A configured remote folder, normalized once at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LogicalFolder {
    configured: String,
    normalized: String,
}

impl LogicalFolder {
    pub fn new(configured: impl Into<String>) -> Self {
        let configured = configured.into();
        let normalized = normalize_path(&configured);
        Self {
            configured,
            normalized,
        }
    }

    /// The path as written in the configuration, used for remote calls.
    pub fn as_str(&self) -> &str {
        &self.configured
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn contains(&self, entry_path: &str) -> bool {
        contains_normalized(&normalize_path(entry_path), &self.normalized)
    }

    /// Same folder after normalization.
    pub fn same_as(&self, other: &LogicalFolder) -> bool {
        self.normalized == other.normalized
    }

    pub fn relative<'a>(&self, entry_path: &'a str) -> Option<&'a str> {
        relative_path(entry_path, &self.configured)
    }
}

impl From<String> for LogicalFolder {
    fn from(value: String) -> Self {
        LogicalFolder::new(value)
    }
}

impl From<&str> for LogicalFolder {
    fn from(value: &str) -> Self {
        LogicalFolder::new(value)
    }
}

impl From<LogicalFolder> for String {
    fn from(value: LogicalFolder) -> Self {
        value.configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/PDF/Input/"), "/pdf/input");
        assert_eq!(normalize_path("  /pdf//input///  "), "/pdf/input");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_belongs_to_folder_itself_and_children() {
        assert!(belongs_to("/pdf/input", "/pdf/input"));
        assert!(belongs_to("/PDF/INPUT", "/pdf/input"));
        assert!(belongs_to("/pdf/input/x.pdf", "/pdf/input"));
        assert!(belongs_to("/pdf/input/deep/x.pdf", "/PDF/Input/"));
    }

    #[test]
    fn test_belongs_to_rejects_sibling_prefix() {
        assert!(!belongs_to("/pdf/inputbackup/x.pdf", "/pdf/input"));
        assert!(!belongs_to("/pdf/inputs", "/pdf/input"));
        assert!(!belongs_to("/pdf", "/pdf/input"));
    }

    #[test]
    fn test_belongs_to_malformed_entry_is_not_a_match() {
        assert!(!belongs_to("", "/pdf/input"));
        assert!(!belongs_to("   ", ""));
    }

    #[test]
    fn test_root_folder_contains_everything() {
        assert!(belongs_to("/anything/x.pdf", "/"));
    }

    #[test]
    fn test_relative_path_keeps_entry_casing() {
        assert_eq!(relative_path("/PDF/In/Sub/A.pdf", "/pdf/in"), Some("Sub/A.pdf"));
        assert_eq!(relative_path("/pdf/in/a.pdf", "/pdf/in/"), Some("a.pdf"));
        assert_eq!(relative_path("/pdf//in/a.pdf", "/pdf/in"), Some("a.pdf"));
    }

    #[test]
    fn test_relative_path_rejects_outsiders() {
        assert_eq!(relative_path("/pdf/inbox/a.pdf", "/pdf/in"), None);
        assert_eq!(relative_path("/pdf/in", "/pdf/in"), None);
        assert_eq!(relative_path("/other/a.pdf", "/pdf/in"), None);
    }

    #[test]
    fn test_join_remote_and_basename() {
        assert_eq!(join_remote("/pdf/out/", "/a/b.pdf"), "/pdf/out/a/b.pdf");
        assert_eq!(basename("/pdf/out/a/b.pdf"), "b.pdf");
        assert_eq!(basename("b.pdf"), "b.pdf");
    }

    #[test]
    fn test_logical_folder() {
        let folder = LogicalFolder::new("/PDF/Input/");
        assert_eq!(folder.normalized(), "/pdf/input");
        assert_eq!(folder.as_str(), "/PDF/Input/");
        assert!(folder.contains("/pdf/input/a.pdf"));
        assert!(!folder.contains("/pdf/inputbackup/a.pdf"));
        assert!(folder.same_as(&LogicalFolder::new("/pdf/input")));
        assert_eq!(folder.relative("/pdf/INPUT/a.pdf"), Some("a.pdf"));
    }
}
