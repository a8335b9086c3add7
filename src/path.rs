//! Path normalization, join and split utilities.
//!
//! All paths are plain strings using `/` as the sole separator. The empty
//! string and `/` both name the root; there is no working-directory notion.

use crate::error::StorageError;

pub const SEP: char = '/';

fn strip_seps(path: &str) -> &str {
    path.trim_matches(SEP)
}

/// Strip `.`/`..` segments and reject any path that would resolve above the root.
pub fn normalize(path: &str) -> Result<String, StorageError> {
    let stripped = strip_seps(path);
    if stripped.is_empty() {
        return Ok(String::new());
    }

    let mut out: Vec<&str> = Vec::new();
    for segment in stripped.split(SEP) {
        match segment {
            "" | "." => continue,
            ".." => {
                if out.pop().is_none() {
                    return Err(StorageError::invalid_path(path, "escapes root"));
                }
            }
            other => out.push(other),
        }
    }

    Ok(out.join("/"))
}

/// Join a root with zero or more additional path components, normalizing the result.
pub fn join_paths(root: &str, parts: &[&str]) -> Result<String, StorageError> {
    let mut joined = strip_seps(root).to_string();
    for part in parts {
        let stripped = strip_seps(part);
        if stripped.is_empty() {
            continue;
        }
        if joined.is_empty() {
            joined = stripped.to_string();
        } else {
            joined.push(SEP);
            joined.push_str(stripped);
        }
    }
    normalize(&joined)
}

/// Normalize, then split into nonempty components. Root becomes the empty vector.
pub fn split_path(path: &str) -> Result<Vec<String>, StorageError> {
    let normalized = normalize(path)?;
    if normalized.is_empty() {
        return Ok(Vec::new());
    }
    Ok(normalized.split(SEP).map(|s| s.to_string()).collect())
}

/// The final path component, or the whole path if it has none.
pub fn basename(path: &str) -> &str {
    strip_seps(path).rsplit(SEP).next().unwrap_or("")
}

/// Everything but the final component, or empty if there is none.
pub fn dirname(path: &str) -> String {
    let stripped = strip_seps(path);
    match stripped.rsplit_once(SEP) {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Ensure a path ends in exactly one trailing separator (unless empty).
pub fn with_trailing_sep(path: &str) -> String {
    if path.is_empty() || path.ends_with(SEP) {
        path.to_string()
    } else {
        format!("{path}{SEP}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_and_collapses() {
        assert_eq!(normalize("/a//b/./c/").unwrap(), "a/b/c");
        assert_eq!(normalize("").unwrap(), "");
        assert_eq!(normalize("/").unwrap(), "");
    }

    #[test]
    fn normalize_rejects_escape_above_root() {
        assert!(normalize("../etc/passwd").is_err());
        assert!(normalize("a/../../b").is_err());
    }

    #[test]
    fn normalize_allows_internal_dotdot_within_root() {
        assert_eq!(normalize("a/b/../c").unwrap(), "a/c");
    }

    #[test]
    fn join_paths_strips_each_component() {
        assert_eq!(join_paths("/root", &["/dir1/", "/file.txt"]).unwrap(), "root/dir1/file.txt");
        assert_eq!(join_paths("/root", &[]).unwrap(), "root");
    }

    #[test]
    fn split_path_root_is_empty_vec() {
        assert_eq!(split_path("").unwrap(), Vec::<String>::new());
        assert_eq!(split_path("a/b/c").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn basename_and_dirname() {
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(dirname("a/b/c.txt"), "a/b");
        assert_eq!(dirname("c.txt"), "");
    }

    #[test]
    fn with_trailing_sep_is_idempotent() {
        assert_eq!(with_trailing_sep("a/b"), "a/b/");
        assert_eq!(with_trailing_sep("a/b/"), "a/b/");
        assert_eq!(with_trailing_sep(""), "");
    }
}
