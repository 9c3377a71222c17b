//! Path normalization and mount-table lookup helpers.
//!
//! Grounded on `hadron-fs::path` (referenced by its `vfs.rs` as
//! `crate::path::{is_absolute, longest_prefix_match, strip_mount_prefix,
//! components}`): normalize `.`/`..` and collapse slashes before walking
//! components, find the owning mount by longest-prefix match.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

/// `true` if `path` starts with `/`.
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Splits a path into its non-empty, non-`.` components, in order.
/// `..` is preserved as a literal component; resolving it against a
/// concrete directory stack is [`normalize`]'s job, not this function's.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

/// Normalizes an absolute path: collapses repeated slashes, drops `.`
/// components, and resolves `..` against the components seen so far
/// (a leading `..` past the root is simply dropped, matching a real root's
/// `..` being itself). The result always starts with `/` and never ends
/// with one unless it is exactly `"/"`.
#[must_use]
pub fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for (i, component) in stack.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(component);
    }
    out
}

/// Joins a `base` absolute path with a (possibly relative) `path`,
/// normalizing the result. If `path` is already absolute, `base` is
/// ignored.
#[must_use]
pub fn resolve_relative(base: &str, path: &str) -> String {
    if is_absolute(path) {
        return normalize(path);
    }
    let mut joined = String::with_capacity(base.len() + path.len() + 1);
    joined.push_str(base);
    if !base.ends_with('/') {
        joined.push('/');
    }
    joined.push_str(path);
    normalize(&joined)
}

/// Finds the longest mount path in `mounts` that is a prefix of `abs_path`
/// on a component boundary (longest-prefix match over `mnt_path`).
/// `"/"` always matches everything and is the fallback.
#[must_use]
pub fn longest_prefix_match<'a>(
    abs_path: &str,
    mounts: impl Iterator<Item = &'a str>,
) -> Option<&'a str> {
    let mut best: Option<&str> = None;
    for candidate in mounts {
        let matches = if candidate == "/" {
            true
        } else {
            abs_path == candidate || abs_path.starts_with(candidate) && {
                let rest = &abs_path[candidate.len()..];
                rest.is_empty() || rest.starts_with('/')
            }
        };
        if matches && best.is_none_or(|b| candidate.len() > b.len()) {
            best = Some(candidate);
        }
    }
    best
}

/// Strips a matched mount prefix from `abs_path`, leaving a path relative
/// to that mount's root (empty string if `abs_path` names the mount point
/// itself).
#[must_use]
pub fn strip_mount_prefix<'a>(abs_path: &'a str, mount_path: &str) -> &'a str {
    if mount_path == "/" {
        return abs_path.trim_start_matches('/');
    }
    abs_path[mount_path.len()..].trim_start_matches('/')
}

/// Splits an absolute path into its parent directory and final component.
/// Returns `None` for `"/"`, which has no parent.
#[must_use]
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let normalized = normalize(path);
    if normalized == "/" {
        return None;
    }
    let idx = normalized.rfind('/').unwrap_or(0);
    let parent = if idx == 0 { "/" } else { &normalized[..idx] };
    let name = &normalized[idx + 1..];
    Some((String::from(parent), String::from(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn components_skips_empty_and_dot() {
        let parts: Vec<&str> = components("/a//b/./c/").collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
    }

    #[test]
    fn normalize_collapses_and_resolves_dotdot() {
        assert_eq!(normalize("/a/b/../c"), "/a/c");
        assert_eq!(normalize("/a/../../b"), "/b");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("//a//b//"), "/a/b");
    }

    #[test]
    fn resolve_relative_joins_against_cwd() {
        assert_eq!(resolve_relative("/home/user", "docs/file.txt"), "/home/user/docs/file.txt");
        assert_eq!(resolve_relative("/home/user", "/etc/passwd"), "/etc/passwd");
    }

    #[test]
    fn longest_prefix_match_prefers_deepest_mount() {
        let mounts = vec!["/", "/mnt", "/mnt/data"];
        assert_eq!(
            longest_prefix_match("/mnt/data/file", mounts.into_iter()),
            Some("/mnt/data")
        );
    }

    #[test]
    fn longest_prefix_match_does_not_match_partial_component() {
        let mounts = vec!["/", "/mnt"];
        assert_eq!(longest_prefix_match("/mntfoo/file", mounts.into_iter()), Some("/"));
    }

    #[test]
    fn strip_mount_prefix_handles_root() {
        assert_eq!(strip_mount_prefix("/foo/bar", "/"), "foo/bar");
        assert_eq!(strip_mount_prefix("/mnt/foo", "/mnt"), "foo");
        assert_eq!(strip_mount_prefix("/mnt", "/mnt"), "");
    }

    #[test]
    fn split_parent_separates_last_component() {
        assert_eq!(split_parent("/a/b/c"), Some((String::from("/a/b"), String::from("c"))));
        assert_eq!(split_parent("/a"), Some((String::from("/"), String::from("a"))));
        assert_eq!(split_parent("/"), None);
    }
}
