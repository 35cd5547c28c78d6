// Snapshot path utilities.
// Maps server cache keys onto files under the platform cache directory.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Get the base cache directory (~/.cache/netstats on Linux).
pub fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "netstats").map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Directory holding server cache snapshots, honoring an explicit override.
pub fn snapshot_dir(override_dir: Option<&Path>) -> Option<PathBuf> {
    match override_dir {
        Some(dir) => Some(dir.join("snapshots")),
        None => cache_dir().map(|dir| dir.join("snapshots")),
    }
}

/// Path to the snapshot file for a cache key.
pub fn snapshot_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", sanitize_key(key)))
}

/// Turn a cache key into a single file name.
///
/// Path separators become `~`. `~`, `%` and characters that are unsafe in
/// file names are percent-escaped, so distinct keys never share a file.
fn sanitize_key(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    for c in key.trim_matches('/').chars() {
        match c {
            '/' => name.push('~'),
            '~' | '%' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '&' | '=' | ',' => {
                name.push_str(&format!("%{:02X}", c as u32));
            }
            c if c.is_control() => name.push_str(&format!("%{:02X}", c as u32)),
            _ => name.push(c),
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("providers"), "providers");
        assert_eq!(sanitize_key("provider/lava@1abc"), "provider~lava@1abc");
        assert_eq!(sanitize_key("/spec/ETH1/"), "spec~ETH1");
        assert_eq!(
            sanitize_key("events?pagination=rank,a,1,20"),
            "events%3Fpagination%3Drank%2Ca%2C1%2C20"
        );
    }

    #[test]
    fn test_distinct_keys_get_distinct_names() {
        assert_ne!(sanitize_key("a/b"), sanitize_key("a~b"));
        assert_ne!(sanitize_key("a?b"), sanitize_key("a%3Fb"));
        assert_ne!(sanitize_key("x:y"), sanitize_key("x*y"));
        assert_eq!(sanitize_key("a~b"), "a%7Eb");
        assert_eq!(sanitize_key("a\\b"), "a%5Cb");
    }

    #[test]
    fn test_snapshot_paths() {
        let dir = snapshot_dir(Some(Path::new("/var/cache/netstats"))).unwrap();
        assert_eq!(dir, PathBuf::from("/var/cache/netstats/snapshots"));

        let path = snapshot_path(&dir, "consumer/lava@xyz");
        assert!(path.ends_with("snapshots/consumer~lava@xyz.json"));
    }
}
