//! Cache path utilities - uses ~/.loctrail/ by default

use std::path::{Path, PathBuf};

/// Name of the registry mapping repository UUIDs to cache files.
pub const REGISTRY_FILE: &str = "repositories.json";

/// Default cache directory: `~/.loctrail/`, or `./.loctrail/` without a home directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".loctrail")
}

/// Cache file name for a repository.
pub fn cache_file_name(uuid: &str) -> String {
    let uuid: String = uuid
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("cache_{}.json", uuid)
}

pub fn registry_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(REGISTRY_FILE)
}

/// Ensure the cache directory exists.
pub fn ensure_cache_dir(cache_dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(cache_dir)?;
    Ok(cache_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_file_name() {
        assert_eq!(
            cache_file_name("3c9e1a2b-0000-4c7b"),
            "cache_3c9e1a2b-0000-4c7b.json"
        );
        assert_eq!(cache_file_name("../evil"), "cache____evil.json");
    }

    #[test]
    fn test_default_cache_dir_format() {
        let dir = default_cache_dir();
        assert!(dir.to_string_lossy().ends_with(".loctrail"));
    }

    #[test]
    fn test_ensure_cache_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        assert_eq!(ensure_cache_dir(&nested).unwrap(), nested);
        assert!(nested.is_dir());
    }
}
