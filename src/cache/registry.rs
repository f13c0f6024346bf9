//! Repository registry (`repositories.json`)
//!
//! Maps repository UUIDs to the name of their cache file so several
//! repositories can share one cache directory.

use super::paths::{cache_file_name, registry_path};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryData {
    #[serde(default)]
    repositories: BTreeMap<String, String>,
}

/// UUID to cache file mapping stored in the cache directory.
#[derive(Debug)]
pub struct RepositoryRegistry {
    cache_dir: PathBuf,
    file: PathBuf,
    data: RegistryData,
}

impl RepositoryRegistry {
    /// Loads the registry; a missing or unreadable file gives an empty one.
    pub fn load(cache_dir: &Path) -> Self {
        let file = registry_path(cache_dir);
        let data = match read(&file) {
            Ok(data) => data,
            Err(e) => {
                if file.exists() {
                    warn!("Ignoring unreadable repository registry: {:#}", e);
                }
                RegistryData::default()
            }
        };
        Self {
            cache_dir: cache_dir.to_path_buf(),
            file,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.repositories.is_empty()
    }

    pub fn lookup(&self, uuid: &str) -> Option<PathBuf> {
        self.data
            .repositories
            .get(uuid)
            .map(|name| self.cache_dir.join(name))
    }

    /// Cache file for `uuid`, registering (and saving) it on first use.
    pub fn cache_file(&mut self, uuid: &str) -> Result<PathBuf> {
        if let Some(path) = self.lookup(uuid) {
            return Ok(path);
        }
        let name = cache_file_name(uuid);
        debug!("Registering repository {} as {}", uuid, name);
        self.data.repositories.insert(uuid.to_string(), name.clone());
        self.save()?;
        Ok(self.cache_dir.join(name))
    }

    fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;
        let tmp_file = self.file.with_extension("tmp");
        let file = File::create(&tmp_file).context("Failed to create temp registry file")?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.data)
            .context("Failed to write registry")?;
        fs::rename(&tmp_file, &self.file).context("Failed to rename temp registry")?;
        Ok(())
    }
}

fn read(file: &Path) -> Result<RegistryData> {
    let reader = BufReader::new(File::open(file).context("Failed to open registry")?);
    serde_json::from_reader(reader).context("Failed to parse registry")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_reload() {
        let tmp = TempDir::new().unwrap();
        let mut registry = RepositoryRegistry::load(tmp.path());
        assert!(registry.is_empty());

        let path = registry.cache_file("uuid-a").unwrap();
        assert_eq!(path, tmp.path().join("cache_uuid-a.json"));
        assert_eq!(registry.cache_file("uuid-a").unwrap(), path);

        let reloaded = RepositoryRegistry::load(tmp.path());
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.lookup("uuid-a"), Some(path));
        assert_eq!(reloaded.lookup("uuid-b"), None);
    }

    #[test]
    fn test_corrupt_registry_is_empty() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("repositories.json"), "{ not json").unwrap();
        let mut registry = RepositoryRegistry::load(tmp.path());
        assert!(registry.is_empty());
        assert!(registry.cache_file("uuid-c").is_ok());
        assert_eq!(RepositoryRegistry::load(tmp.path()).len(), 1);
    }
}
