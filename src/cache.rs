use anyhow::{Context, Result};
use log::{debug, warn};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Write as _},
    path::{Path, PathBuf},
};

/// Stable 32-bit string hash used for cache file names and request keys.
///
/// Must not change between releases: existing graph caches and request cache
/// entries are addressed by it.
pub fn stable_hash(text: &str) -> String {
    let mut h: u64 = 0;
    for ch in text.chars() {
        h = ((h * 281) ^ (ch as u64 * 997)) & 0xffff_ffff;
    }
    h.to_string()
}

/// Persistent cache of routing-service responses, keyed by request body hash.
///
/// The whole map is rewritten on every insert so an interrupted batch keeps
/// everything answered so far.
#[derive(Debug)]
pub struct RequestCache {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl RequestCache {
    /// Opens the cache at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.is_file() {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open request cache {:?}", path))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Invalid request cache {:?}", path))?
        } else {
            HashMap::new()
        };

        debug!("Request cache {:?} holds {} entries", path, entries.len());
        Ok(Self { path, entries })
    }

    pub fn key_for(request_body: &str) -> String {
        stable_hash(request_body)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: String, response: String) {
        self.entries.insert(key, response);
        if let Err(e) = self.flush() {
            warn!("Failed to flush request cache {:?}: {}", self.path, e);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let body = serde_json::to_string(&self.entries)?;
        let mut file = File::create(&self.path)?;
        file.write_all(body.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_hash_known_values() {
        assert_eq!(stable_hash(""), "0");
        assert_eq!(stable_hash("abc"), "3362904112");
        assert_eq!(stable_hash("Englischer Garten"), "4053926825");
    }

    #[test]
    fn test_request_cache_persists_entries() {
        let dir = std::env::temp_dir().join(format!("parkcover-cache-{}", std::process::id()));
        let path = dir.join("requests.json");
        let _ = std::fs::remove_file(&path);

        let mut cache = RequestCache::open(&path).unwrap();
        assert!(cache.is_empty());
        let key = RequestCache::key_for("{\"shape\":[]}");
        cache.insert(key.clone(), "{\"edges\":[]}".to_string());

        let reopened = RequestCache::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(&key), Some("{\"edges\":[]}"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
