//! Cache Store (§4.1, C1): persistent key -> entry map, compression, LRU
//! eviction and size accounting.

pub mod compression;
pub mod key;
pub mod policy;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::Compression;
use crate::error::{ProxyError, ProxyResult};
use key::CacheKey;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Value side of the key -> entry map (§3 `CacheEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status_code: u16,
    /// Lowercased header names, origin headers minus hop-by-hop.
    pub headers: Vec<(String, String)>,
    /// Compressed (per `compression`) body bytes.
    pub body: Vec<u8>,
    pub compression: Compression,
    pub vary_headers: Vec<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub cached_at: u64,
    pub expires_at: u64,
    pub last_access_time: u64,
    /// Versioning epoch tag (§B.4) this entry was stored under.
    pub version: String,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: u64) -> bool {
        now < self.expires_at
    }

    /// Size per §4.1: byte length of key + body (stored form) + serialized headers.
    pub fn size_with_key(&self, key: &str) -> u64 {
        let headers_len: usize = self
            .headers
            .iter()
            .map(|(n, v)| n.len() + v.len() + 2)
            .sum();
        (key.len() + self.body.len() + headers_len) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Evicted,
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedStore {
    entries: HashMap<CacheKey, CacheEntry>,
}

struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    total_size: u64,
}

pub struct CacheStore {
    inner: Mutex<Inner>,
    path: PathBuf,
    max_entries: usize,
    max_size_bytes: u64,
}

impl CacheStore {
    /// Loads the persistent document at `dir/cache-data.json`, starting with
    /// an empty map if the file is missing or corrupt (§4.1 error conditions).
    pub fn load(dir: &Path, max_entries: usize, max_size_bytes: u64) -> ProxyResult<CacheStore> {
        fs::create_dir_all(dir)
            .map_err(|e| ProxyError::ConfigInvalid(format!("creating cache dir: {e}")))?;
        let path = dir.join("cache-data.json");

        let persisted = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<PersistedStore>(&text) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("cache-data.json corrupt, starting empty: {e}");
                    PersistedStore::default()
                }
            },
            Err(_) => PersistedStore::default(),
        };

        let total_size: u64 = persisted
            .entries
            .iter()
            .map(|(k, e)| e.size_with_key(k))
            .sum();

        Ok(CacheStore {
            inner: Mutex::new(Inner {
                entries: persisted.entries,
                total_size,
            }),
            path,
            max_entries,
            max_size_bytes,
        })
    }

    /// `get(key)`: refreshes `lastAccessTime` on every successful read, per
    /// §3's lifecycle invariant.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().unwrap();
        let now = now_ms();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_access_time = now;
            let out = entry.clone();
            drop(inner);
            self.persist_best_effort();
            return Some(out);
        }
        None
    }

    /// Like `get` but does not update `lastAccessTime` or persist — used for
    /// read-only inspection (`--cache-list`, stats).
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().unwrap().entries.get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, entry: CacheEntry) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(old) = inner.entries.remove(&key) {
                inner.total_size = inner.total_size.saturating_sub(old.size_with_key(&key));
            }
            inner.total_size += entry.size_with_key(&key);
            inner.entries.insert(key, entry);
            self.evict_locked(&mut inner);
        }
        self.persist_best_effort();
    }

    /// Refreshes `expiresAt`/`lastAccessTime` on a 304 revalidation (§4.8
    /// stage 8) without altering the stored body.
    pub fn refresh_expiry(&self, key: &str, new_expires_at: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.expires_at = new_expires_at;
            entry.last_access_time = now_ms();
        }
        drop(inner);
        self.persist_best_effort();
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(old) = inner.entries.remove(key) {
                inner.total_size = inner.total_size.saturating_sub(old.size_with_key(key));
                true
            } else {
                false
            }
        };
        if removed {
            self.persist_best_effort();
        }
        removed
    }

    /// `deleteMatching(predicate) -> count`.
    pub fn delete_matching(&self, predicate: impl Fn(&str, &CacheEntry) -> bool) -> usize {
        let count = {
            let mut inner = self.inner.lock().unwrap();
            let keys: Vec<String> = inner
                .entries
                .iter()
                .filter(|(k, e)| predicate(k, e))
                .map(|(k, _)| k.clone())
                .collect();
            for k in &keys {
                if let Some(old) = inner.entries.remove(k) {
                    inner.total_size = inner.total_size.saturating_sub(old.size_with_key(k));
                }
            }
            keys.len()
        };
        if count > 0 {
            self.persist_best_effort();
        }
        count
    }

    /// Removes every entry (used by version-epoch purge, §B.4).
    pub fn clear(&self) -> usize {
        let count = {
            let mut inner = self.inner.lock().unwrap();
            let n = inner.entries.len();
            inner.entries.clear();
            inner.total_size = 0;
            n
        };
        self.persist_best_effort();
        count
    }

    pub fn stats(&self) -> (usize, u64) {
        let inner = self.inner.lock().unwrap();
        (inner.entries.len(), inner.total_size)
    }

    /// Forces a persist of the current map (§5 "Resource lifecycle": graceful
    /// shutdown flushes the Cache Store before exit).
    pub fn flush(&self) {
        self.persist_best_effort();
    }

    pub fn iterate(&self) -> Vec<(CacheKey, CacheEntry)> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Evict in ascending `lastAccessTime` order (ties by key) until both
    /// counters fall to 90% of their limits (§4.1).
    fn evict_locked(&self, inner: &mut Inner) {
        let entry_limit_90 = (self.max_entries as f64 * 0.9).ceil() as usize;
        let size_limit_90 = (self.max_size_bytes as f64 * 0.9).ceil() as u64;

        if inner.entries.len() <= self.max_entries && inner.total_size <= self.max_size_bytes {
            return;
        }

        let mut ordered: Vec<(String, u64)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.last_access_time))
            .collect();
        ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        for (key, _) in ordered {
            if inner.entries.len() <= entry_limit_90 && inner.total_size <= size_limit_90 {
                break;
            }
            if let Some(old) = inner.entries.remove(&key) {
                inner.total_size = inner.total_size.saturating_sub(old.size_with_key(&key));
                log::debug!("CACHE_EVICTED key={key}");
            }
        }
    }

    /// Writes the whole map to a temp sibling then renames over the target
    /// (crash-atomic), logging and continuing in-memory-only on failure.
    fn persist_best_effort(&self) {
        if let Err(e) = self.persist() {
            log::error!("cache persistence failed, continuing in-memory only: {e}");
        }
    }

    fn persist(&self) -> ProxyResult<()> {
        let snapshot = {
            let inner = self.inner.lock().unwrap();
            PersistedStore {
                entries: inner.entries.clone(),
            }
        };
        let json = serde_json::to_vec(&snapshot)
            .map_err(|e| ProxyError::CachePersistenceFault(format!("serialize: {e}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)
            .map_err(|e| ProxyError::CachePersistenceFault(format!("create tmp: {e}")))?;
        file.write_all(&json)
            .map_err(|e| ProxyError::CachePersistenceFault(format!("write tmp: {e}")))?;
        file.sync_all().ok();
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| ProxyError::CachePersistenceFault(format!("rename: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_shim::TempDir;

    // A tiny self-contained temp-dir helper so the test module does not
    // depend on an extra dev-dependency for something this small.
    mod tempfile_shim {
        use std::path::{Path, PathBuf};

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let mut dir = std::env::temp_dir();
                let unique = format!(
                    "cachepingora-test-{}-{:?}",
                    std::process::id(),
                    std::time::Instant::now()
                );
                dir.push(unique);
                std::fs::create_dir_all(&dir).unwrap();
                TempDir(dir)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    fn sample_entry(body: &[u8], last_access: u64) -> CacheEntry {
        CacheEntry {
            status_code: 200,
            headers: vec![],
            body: body.to_vec(),
            compression: Compression::None,
            vary_headers: vec![],
            etag: None,
            last_modified: None,
            cached_at: 0,
            expires_at: u64::MAX,
            last_access_time: last_access,
            version: "1".to_string(),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = TempDir::new();
        let store = CacheStore::load(dir.path(), 100, 1_000_000).unwrap();
        store.put("GET:/x".to_string(), sample_entry(b"hello", 1));
        let got = store.get("GET:/x").unwrap();
        assert_eq!(got.body, b"hello");
    }

    #[test]
    fn eviction_respects_max_entries_and_lru_order() {
        let dir = TempDir::new();
        // max_entries = 3; after inserting a 4th, evict down to ceil(3*0.9) = 3,
        // i.e. only the single least-recently-used entry (B) is dropped.
        let store = CacheStore::load(dir.path(), 3, 1_000_000).unwrap();
        store.put("A".to_string(), sample_entry(b"a", 1));
        store.put("B".to_string(), sample_entry(b"b", 2));
        store.put("C".to_string(), sample_entry(b"c", 3));
        // touch A so it's most-recently-used among {A, B, C}
        store.get("A");
        store.put("D".to_string(), sample_entry(b"d", 5));

        let (count, _) = store.stats();
        assert_eq!(count, 3);
        assert!(store.peek("B").is_none(), "B should have been evicted (least recently used)");
        assert!(store.peek("A").is_some());
        assert!(store.peek("C").is_some());
        assert!(store.peek("D").is_some());
    }

    #[test]
    fn delete_matching_removes_and_counts() {
        let dir = TempDir::new();
        let store = CacheStore::load(dir.path(), 100, 1_000_000).unwrap();
        store.put("GET:/a".to_string(), sample_entry(b"a", 1));
        store.put("GET:/b".to_string(), sample_entry(b"b", 2));
        store.put("POST:/a".to_string(), sample_entry(b"c", 3));

        let n = store.delete_matching(|k, _| k.starts_with("GET:"));
        assert_eq!(n, 2);
        assert!(store.peek("POST:/a").is_some());
    }

    #[test]
    fn persists_across_reload() {
        let dir = TempDir::new();
        {
            let store = CacheStore::load(dir.path(), 100, 1_000_000).unwrap();
            store.put("GET:/x".to_string(), sample_entry(b"persisted", 1));
        }
        let store2 = CacheStore::load(dir.path(), 100, 1_000_000).unwrap();
        assert_eq!(store2.peek("GET:/x").unwrap().body, b"persisted");
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new();
        std::fs::write(dir.path().join("cache-data.json"), b"not json").unwrap();
        let store = CacheStore::load(dir.path(), 100, 1_000_000).unwrap();
        assert_eq!(store.stats().0, 0);
    }
}
