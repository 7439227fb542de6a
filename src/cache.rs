//! File-backed key/value cache for expensive lookups.
//!
//! Every operation fails open: a broken or missing entry reads as a miss and
//! a failed write is only logged.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct CacheRecordRef<'a, T: ?Sized> {
    value: &'a T,
}

#[derive(Deserialize)]
struct CacheRecord<T> {
    value: T,
}

#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    write_seq: AtomicU64,
}

impl CacheStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Could not create cache dir {}: {}; caching disabled", dir.display(), e);
        }
        Self {
            dir,
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.entry_path(key);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                debug!("Cache miss for key {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str::<CacheRecord<T>>(&data) {
            Ok(record) => {
                debug!("Cache hit for key: {}", key);
                Some(record.value)
            }
            Err(e) => {
                debug!("Cache read error for key {}: {}", key, e);
                None
            }
        }
    }

    /// Stores `value` under `key`. The record is written to a private
    /// temporary file and renamed into place, so readers never observe a
    /// partially written entry; concurrent writers are last-rename-wins.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let path = self.entry_path(key);
        let data = match serde_json::to_string(&CacheRecordRef { value }) {
            Ok(data) => data,
            Err(e) => {
                debug!("Cache write error for key {}: {}", key, e);
                return;
            }
        };
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
        let written = fs::write(&tmp, data).and_then(|_| fs::rename(&tmp, &path));
        match written {
            Ok(()) => debug!("Cache set for key: {}", key),
            Err(e) => {
                debug!("Cache write error for key {}: {}", key, e);
                let _ = fs::remove_file(&tmp);
            }
        }
    }

    /// Removes every cached entry.
    pub fn clear(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Error clearing cache {}: {}", self.dir.display(), e);
                return;
            }
        };
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Error removing cache file {}: {}", path.display(), e),
                }
            }
        }
        info!("Cache cleared ({} entries)", removed);
    }
}

pub fn description_key(subject: &str) -> String {
    format!("description:{}", subject)
}

pub fn image_urls_key(source: &str, subject: &str) -> String {
    format!("image_urls:{}:{}", source, subject)
}
