use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm::media::{classify, file_extension, MediaCategory};

/// A file the user uploaded through the page. Immutable once stored.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedAsset {
    pub id: String,
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub category: MediaCategory,
    pub size: u64,
}

/// Uploaded files on local disk, keyed by asset id. Holds at most `capacity`
/// assets; the oldest upload is evicted first.
#[derive(Clone)]
pub struct AssetStore {
    dir: PathBuf,
    capacity: usize,
    registry: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    assets: HashMap<String, UploadedAsset>,
    order: VecDeque<String>,
}

impl Registry {
    fn remove(&mut self, id: &str) -> Option<UploadedAsset> {
        let asset = self.assets.remove(id)?;
        self.order.retain(|queued| queued != id);
        Some(asset)
    }
}

async fn remove_stored_file(asset: &UploadedAsset) {
    if let Err(err) = tokio::fs::remove_file(&asset.path).await {
        warn!("Failed to remove upload {}: {}", asset.path.display(), err);
    }
}

/// Browsers may send a full client-side path; only the last component is kept.
pub fn sanitize_filename(raw: &str) -> String {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        "upload".to_string()
    } else {
        name.to_string()
    }
}

impl AssetStore {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        AssetStore {
            dir: dir.into(),
            capacity: capacity.max(1),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create upload directory {}", self.dir.display()))
    }

    pub async fn save(&self, raw_filename: &str, bytes: &[u8]) -> Result<UploadedAsset> {
        let filename = sanitize_filename(raw_filename);
        let id = Uuid::new_v4().simple().to_string();
        // The stored name never reuses client text beyond a lower-cased extension.
        let stored_name = match file_extension(&filename) {
            Some(extension)
                if !extension.is_empty()
                    && extension.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                format!("{id}.{extension}")
            }
            _ => id.clone(),
        };
        let path = self.dir.join(stored_name);

        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to store upload at {}", path.display()))?;

        let asset = UploadedAsset {
            id: id.clone(),
            category: classify(&filename),
            filename,
            path,
            size: bytes.len() as u64,
        };
        info!(
            "Stored upload {} as {} ({} bytes, category={})",
            asset.filename, asset.id, asset.size, asset.category
        );

        let evicted = {
            let mut registry = self.registry.lock();
            registry.assets.insert(id.clone(), asset.clone());
            registry.order.push_back(id);
            let mut evicted = Vec::new();
            while registry.assets.len() > self.capacity {
                let Some(oldest) = registry.order.pop_front() else {
                    break;
                };
                if let Some(old) = registry.assets.remove(&oldest) {
                    evicted.push(old);
                }
            }
            evicted
        };
        for old in evicted {
            debug!("Evicted upload {} ({})", old.id, old.filename);
            remove_stored_file(&old).await;
        }
        Ok(asset)
    }

    pub fn get(&self, id: &str) -> Option<UploadedAsset> {
        self.registry.lock().assets.get(id).cloned()
    }

    /// Forgets the asset and removes its file. Returns whether it existed.
    pub async fn discard(&self, id: &str) -> bool {
        let removed = self.registry.lock().remove(id);
        let Some(asset) = removed else {
            return false;
        };
        remove_stored_file(&asset).await;
        debug!("Discarded upload {}", asset.id);
        true
    }

    pub async fn clear(&self) {
        let drained: Vec<UploadedAsset> = {
            let mut registry = self.registry.lock();
            registry.order.clear();
            registry.assets.drain().map(|(_, asset)| asset).collect()
        };
        for asset in drained {
            remove_stored_file(&asset).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_last_path_component() {
        assert_eq!(sanitize_filename("C:\\Users\\me\\clip.MOV"), "clip.MOV");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("dir/"), "upload");
        assert_eq!(sanitize_filename(".."), "upload");
    }

    #[tokio::test]
    async fn save_classifies_and_stores_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path().join("uploads"), 8);
        store.prepare().await.unwrap();

        let asset = store.save("Notes.TXT", b"hello world").await.unwrap();
        assert_eq!(asset.category, MediaCategory::Text);
        assert_eq!(asset.filename, "Notes.TXT");
        assert_eq!(asset.size, 11);
        assert!(asset.path.starts_with(store.dir()));
        assert_eq!(asset.path.extension().unwrap(), "txt");
        assert_eq!(std::fs::read(&asset.path).unwrap(), b"hello world");

        let fetched = store.get(&asset.id).unwrap();
        assert_eq!(fetched.path, asset.path);
    }

    #[tokio::test]
    async fn discard_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path(), 8);
        let asset = store.save("song.mp3", b"ID3").await.unwrap();

        assert!(store.discard(&asset.id).await);
        assert!(store.get(&asset.id).is_none());
        assert!(!asset.path.exists());
        assert!(!store.discard(&asset.id).await);
    }

    #[tokio::test]
    async fn oldest_upload_is_evicted_past_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path(), 2);
        let first = store.save("a.txt", b"a").await.unwrap();
        let second = store.save("b.txt", b"b").await.unwrap();
        assert!(store.discard(&second.id).await);
        let third = store.save("c.txt", b"c").await.unwrap();
        assert!(store.get(&first.id).is_some());

        let fourth = store.save("d.txt", b"d").await.unwrap();
        assert!(store.get(&first.id).is_none());
        assert!(!first.path.exists());
        assert!(store.get(&third.id).is_some());
        assert!(store.get(&fourth.id).is_some());
    }

    #[tokio::test]
    async fn odd_extensions_are_not_used_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path(), 8);
        let asset = store.save("weird.t x t", b"x").await.unwrap();
        assert_eq!(asset.category, MediaCategory::Unsupported);
        assert_eq!(asset.path.file_name().unwrap().to_string_lossy(), asset.id);

        store.clear().await;
        assert!(!asset.path.exists());
    }
}
