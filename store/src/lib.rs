//! Cache stores for rendered map images.
//!
//! Keys are opaque, slash separated strings such as
//! `osm/cache_wms/3f/3f9a...c2.png`. A store never interprets them beyond
//! validating that they stay inside its namespace.
pub mod config;
pub mod filesystem;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use config::StoreConfig;
use std::io;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the stored bytes for `key`, following links. `None` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Stores `data` under `key`. Readers never observe a partially written entry.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError>;

    /// Makes `key` resolve to whatever is stored under `target`.
    async fn link(&self, key: &str, target: &str) -> Result<(), StoreError>;
}

pub fn get_store(config: StoreConfig) -> Arc<dyn CacheStore> {
    match config {
        StoreConfig::Filesystem { base_dir } => {
            tracing::info!(base_dir = %base_dir.display(), "using filesystem cache store");
            Arc::new(filesystem::FilesystemStore::new(base_dir))
        }
        StoreConfig::Memory {
            max_size_bytes,
            ttl_secs,
        } => {
            tracing::info!(max_size_bytes, ?ttl_secs, "using in-memory cache store");
            Arc::new(memory::MemoryStore::new(
                max_size_bytes,
                ttl_secs.map(std::time::Duration::from_secs),
            ))
        }
    }
}

/// Rejects keys that could escape the store namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("osm/cache_wms/ab/abcdef.png").is_ok());
        assert!(validate_key("single").is_ok());

        for key in ["", "/etc/passwd", "a/../b", "a//b", "./a", "a\\b", "a/"] {
            assert!(
                matches!(validate_key(key), Err(StoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_get_store_memory() {
        let store = get_store(StoreConfig::default());
        store.put("a/b", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap().unwrap().as_ref(), b"x");
    }

    #[tokio::test]
    async fn test_get_store_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = get_store(StoreConfig::Filesystem {
            base_dir: dir.path().to_path_buf(),
        });
        store.put("a/b", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap().unwrap().as_ref(), b"x");
        assert!(dir.path().join("a").join("b").exists());
    }
}
