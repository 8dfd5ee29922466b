// In-memory cache store backed by moka. Entries are weighed by their size in
// bytes; links are stored as small alias entries that are resolved on read.
use crate::{CacheStore, StoreError, validate_key};
use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use std::time::Duration;

#[derive(Clone, Debug)]
enum Entry {
    Data(Bytes),
    Link(String),
}

impl Entry {
    fn weight(&self) -> u32 {
        let len = match self {
            Entry::Data(data) => data.len(),
            Entry::Link(target) => target.len(),
        };
        len.try_into().unwrap_or(u32::MAX)
    }
}

pub struct MemoryStore {
    cache: Cache<String, Entry>,
}

impl MemoryStore {
    pub fn new(max_size_bytes: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder()
            .name("tile_store")
            .weigher(|_key: &String, value: &Entry| -> u32 { value.weight() })
            .max_capacity(max_size_bytes);

        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }

        MemoryStore {
            cache: builder.build(),
        }
    }

    /// Returns the key `key` links to, if it is a link.
    pub async fn link_target(&self, key: &str) -> Option<String> {
        match self.cache.get(key).await {
            Some(Entry::Link(target)) => Some(target),
            _ => None,
        }
    }

    /// Number of entries holding image data, links excluded.
    pub async fn data_entry_count(&self) -> usize {
        self.cache.run_pending_tasks().await;
        self.cache
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Data(_)))
            .count()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        validate_key(key)?;
        match self.cache.get(key).await {
            Some(Entry::Data(data)) => Ok(Some(data)),
            // Links are never chained, one hop is enough.
            Some(Entry::Link(target)) => match self.cache.get(&target).await {
                Some(Entry::Data(data)) => Ok(Some(data)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        validate_key(key)?;
        self.cache.insert(key.to_string(), Entry::Data(data)).await;
        Ok(())
    }

    async fn link(&self, key: &str, target: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        validate_key(target)?;
        self.cache
            .insert(key.to_string(), Entry::Link(target.to_string()))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryStore::new(1_000_000, None);

        assert!(store.get("osm/a.png").await.unwrap().is_none());
        store
            .put("osm/a.png", Bytes::from_static(b"tile"))
            .await
            .unwrap();
        assert_eq!(
            store.get("osm/a.png").await.unwrap(),
            Some(Bytes::from_static(b"tile"))
        );
    }

    #[tokio::test]
    async fn test_links_resolve_to_target() {
        let store = MemoryStore::new(1_000_000, None);

        store
            .put("osm/single_color/ff0000ff.png", Bytes::from_static(b"red"))
            .await
            .unwrap();
        store
            .link("osm/a.png", "osm/single_color/ff0000ff.png")
            .await
            .unwrap();
        store
            .link("osm/b.png", "osm/single_color/ff0000ff.png")
            .await
            .unwrap();

        assert_eq!(
            store.get("osm/a.png").await.unwrap(),
            Some(Bytes::from_static(b"red"))
        );
        assert_eq!(
            store.link_target("osm/b.png").await.as_deref(),
            Some("osm/single_color/ff0000ff.png")
        );
        assert_eq!(store.link_target("osm/single_color/ff0000ff.png").await, None);
        assert_eq!(store.data_entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_dangling_link_is_a_miss() {
        let store = MemoryStore::new(1_000_000, None);
        store.link("osm/a.png", "osm/missing.png").await.unwrap();
        assert!(store.get("osm/a.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl() {
        let store = MemoryStore::new(1_000_000, Some(Duration::from_millis(200)));
        store
            .put("osm/a.png", Bytes::from_static(b"tile"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        store.cache.run_pending_tasks().await;

        assert!(store.get("osm/a.png").await.unwrap().is_none());
    }
}
