//! Stores cache entries as files below a base directory, one file per key.
//!
//! Writes go to a temporary file in the destination directory which is then
//! renamed into place, so a reader sees either the old entry, the new entry or
//! a miss. Links are relative symlinks on unix and plain copies elsewhere.
use crate::{CacheStore, StoreError, validate_key};
use async_trait::async_trait;
use bytes::Bytes;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub struct FilesystemStore {
    base_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FilesystemStore {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(key
            .split('/')
            .fold(self.base_dir.clone(), |path, segment| path.join(segment)))
    }
}

#[async_trait]
impl CacheStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &data)).await?
    }

    async fn link(&self, key: &str, target: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let target_path = self.path_for(target)?;
        let relative_target = relative_target(key, target);
        tokio::task::spawn_blocking(move || link_atomic(&path, &target_path, &relative_target))
            .await?
    }
}

/// Path of `target` as seen from the directory containing `key`.
fn relative_target(key: &str, target: &str) -> PathBuf {
    let depth = key.split('/').count() - 1;
    let mut path = PathBuf::new();
    for _ in 0..depth {
        path.push("..");
    }
    for segment in target.split('/') {
        path.push(segment);
    }
    path
}

fn invalid_path(path: &Path) -> StoreError {
    StoreError::InvalidKey(path.display().to_string())
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().ok_or_else(|| invalid_path(path))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn link_atomic(path: &Path, target_path: &Path, relative_target: &Path) -> Result<(), StoreError> {
    let dir = path.parent().ok_or_else(|| invalid_path(path))?;
    fs::create_dir_all(dir)?;

    let tmp = tempfile::Builder::new()
        .prefix(".link")
        .make_in(dir, |tmp_path| create_link(tmp_path, target_path, relative_target))?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn create_link(link: &Path, _target_path: &Path, relative_target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(relative_target, link)
}

#[cfg(not(unix))]
fn create_link(link: &Path, target_path: &Path, _relative_target: &Path) -> io::Result<()> {
    fs::copy(target_path, link).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_target() {
        assert_eq!(
            relative_target("osm/cache_wms/ab/abc.png", "osm/single_color/ffffffff.png"),
            PathBuf::from("../../../osm/single_color/ffffffff.png")
        );
        assert_eq!(relative_target("a", "b"), PathBuf::from("b"));
    }

    #[tokio::test]
    async fn test_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        assert!(store.get("osm/cache_wms/ab/abc.png").await.unwrap().is_none());

        store
            .put("osm/cache_wms/ab/abc.png", Bytes::from_static(b"first"))
            .await
            .unwrap();
        assert_eq!(
            store.get("osm/cache_wms/ab/abc.png").await.unwrap().unwrap(),
            Bytes::from_static(b"first")
        );

        // Overwrites replace the entry
        store
            .put("osm/cache_wms/ab/abc.png", Bytes::from_static(b"second"))
            .await
            .unwrap();
        assert_eq!(
            store.get("osm/cache_wms/ab/abc.png").await.unwrap().unwrap(),
            Bytes::from_static(b"second")
        );

        // No temporary files are left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("osm/cache_wms/ab"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_link() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        store
            .put("osm/single_color/ffffffff.png", Bytes::from_static(b"white"))
            .await
            .unwrap();
        store
            .link("osm/cache_wms/ab/abc.png", "osm/single_color/ffffffff.png")
            .await
            .unwrap();
        store
            .link("osm/cache_wms/cd/cde.png", "osm/single_color/ffffffff.png")
            .await
            .unwrap();

        assert_eq!(
            store.get("osm/cache_wms/ab/abc.png").await.unwrap().unwrap(),
            Bytes::from_static(b"white")
        );
        assert_eq!(
            store.get("osm/cache_wms/cd/cde.png").await.unwrap().unwrap(),
            Bytes::from_static(b"white")
        );

        #[cfg(unix)]
        {
            let link = dir.path().join("osm/cache_wms/ab/abc.png");
            assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
            assert_eq!(
                fs::canonicalize(&link).unwrap(),
                fs::canonicalize(dir.path().join("osm/single_color/ffffffff.png")).unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_relink_replaces_link_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        store
            .put("osm/single_color/000000ff.png", Bytes::from_static(b"black"))
            .await
            .unwrap();
        store
            .put("osm/single_color/ffffffff.png", Bytes::from_static(b"white"))
            .await
            .unwrap();
        for target in ["osm/single_color/000000ff.png", "osm/single_color/ffffffff.png"] {
            store.link("osm/cache_wms/ab/abc.png", target).await.unwrap();
        }

        assert_eq!(
            store.get("osm/cache_wms/ab/abc.png").await.unwrap().unwrap(),
            Bytes::from_static(b"white")
        );
        let entries: Vec<_> = fs::read_dir(dir.path().join("osm/cache_wms/ab"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("abc.png")]);
    }

    #[tokio::test]
    async fn test_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        assert!(matches!(
            store.get("../outside").await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.put("/abs", Bytes::new()).await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
