//! File-backed store
//!
//! One directory per actor under the backend root:
//!
//! ```text
//! <root>/<actor id>/name          canonical actor name
//! <root>/<actor id>/alarm         deadline in unix milliseconds
//! <root>/<actor id>/data/<key>    one file per entry, key percent-encoded
//! ```
//!
//! Writes go to a temporary file and are renamed into place, so a crash never
//! leaves a half-written value. `delete_all` renames `data/` away before
//! removing it, which makes the deletion atomic from the reader's side.
//!
//! Directories are created on the first write and remembered, so appending a
//! chunk costs one write and one rename. Deleting them forgets them again.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::fs;

use super::{
    actor_id, alarm_from_millis, alarm_to_millis, ChunkStore, StoreBackend, StoreError,
};

/// Everything except `[A-Za-z0-9_-]` is escaped in file names
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

const NAME_FILE: &str = "name";
const ALARM_FILE: &str = "alarm";
const DATA_DIR: &str = "data";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

fn decode_key(file_name: &str) -> Option<String> {
    percent_decode_str(file_name)
        .decode_utf8()
        .ok()
        .map(|key| key.into_owned())
}

fn not_found_ok<T: Default>(result: std::io::Result<T>) -> std::io::Result<T> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        other => other,
    }
}

fn tmp_name(tag: &str) -> String {
    format!(".{}-{}.tmp", tag, TMP_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Store persisted as files in a per-actor directory
#[derive(Debug)]
pub struct FsStore {
    name: String,
    dir: PathBuf,
    /// Actor directory and name file exist
    dir_ready: AtomicBool,
    /// `data/` exists
    data_ready: AtomicBool,
}

impl FsStore {
    /// Open the store for `name` inside `root`
    pub fn new(root: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        let dir = root.as_ref().join(actor_id(&name));
        Self {
            name,
            dir,
            dir_ready: AtomicBool::new(false),
            data_ready: AtomicBool::new(false),
        }
    }

    /// Directory holding this store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.join(DATA_DIR)
    }

    async fn prepare(&self, dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dir).await?;
        let name_path = self.dir.join(NAME_FILE);
        if !fs::try_exists(&name_path).await? {
            self.write_atomic(&name_path, self.name.as_bytes()).await?;
        }
        self.dir_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn prepare_data(&self) -> Result<(), StoreError> {
        if !self.data_ready.load(Ordering::Acquire) {
            self.prepare(&self.data_dir()).await?;
            self.data_ready.store(true, Ordering::Release);
        }
        Ok(())
    }

    async fn prepare_dir(&self) -> Result<(), StoreError> {
        if !self.dir_ready.load(Ordering::Acquire) {
            self.prepare(&self.dir).await?;
        }
        Ok(())
    }

    async fn write_atomic(&self, target: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let tmp = self.dir.join(tmp_name("write"));
        fs::write(&tmp, contents).await?;
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_dir_if_unused(&self) -> Result<(), StoreError> {
        if fs::try_exists(self.data_dir()).await?
            || fs::try_exists(self.dir.join(ALARM_FILE)).await?
        {
            return Ok(());
        }
        self.dir_ready.store(false, Ordering::Release);
        self.data_ready.store(false, Ordering::Release);
        not_found_ok(fs::remove_dir_all(&self.dir).await)?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        match fs::read(self.data_dir().join(encode_key(key))).await {
            Ok(raw) => Ok(Some(Bytes::from(raw))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.prepare_data().await?;
        self.write_atomic(&self.data_dir().join(encode_key(key)), &value)
            .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError> {
        let data_dir = self.data_dir();
        let mut dir = match fs::read_dir(&data_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(key) = file_name.to_str().and_then(decode_key) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push((key, entry.path()));
            }
        }
        keys.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = Vec::with_capacity(keys.len());
        for (key, path) in keys {
            match fs::read(&path).await {
                Ok(raw) => entries.push((key, Bytes::from(raw))),
                // Raced with delete_all
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.data_ready.store(false, Ordering::Release);
        let trash = self.dir.join(tmp_name("trash"));
        match fs::rename(self.data_dir(), &trash).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        not_found_ok(fs::remove_dir_all(&trash).await)?;
        Ok(())
    }

    async fn set_alarm(&self, at: SystemTime) -> Result<(), StoreError> {
        self.prepare_dir().await?;
        let millis = alarm_to_millis(at).to_string();
        self.write_atomic(&self.dir.join(ALARM_FILE), millis.as_bytes())
            .await
    }

    async fn get_alarm(&self) -> Result<Option<SystemTime>, StoreError> {
        let raw = match fs::read_to_string(self.dir.join(ALARM_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let millis: u64 = raw
            .trim()
            .parse()
            .map_err(|e| StoreError::corrupt(ALARM_FILE, e))?;
        Ok(Some(alarm_from_millis(millis)))
    }

    async fn delete_alarm(&self) -> Result<(), StoreError> {
        not_found_ok(fs::remove_file(self.dir.join(ALARM_FILE)).await)?;
        self.remove_dir_if_unused().await
    }
}

/// Backend storing each actor in its own directory under `root`
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Create a backend rooted at `root` (created on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl StoreBackend for FsBackend {
    async fn open(&self, name: &str) -> Result<Arc<dyn ChunkStore>, StoreError> {
        Ok(Arc::new(FsStore::new(&self.root, name)))
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let has_state = fs::try_exists(path.join(DATA_DIR)).await?
                || fs::try_exists(path.join(ALARM_FILE)).await?;
            if !has_state {
                continue;
            }
            match fs::read_to_string(path.join(NAME_FILE)).await {
                Ok(name) => names.push(name),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!(dir = %path.display(), "Store directory without name, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_key_encoding() {
        assert_eq!(encode_key("c:000000001"), "c%3A000000001");
        assert_eq!(encode_key("seq"), "seq");
        assert_eq!(decode_key("c%3A000000001").unwrap(), "c:000000001");
        assert_eq!(decode_key(&encode_key("../x/y")).unwrap(), "../x/y");
    }

    #[tokio::test]
    async fn test_put_get_list() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path(), "https://example.com/data");

        assert!(store.get("seq").await.unwrap().is_none());
        assert!(store.list("c:").await.unwrap().is_empty());

        store.put("c:000000001", Bytes::from_static(b"world")).await.unwrap();
        store.put("c:000000000", Bytes::from_static(b"hello")).await.unwrap();
        store.put("seq", Bytes::from_static(b"2")).await.unwrap();

        let listed = store.list("c:").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], ("c:000000000".to_string(), Bytes::from_static(b"hello")));
        assert_eq!(listed[1], ("c:000000001".to_string(), Bytes::from_static(b"world")));
        assert_eq!(store.get("seq").await.unwrap().unwrap(), Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FsStore::new(tmp.path(), "https://example.com/data");
            store.put("seq", Bytes::from_static(b"7")).await.unwrap();
        }
        let store = FsStore::new(tmp.path(), "https://example.com/data");
        assert_eq!(store.get("seq").await.unwrap().unwrap(), Bytes::from_static(b"7"));
    }

    #[tokio::test]
    async fn test_delete_all_and_alarm() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path(), "https://example.com/data");
        let at = SystemTime::UNIX_EPOCH + Duration::from_millis(1_800_000_000_000);

        store.put("c:000000000", Bytes::from_static(b"a")).await.unwrap();
        store.set_alarm(at).await.unwrap();
        store.delete_all().await.unwrap();

        assert!(store.list("").await.unwrap().is_empty());
        assert_eq!(store.get_alarm().await.unwrap(), Some(at));

        // Deleting twice is fine
        store.delete_all().await.unwrap();

        store.delete_alarm().await.unwrap();
        assert!(store.get_alarm().await.unwrap().is_none());
        assert!(!store.dir().exists());
    }

    #[tokio::test]
    async fn test_put_after_delete_all_recreates_data_dir() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path(), "https://example.com/data");

        store.put("c:000000000", Bytes::from_static(b"old")).await.unwrap();
        assert!(store.data_ready.load(Ordering::Acquire));
        store.put("c:000000001", Bytes::from_static(b"old")).await.unwrap();

        store.delete_all().await.unwrap();
        assert!(!store.data_ready.load(Ordering::Acquire));
        assert!(!store.data_dir().exists());

        store.put("c:000000000", Bytes::from_static(b"new")).await.unwrap();
        assert_eq!(
            store.list("c:").await.unwrap(),
            [("c:000000000".to_string(), Bytes::from_static(b"new"))]
        );
        let name = std::fs::read_to_string(store.dir().join(NAME_FILE)).unwrap();
        assert_eq!(name, "https://example.com/data");
    }

    #[tokio::test]
    async fn test_alarm_after_directory_removed() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path(), "https://example.com/data");
        let at = SystemTime::UNIX_EPOCH + Duration::from_millis(1_800_000_000_000);

        store.set_alarm(at).await.unwrap();
        store.delete_alarm().await.unwrap();
        assert!(!store.dir().exists());

        // Both directories are created again after the removal
        store.set_alarm(at).await.unwrap();
        assert_eq!(store.get_alarm().await.unwrap(), Some(at));
        store.put("seq", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(store.get("seq").await.unwrap().unwrap(), Bytes::from_static(b"1"));
        assert!(store.dir().join(NAME_FILE).exists());
    }

    #[tokio::test]
    async fn test_backend_names() {
        let tmp = TempDir::new().unwrap();
        let backend = FsBackend::new(tmp.path());
        assert!(backend.names().await.unwrap().is_empty());

        let a = backend.open("https://example.com/a").await.unwrap();
        a.put("seq", Bytes::from_static(b"1")).await.unwrap();
        let b = backend.open("https://example.com/b?x=1").await.unwrap();
        b.set_alarm(SystemTime::now()).await.unwrap();
        backend.open("https://example.com/unused").await.unwrap();

        assert_eq!(
            backend.names().await.unwrap(),
            ["https://example.com/a", "https://example.com/b?x=1"]
        );
    }
}
