/// On-disk form of the repository.
///
/// One JSON object, message id → RFC 3339 birth. Written wholesale through a
/// temporary sibling and a rename so a crash mid-write leaves the previous
/// snapshot intact. No internal locking; a single writer is assumed.
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::BoomError;
use crate::store::Entries;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Use `path` as the snapshot file, creating its directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BoomError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| BoomError::SnapshotIo {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last snapshot.
    ///
    /// [`BoomError::SnapshotNotFound`] when no snapshot was ever written.
    pub async fn read(&self) -> Result<Entries, BoomError> {
        let path = self.path.clone();
        run_blocking(move || read_file(&path)).await
    }

    /// Replace the snapshot with `entries`.
    pub async fn write(&self, entries: &Entries) -> Result<(), BoomError> {
        let bytes = serde_json::to_vec(entries).map_err(BoomError::SnapshotEncode)?;
        let path = self.path.clone();
        run_blocking(move || write_file(&path, &bytes)).await
    }
}

fn read_file(path: &Path) -> Result<Entries, BoomError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(BoomError::SnapshotNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(BoomError::SnapshotIo {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| BoomError::CorruptSnapshot {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), BoomError> {
    let tmp = tmp_path(path);
    let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
    file.write_all(bytes).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_err(path))
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> BoomError {
    let path = path.to_path_buf();
    move |source| BoomError::SnapshotIo { path, source }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn run_blocking<T, F>(f: F) -> Result<T, BoomError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BoomError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BoomError::Task(format!("snapshot io task: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageId;
    use chrono::{TimeZone, Utc};

    fn entries() -> Entries {
        let mut e = Entries::new();
        e.insert(MessageId::new("100"), Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        e.insert(MessageId::new("200"), Utc.timestamp_opt(1_700_000_500, 0).unwrap());
        e
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path().join("messages.json")).unwrap();
        let err = store.read().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path().join("messages.json")).unwrap();
        store.write(&entries()).await.unwrap();
        assert_eq!(store.read().await.unwrap(), entries());
        assert!(!tmp_path(store.path()).exists());
    }

    #[tokio::test]
    async fn write_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path().join("messages.json")).unwrap();
        store.write(&entries()).await.unwrap();
        store.write(&Entries::new()).await.unwrap();
        assert!(store.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("store").join("boom-message");
        let store = SnapshotStore::open(nested.join("messages.json")).unwrap();
        assert!(nested.is_dir());
        store.write(&entries()).await.unwrap();
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        fs::write(&path, b"{not json").unwrap();
        let store = SnapshotStore::open(&path).unwrap();
        assert!(matches!(
            store.read().await,
            Err(BoomError::CorruptSnapshot { .. })
        ));
    }

    #[tokio::test]
    async fn reads_offset_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        fs::write(
            &path,
            br#"{"42":"2024-03-01T12:00:00.123456789+03:00"}"#,
        )
        .unwrap();
        let store = SnapshotStore::open(&path).unwrap();
        let loaded = store.read().await.unwrap();
        let birth = loaded[&MessageId::new("42")];
        assert_eq!(birth.to_rfc3339(), "2024-03-01T09:00:00.123456789+00:00");
    }
}
