use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use base58::ToBase58;
use tokio::io::AsyncWriteExt;

use crate::SaplingStorageError;

use super::StorageBackend;

const PARTIAL_SUFFIX: &str = ".partial";

/// A basic file-system-based [StorageBackend] implementation. All values are
/// stored inside a root directory as files named after their (base58-encoded)
/// keys.
///
/// Writes land in a sibling `.partial` file first, are synced to disk and are
/// then renamed into place, so a reader never observes a half-written value
/// and a value is durable once `set` returns. The rename itself is not
/// followed by a directory sync.
#[derive(Clone)]
pub struct FileSystemStorageBackend<Key, Value>
where
    Key: AsRef<[u8]> + Clone,
    Value: AsRef<[u8]> + From<Vec<u8>> + Clone,
{
    root_dir: PathBuf,
    closed: Arc<AtomicBool>,
    key_type: PhantomData<Key>,
    value_type: PhantomData<Value>,
}

impl<Key, Value> FileSystemStorageBackend<Key, Value>
where
    Key: AsRef<[u8]> + Clone,
    Value: AsRef<[u8]> + From<Vec<u8>> + Clone,
{
    /// Creates a new [`FileSystemStorageBackend`] that stores files in
    /// `root_dir`, creating the directory if needed.
    pub async fn new<Pathlike>(root_dir: Pathlike) -> Result<Self, SaplingStorageError>
    where
        Pathlike: AsRef<Path>,
    {
        let root_dir = root_dir.as_ref().to_owned();
        tokio::fs::create_dir_all(&root_dir)
            .await
            .map_err(|error| SaplingStorageError::StorageBackend(format!("{error}")))?;
        Ok(Self {
            root_dir,
            closed: Arc::new(AtomicBool::new(false)),
            key_type: PhantomData,
            value_type: PhantomData,
        })
    }

    /// The directory holding one file per stored value
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn make_path(&self, key: &Key) -> Result<PathBuf, SaplingStorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SaplingStorageError::Closed);
        }
        Ok(self.root_dir.join(key.as_ref().to_base58()))
    }
}

#[async_trait]
impl<Key, Value> StorageBackend for FileSystemStorageBackend<Key, Value>
where
    Key: AsRef<[u8]> + Clone + Send + Sync,
    Value: AsRef<[u8]> + Clone + From<Vec<u8>> + Send + Sync,
{
    type Key = Key;
    type Value = Value;
    type Error = SaplingStorageError;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        let path = self.make_path(&key)?;
        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);

        let io_error = |error: std::io::Error| SaplingStorageError::StorageBackend(format!("{error}"));
        let mut file = tokio::fs::File::create(&partial).await.map_err(io_error)?;
        file.write_all(value.as_ref()).await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        drop(file);

        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|error| SaplingStorageError::StorageBackend(format!("{error}")))?;
        Ok(())
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        let path = self.make_path(key)?;

        match tokio::fs::read(path).await {
            Ok(value) => Ok(Some(Value::from(value))),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(SaplingStorageError::StorageBackend(format!("{error}"))),
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
