use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;

use crate::{FileSystemStorageBackend, SaplingStorageError, StorageBackend};

/// Creates a persisted [`StorageBackend`] in a fresh temporary directory, for
/// use in tests. The directory lives as long as the returned handle.
pub async fn make_target_storage<K>() -> Result<(FileSystemStorageBackend<K, Vec<u8>>, tempfile::TempDir)>
where
    K: AsRef<[u8]> + Clone,
{
    let root = tempfile::tempdir()?;
    let storage = FileSystemStorageBackend::<K, Vec<u8>>::new(root.path()).await?;
    Ok((storage, root))
}

/// A [StorageBackend] proxy that starts failing on demand, for exercising
/// error paths. Clones share the same fault plan.
#[derive(Clone)]
pub struct FaultyStorageBackend<Backend> {
    backend: Backend,
    writes_left: Arc<AtomicUsize>,
    fail_reads: Arc<AtomicBool>,
}

impl<Backend> FaultyStorageBackend<Backend> {
    /// Wrap `backend`; no faults are injected until configured
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            writes_left: Arc::new(AtomicUsize::new(usize::MAX)),
            fail_reads: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Let `count` more writes through, then fail every write after them
    pub fn fail_writes_after(&self, count: usize) {
        self.writes_left.store(count, Ordering::SeqCst);
    }

    /// Make every read fail until [FaultyStorageBackend::heal] is called
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Stop injecting faults
    pub fn heal(&self) {
        self.writes_left.store(usize::MAX, Ordering::SeqCst);
        self.fail_reads.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl<Backend> StorageBackend for FaultyStorageBackend<Backend>
where
    Backend: StorageBackend,
{
    type Key = Backend::Key;
    type Value = Backend::Value;
    type Error = SaplingStorageError;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        let permitted = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                left => Some(left - 1),
            })
            .is_ok();
        if !permitted {
            return Err(SaplingStorageError::StorageBackend(
                "injected write failure".into(),
            ));
        }
        self.backend.set(key, value).await.map_err(Into::into)
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SaplingStorageError::StorageBackend(
                "injected read failure".into(),
            ));
        }
        self.backend.get(key).await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.backend.close().await.map_err(Into::into)
    }
}
