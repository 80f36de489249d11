use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use sapling_storage::TransformPipeline;

use crate::{BucketCache, NullBucketCache, Radix, SaplingBucketError, SieveBucketCache};

/// Name of the configuration descriptor inside a resource directory.
pub const CONFIG_FILE: &str = "resource.json";

/// Directory holding one file per bucket inside a resource directory.
pub const DATA_DIR: &str = "data";

/// Persisted description of how a resource is laid out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Bit widths of the node radix; the last entry addresses slots of a data
    /// bucket
    pub node_widths: Vec<u8>,
    /// Bit widths of the revision radix
    pub revision_widths: Vec<u8>,
    /// Identifier of the node factory
    pub node_factory: String,
    /// Byte transforms applied around bucket storage, in encoding order
    #[serde(default)]
    pub transforms: Vec<String>,
    /// Bound of the shared read cache, zero disables it
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    4096
}

impl ResourceConfig {
    /// Default layout for a resource of the given node factory
    pub fn new(node_factory: impl Into<String>) -> Self {
        Self {
            node_widths: vec![10, 10, 10, 10, 10, 7, 7],
            revision_widths: vec![8; 8],
            node_factory: node_factory.into(),
            transforms: Vec::new(),
            cache_capacity: default_cache_capacity(),
        }
    }

    /// Use the given byte transforms
    pub fn with_transforms<S: Into<String>>(mut self, transforms: impl IntoIterator<Item = S>) -> Self {
        self.transforms = transforms.into_iter().map(Into::into).collect();
        self
    }

    /// Use a shared read cache of the given bound
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Check every field, failing on the first unusable one
    pub fn validate(&self) -> Result<(), SaplingBucketError> {
        self.node_radix()?;
        self.revision_radix()?;
        self.pipeline()?;
        if self.node_factory.is_empty() {
            return Err(SaplingBucketError::Configuration(
                "Missing node factory identifier".into(),
            ));
        }
        Ok(())
    }

    /// Addressing of node keys
    pub fn node_radix(&self) -> Result<Radix, SaplingBucketError> {
        Radix::new(self.node_widths.clone())
    }

    /// Addressing of revision numbers
    pub fn revision_radix(&self) -> Result<Radix, SaplingBucketError> {
        Radix::new(self.revision_widths.clone())
    }

    /// The configured byte transform pipeline
    pub fn pipeline(&self) -> Result<TransformPipeline, SaplingBucketError> {
        TransformPipeline::from_ids(&self.transforms)
            .map_err(|error| SaplingBucketError::Configuration(error.to_string()))
    }

    /// The shared read cache described by this configuration
    pub fn cache<Node>(&self) -> Result<Arc<dyn BucketCache<Node>>, SaplingBucketError>
    where
        Node: Send + Sync + 'static,
    {
        Ok(match self.cache_capacity {
            0 => Arc::new(NullBucketCache),
            capacity => Arc::new(SieveBucketCache::new(capacity)?),
        })
    }

    /// Read the descriptor of the resource in `directory`, if one exists
    pub async fn load(directory: &Path) -> Result<Option<Self>, SaplingBucketError> {
        let path = directory.join(CONFIG_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(io_error(&path, error)),
        };
        let config: Self = serde_json::from_slice(&bytes).map_err(|error| {
            SaplingBucketError::Configuration(format!("{}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Write this descriptor into `directory`
    pub async fn store(&self, directory: &Path) -> Result<(), SaplingBucketError> {
        let path = directory.join(CONFIG_FILE);
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|error| SaplingBucketError::Configuration(error.to_string()))?;
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|error| io_error(directory, error))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|error| io_error(&path, error))
    }

    /// Where the buckets of the resource in `directory` live
    pub fn data_dir(directory: &Path) -> PathBuf {
        directory.join(DATA_DIR)
    }
}

fn io_error(path: &Path, error: std::io::Error) -> SaplingBucketError {
    SaplingBucketError::Io(sapling_storage::SaplingStorageError::StorageBackend(format!(
        "{}: {error}",
        path.display()
    )))
}
