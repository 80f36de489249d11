use std::{
    fmt::Debug,
    io::{Read, Write},
    sync::Arc,
};

use brotli::{CompressorWriter, Decompressor};

use crate::SaplingStorageError;

const BUFFER_SIZE: usize = 4096;
const WINDOW_SIZE: u32 = 20;
const CHECKSUM_LENGTH: usize = blake3::OUT_LEN;

/// An invertible byte-to-byte stage applied to serialized buckets on their way
/// to (and from) a backend.
pub trait ByteTransform: Debug + Send + Sync {
    /// Stable identifier recorded in a resource's configuration
    fn id(&self) -> &'static str;

    /// Apply the transform
    fn encode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, SaplingStorageError>;

    /// Invert the transform
    fn decode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, SaplingStorageError>;
}

/// Brotli compression
#[derive(Clone, Copy, Debug)]
pub struct BrotliTransform {
    level: u32,
}

impl BrotliTransform {
    /// Identifier of this transform
    pub const ID: &'static str = "brotli";

    /// Compress at the given quality (0 to 11)
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(11),
        }
    }
}

impl Default for BrotliTransform {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ByteTransform for BrotliTransform {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn encode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, SaplingStorageError> {
        let mut compressed = Vec::new();
        {
            let mut writer =
                CompressorWriter::new(&mut compressed, BUFFER_SIZE, self.level, WINDOW_SIZE);
            writer.write_all(&bytes).map_err(|error| {
                SaplingStorageError::Transform(format!("Could not compress bucket: {error}"))
            })?;
        }
        Ok(compressed)
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, SaplingStorageError> {
        let mut decompressed = Vec::new();
        Decompressor::new(bytes.as_slice(), BUFFER_SIZE)
            .read_to_end(&mut decompressed)
            .map_err(|error| {
                SaplingStorageError::Transform(format!("Could not decompress bucket: {error}"))
            })?;
        Ok(decompressed)
    }
}

/// Appends a BLAKE3 digest on write and verifies it on read
#[derive(Clone, Copy, Debug, Default)]
pub struct ChecksumTransform;

impl ChecksumTransform {
    /// Identifier of this transform
    pub const ID: &'static str = "checksum";
}

impl ByteTransform for ChecksumTransform {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn encode(&self, mut bytes: Vec<u8>) -> Result<Vec<u8>, SaplingStorageError> {
        let digest = blake3::hash(&bytes);
        bytes.extend_from_slice(digest.as_bytes());
        Ok(bytes)
    }

    fn decode(&self, mut bytes: Vec<u8>) -> Result<Vec<u8>, SaplingStorageError> {
        if bytes.len() < CHECKSUM_LENGTH {
            return Err(SaplingStorageError::Verification(format!(
                "{} bytes is too short to carry a checksum",
                bytes.len()
            )));
        }
        let expected = bytes.split_off(bytes.len() - CHECKSUM_LENGTH);
        if blake3::hash(&bytes).as_bytes() != expected.as_slice() {
            return Err(SaplingStorageError::Verification(
                "checksum does not match content".into(),
            ));
        }
        Ok(bytes)
    }
}

/// An ordered sequence of [ByteTransform]s. Encoding runs the stages front to
/// back, decoding runs them back to front.
#[derive(Clone, Debug, Default)]
pub struct TransformPipeline {
    stages: Vec<Arc<dyn ByteTransform>>,
}

impl TransformPipeline {
    /// A pipeline that passes bytes through untouched
    pub fn identity() -> Self {
        Self::default()
    }

    /// Resolve a pipeline from transform identifiers
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self, SaplingStorageError> {
        let mut pipeline = Self::identity();
        for id in ids {
            pipeline = match id.as_ref() {
                BrotliTransform::ID => pipeline.with(BrotliTransform::default()),
                ChecksumTransform::ID => pipeline.with(ChecksumTransform),
                unknown => {
                    return Err(SaplingStorageError::Transform(format!(
                        "Unknown byte transform '{unknown}'"
                    )));
                }
            };
        }
        Ok(pipeline)
    }

    /// Append a stage
    pub fn with<T: ByteTransform + 'static>(mut self, stage: T) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Identifiers of the stages, in encoding order
    pub fn ids(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.id()).collect()
    }

    /// Whether the pipeline has no stages
    pub fn is_identity(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order
    pub fn encode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, SaplingStorageError> {
        self.stages
            .iter()
            .try_fold(bytes, |bytes, stage| stage.encode(bytes))
    }

    /// Undo every stage in reverse order
    pub fn decode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, SaplingStorageError> {
        self.stages
            .iter()
            .rev()
            .try_fold(bytes, |bytes, stage| stage.decode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::{SaplingStorageError, TransformPipeline};

    fn sample() -> Vec<u8> {
        b"bucket bucket bucket bucket bucket bucket".repeat(16)
    }

    #[test]
    fn it_restores_bytes_through_every_stage() -> Result<()> {
        let pipeline = TransformPipeline::from_ids(&["brotli", "checksum"])?;
        let encoded = pipeline.encode(sample())?;

        assert!(encoded.len() < sample().len());
        assert_eq!(pipeline.decode(encoded)?, sample());
        assert_eq!(pipeline.ids(), vec!["brotli", "checksum"]);

        Ok(())
    }

    #[test]
    fn it_detects_tampered_bytes() -> Result<()> {
        let pipeline = TransformPipeline::from_ids(&["checksum"])?;
        let mut encoded = pipeline.encode(sample())?;
        encoded[3] ^= 0x01;

        assert!(matches!(
            pipeline.decode(encoded),
            Err(SaplingStorageError::Verification(_))
        ));

        Ok(())
    }

    #[test]
    fn it_rejects_unknown_transform_ids() {
        assert!(matches!(
            TransformPipeline::from_ids(&["rot13"]),
            Err(SaplingStorageError::Transform(_))
        ));
    }

    #[test]
    fn it_passes_bytes_through_an_empty_pipeline() -> Result<()> {
        let pipeline = TransformPipeline::identity();

        assert!(pipeline.is_identity());
        assert_eq!(pipeline.encode(vec![1, 2, 3])?, vec![1, 2, 3]);

        Ok(())
    }
}
