use std::cell::Cell;

use crate::SaplingNodeError;

/// Marker written in place of an absent key link.
pub const NULL_LINK: u64 = u64::MAX;

/// Big-endian byte writer.
#[derive(Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    /// Create a new [`Writer`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a `u8` into the writer.
    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Write a `u32` into the writer.
    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Write an `i32` into the writer.
    pub fn write_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a `u64` into the writer.
    pub fn write_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Write raw bytes into the writer, without a length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.bytes.extend_from_slice(value);
    }

    /// Write a 4-byte count.
    pub fn write_len(&mut self, length: usize) -> Result<(), SaplingNodeError> {
        let length = u32::try_from(length).map_err(|error| {
            SaplingNodeError::EncodeFailed(format!("Length {length} too large: {error}"))
        })?;
        self.write_u32(length);
        Ok(())
    }

    /// Write length-prefixed bytes.
    pub fn write_blob(&mut self, value: &[u8]) -> Result<(), SaplingNodeError> {
        self.write_len(value.len())?;
        self.write_bytes(value);
        Ok(())
    }

    /// Write an optional key, using [NULL_LINK] for `None`.
    pub fn write_link(&mut self, link: Option<u64>) -> Result<(), SaplingNodeError> {
        match link {
            Some(NULL_LINK) => Err(SaplingNodeError::EncodeFailed(
                "Key collides with the null link marker".into(),
            )),
            Some(key) => {
                self.write_u64(key);
                Ok(())
            }
            None => {
                self.write_u64(NULL_LINK);
                Ok(())
            }
        }
    }

    /// Write a count-prefixed list of keys.
    pub fn write_keys(&mut self, keys: &[u64]) -> Result<(), SaplingNodeError> {
        self.write_len(keys.len())?;
        for key in keys {
            self.write_u64(*key);
        }
        Ok(())
    }

    /// Write a type implementing [`WriteInto`] into the writer.
    pub fn write<W: WriteInto + ?Sized>(&mut self, target: &W) -> Result<(), SaplingNodeError> {
        target.write_into(self)
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Convert this writer into the bytes that were written.
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Types implementing [`WriteInto`] define how they are written via a
/// [`Writer`].
pub trait WriteInto {
    /// Write this value into a [`Writer`].
    fn write_into(&self, writer: &mut Writer) -> Result<(), SaplingNodeError>;
}

macro_rules! read_type {
    ( $fn_name:ident, $ty:ty ) => {
        #[doc = "Read a big-endian `"]
        #[doc = stringify!($ty)]
        #[doc = "` from the reader."]
        pub fn $fn_name(&self) -> Result<$ty, SaplingNodeError> {
            const SIZE: usize = std::mem::size_of::<$ty>();
            let (index, next) = self.check_indices(SIZE)?;
            let mut buff = [0u8; SIZE];
            buff.copy_from_slice(&self.bytes[index..next]);
            self.index.set(next);
            Ok(<$ty>::from_be_bytes(buff))
        }
    };
}

/// Read fixed-layout values from a source byte slice.
pub struct Reader<'a> {
    bytes: &'a [u8],
    index: Cell<usize>,
}

impl<'a> Reader<'a> {
    /// Create a new [`Reader`].
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader {
            bytes,
            index: Cell::new(0),
        }
    }

    /// Read a `u8` from the reader.
    pub fn read_u8(&self) -> Result<u8, SaplingNodeError> {
        let (index, next) = self.check_indices(1)?;
        self.index.set(next);
        Ok(self.bytes[index])
    }

    read_type!(read_u32, u32);
    read_type!(read_i32, i32);
    read_type!(read_u64, u64);

    /// Read a sequence of `count` bytes from the reader.
    pub fn read_bytes(&self, count: usize) -> Result<&'a [u8], SaplingNodeError> {
        let (index, next) = self.check_indices(count)?;
        self.index.set(next);
        Ok(&self.bytes[index..next])
    }

    /// Read a 4-byte count.
    pub fn read_len(&self) -> Result<usize, SaplingNodeError> {
        let length = self.read_u32()?;
        usize::try_from(length)
            .map_err(|error| SaplingNodeError::CorruptFormat(format!("Length too large: {error}")))
    }

    /// Read length-prefixed bytes.
    pub fn read_blob(&self) -> Result<Vec<u8>, SaplingNodeError> {
        let length = self.read_len()?;
        Ok(self.read_bytes(length)?.to_vec())
    }

    /// Read an optional key written by [`Writer::write_link`].
    pub fn read_link(&self) -> Result<Option<u64>, SaplingNodeError> {
        Ok(match self.read_u64()? {
            NULL_LINK => None,
            key => Some(key),
        })
    }

    /// Read a count-prefixed list of keys.
    pub fn read_keys(&self) -> Result<Vec<u64>, SaplingNodeError> {
        let count = self.read_len()?;
        // Each key needs eight bytes; refuse counts the buffer cannot hold.
        if count.saturating_mul(8) > self.remaining() {
            return Err(SaplingNodeError::CorruptFormat(format!(
                "Key list of {count} entries overruns the buffer"
            )));
        }
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(self.read_u64()?);
        }
        Ok(keys)
    }

    /// Read `R` from the reader.
    pub fn read<R: ReadFrom>(&self) -> Result<R, SaplingNodeError> {
        R::read_from(self)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.index.get()
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), SaplingNodeError> {
        match self.remaining() {
            0 => Ok(()),
            trailing => Err(SaplingNodeError::CorruptFormat(format!(
                "{trailing} trailing bytes"
            ))),
        }
    }

    fn check_indices(&self, size: usize) -> Result<(usize, usize), SaplingNodeError> {
        let index = self.index.get();
        let next = index
            .checked_add(size)
            .filter(|next| *next <= self.bytes.len())
            .ok_or_else(|| {
                SaplingNodeError::CorruptFormat("Attempted to read out of bounds".into())
            })?;
        Ok((index, next))
    }
}

/// Types implementing [`ReadFrom`] define how they can be instantiated from a
/// [`Reader`].
pub trait ReadFrom: Sized {
    /// Instantiate `Self` from a [`Reader`].
    fn read_from(reader: &Reader<'_>) -> Result<Self, SaplingNodeError>;
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::{Reader, SaplingNodeError, Writer};

    #[test]
    fn it_writes_integers_big_endian() {
        let mut writer = Writer::new();
        writer.write_u32(0x0102_0304);
        writer.write_i32(-1);
        writer.write_u64(0x0a0b);

        assert_eq!(
            writer.into_inner(),
            vec![1, 2, 3, 4, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0, 0, 0, 0x0a, 0x0b]
        );
    }

    #[test]
    fn it_reads_back_mixed_fields() -> Result<()> {
        let mut writer = Writer::new();
        writer.write_u8(7);
        writer.write_link(None)?;
        writer.write_link(Some(42))?;
        writer.write_keys(&[3, 5, 8])?;
        writer.write_blob(b"sapling")?;
        let bytes = writer.into_inner();

        let reader = Reader::new(&bytes);
        assert_eq!(reader.read_u8()?, 7);
        assert_eq!(reader.read_link()?, None);
        assert_eq!(reader.read_link()?, Some(42));
        assert_eq!(reader.read_keys()?, vec![3, 5, 8]);
        assert_eq!(reader.read_blob()?, b"sapling".to_vec());
        reader.finish()?;

        Ok(())
    }

    #[test]
    fn it_refuses_to_read_past_the_end() {
        let reader = Reader::new(&[0, 0, 0, 9, 1, 2]);

        assert!(matches!(
            reader.read_blob(),
            Err(SaplingNodeError::CorruptFormat(_))
        ));
    }

    #[test]
    fn it_refuses_oversized_key_lists() {
        let reader = Reader::new(&[0xff, 0xff, 0xff, 0xff, 0, 0]);

        assert!(matches!(
            reader.read_keys(),
            Err(SaplingNodeError::CorruptFormat(_))
        ));
    }

    #[test]
    fn it_reports_trailing_bytes() -> Result<()> {
        let reader = Reader::new(&[1, 2]);
        reader.read_u8()?;

        assert!(reader.finish().is_err());

        Ok(())
    }

    #[test]
    fn it_rejects_keys_that_collide_with_the_null_marker() {
        let mut writer = Writer::new();

        assert!(writer.write_link(Some(u64::MAX)).is_err());
    }
}
