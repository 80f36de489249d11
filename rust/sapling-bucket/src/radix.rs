use crate::SaplingBucketError;

const MAX_LEVEL_WIDTH: u8 = 16;

/// Static radix addressing over 64-bit keys.
///
/// A key is split into per-level offsets by bit width, most significant level
/// first. Resolution indexes one bucket per level with no comparisons, so the
/// depth of a tree is fixed by its widths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Radix {
    widths: Vec<u8>,
    // shifts[level] is the number of key bits below that level
    shifts: Vec<u32>,
}

impl Radix {
    /// Build an addressing scheme from per-level bit widths summing to 64.
    pub fn new(widths: Vec<u8>) -> Result<Self, SaplingBucketError> {
        if widths.len() < 2 {
            return Err(SaplingBucketError::Configuration(
                "A radix needs at least two levels".into(),
            ));
        }
        if let Some(width) = widths
            .iter()
            .find(|width| **width == 0 || **width > MAX_LEVEL_WIDTH)
        {
            return Err(SaplingBucketError::Configuration(format!(
                "Level width {width} is outside 1..={MAX_LEVEL_WIDTH}"
            )));
        }
        let total: u32 = widths.iter().map(|width| u32::from(*width)).sum();
        if total != 64 {
            return Err(SaplingBucketError::Configuration(format!(
                "Level widths sum to {total} bits, expected 64"
            )));
        }

        let mut shifts = vec![0u32; widths.len()];
        let mut below = 64;
        for (level, width) in widths.iter().enumerate() {
            below -= u32::from(*width);
            shifts[level] = below;
        }

        Ok(Self { widths, shifts })
    }

    /// Per-level widths in bits
    pub fn widths(&self) -> &[u8] {
        &self.widths
    }

    /// Number of levels
    pub fn levels(&self) -> usize {
        self.widths.len()
    }

    /// Number of slots of a bucket at `level`
    pub fn fan_out(&self, level: usize) -> usize {
        1usize << self.widths[level]
    }

    /// Offset of `key` within the bucket at `level`
    pub fn offset(&self, key: u64, level: usize) -> usize {
        let mask = (1u64 << self.widths[level]) - 1;
        ((key >> self.shifts[level]) & mask) as usize
    }

    /// Offsets of `key` at every level, most significant first
    pub fn offsets(&self, key: u64) -> Vec<usize> {
        (0..self.levels())
            .map(|level| self.offset(key, level))
            .collect()
    }

    /// Rebuild a key from its offsets; `None` when the offsets do not fit
    /// this scheme.
    pub fn compose(&self, offsets: &[usize]) -> Option<u64> {
        if offsets.len() != self.levels() {
            return None;
        }
        offsets
            .iter()
            .enumerate()
            .try_fold(0u64, |key, (level, offset)| {
                if *offset >= self.fan_out(level) {
                    return None;
                }
                Some(key | ((*offset as u64) << self.shifts[level]))
            })
    }

    /// Key bits above `level`, identifying the bucket at that level that a
    /// key resolves through. Level 0 always yields 0.
    pub fn prefix(&self, key: u64, level: usize) -> u64 {
        let shift = self.shifts[level] + u32::from(self.widths[level]);
        key.checked_shr(shift).unwrap_or(0)
    }

    /// Given the prefix of a bucket at `level`, the prefix of its parent and
    /// the parent slot pointing at it.
    pub fn parent_of(&self, prefix: u64, level: usize) -> (u64, usize) {
        let width = self.widths[level - 1];
        let mask = (1u64 << width) - 1;
        (prefix >> width, (prefix & mask) as usize)
    }

    /// First key resolving through the bucket at `level` with `prefix`
    pub fn first_key(&self, prefix: u64, level: usize) -> u64 {
        let shift = self.shifts[level] + u32::from(self.widths[level]);
        prefix.checked_shl(shift).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use proptest::prelude::*;

    use super::Radix;
    use crate::ResourceConfig;

    fn node_radix() -> Radix {
        ResourceConfig::new("tree")
            .node_radix()
            .unwrap_or_else(|error| panic!("{error}"))
    }

    #[test]
    fn it_rejects_widths_not_covering_64_bits() {
        assert!(Radix::new(vec![32, 31]).is_err());
        assert!(Radix::new(vec![64]).is_err());
        assert!(Radix::new(vec![0, 16, 16, 16, 16]).is_err());
        assert!(Radix::new(vec![32, 32]).is_err());
        assert!(Radix::new(vec![16, 16, 16, 16]).is_ok());
    }

    #[test]
    fn it_addresses_boundary_keys() -> Result<()> {
        let radix = node_radix();

        assert_eq!(radix.offsets(0), vec![0; 7]);
        assert_eq!(
            radix.offsets(u64::MAX),
            vec![1023, 1023, 1023, 1023, 1023, 127, 127]
        );
        // Last slot of the first data bucket, then the first slot of the next.
        assert_eq!(radix.offsets(127), vec![0, 0, 0, 0, 0, 0, 127]);
        assert_eq!(radix.offsets(128), vec![0, 0, 0, 0, 0, 1, 0]);
        // Straddling a full fan-out of the deepest indirect level.
        assert_eq!(radix.offsets(128 * 128 - 1), vec![0, 0, 0, 0, 0, 127, 127]);
        assert_eq!(radix.offsets(128 * 128), vec![0, 0, 0, 0, 1, 0, 0]);

        for key in [0, 127, 128, 16_383, 16_384, u64::MAX - 1, u64::MAX] {
            assert_eq!(radix.compose(&radix.offsets(key)), Some(key));
        }

        Ok(())
    }

    #[test]
    fn it_refuses_offsets_outside_the_fan_out() {
        let radix = node_radix();

        assert_eq!(radix.compose(&[0, 0, 0, 0, 0, 128, 0]), None);
        assert_eq!(radix.compose(&[0, 0]), None);
    }

    #[test]
    fn it_derives_parent_prefixes() {
        let radix = node_radix();
        let key = 0x0123_4567_89ab_cdef;
        let data = radix.levels() - 1;

        let (parent, slot) = radix.parent_of(radix.prefix(key, data), data);
        assert_eq!(parent, radix.prefix(key, data - 1));
        assert_eq!(slot, radix.offset(key, data - 1));
        assert_eq!(radix.prefix(key, 0), 0);
        assert_eq!(radix.first_key(radix.prefix(key, data), data), key & !127);
    }

    proptest! {
        #[test]
        fn addressing_is_bijective(key in any::<u64>()) {
            let radix = node_radix();
            prop_assert_eq!(radix.compose(&radix.offsets(key)), Some(key));

            let revisions = Radix::new(vec![8; 8]).unwrap_or_else(|error| panic!("{error}"));
            prop_assert_eq!(revisions.compose(&revisions.offsets(key)), Some(key));
        }
    }
}
