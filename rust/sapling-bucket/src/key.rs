use std::fmt::Display;

/// Identifier of a stored bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(pub u64);

impl BucketKey {
    /// Slot holding the current [crate::UberBucket]
    pub const UBER: BucketKey = BucketKey(u64::MAX);

    /// Backend key of this bucket
    pub fn to_bytes(self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }
}

impl Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
