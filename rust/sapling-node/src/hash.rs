/// Multiplier applied to a child's subtree hash before it is folded into its
/// parent.
pub const HASH_PRIME: u64 = 77_081;

/// Incremental digest over a record's own payload, truncated to 64 bits.
pub struct ContentHasher {
    hasher: blake3::Hasher,
}

impl ContentHasher {
    /// Start a digest for a record of the given kind
    pub fn new(kind: u8) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[kind]);
        Self { hasher }
    }

    /// Feed a 64-bit field
    pub fn u64(mut self, value: u64) -> Self {
        self.hasher.update(&value.to_be_bytes());
        self
    }

    /// Feed a 32-bit field
    pub fn i32(mut self, value: i32) -> Self {
        self.hasher.update(&value.to_be_bytes());
        self
    }

    /// Feed a variable-length field, length first
    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.hasher.update(&(value.len() as u64).to_be_bytes());
        self.hasher.update(value);
        self
    }

    /// The first eight digest bytes, big-endian
    pub fn finish(self) -> u64 {
        let digest = self.hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_be_bytes(head)
    }
}

/// Subtree hash of a node given its content hash and the subtree hashes of
/// every child.
pub fn subtree_hash<I>(content_hash: u64, children: I) -> u64
where
    I: IntoIterator<Item = u64>,
{
    children.into_iter().fold(content_hash, |hash, child| {
        hash.wrapping_add(HASH_PRIME.wrapping_mul(child))
    })
}

/// The parent hash after one child's contribution changed from `old_child` to
/// `new_child`.
pub fn replace_child_hash(parent_hash: u64, old_child: u64, new_child: u64) -> u64 {
    parent_hash.wrapping_add(HASH_PRIME.wrapping_mul(new_child.wrapping_sub(old_child)))
}

/// Interned 32-bit key of a name or namespace URI.
pub fn name_key(name: &str) -> i32 {
    let digest = blake3::hash(name.as_bytes());
    let mut head = [0u8; 4];
    head.copy_from_slice(&digest.as_bytes()[..4]);
    i32::from_be_bytes(head)
}
