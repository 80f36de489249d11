use std::collections::BTreeMap;

use sapling_node::{NodeFactory, NodeKey, NodeRecord, Reader, Writer};

use crate::{BucketKey, SaplingBucketError};

const MAX_FAN_OUT: usize = 1 << 16;

/// Root of roots: names the latest revision and where every other revision
/// can be found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UberBucket {
    /// Number of committed revisions
    pub revision_count: u64,
    /// Root of the latest revision
    pub latest_root: Option<BucketKey>,
    /// Root of the radix tree over revision numbers
    pub revision_tree: Option<BucketKey>,
    /// First bucket key not yet handed out
    pub next_bucket_key: u64,
}

impl UberBucket {
    /// Latest committed revision, `None` before the first commit
    pub fn latest_revision(&self) -> Option<u64> {
        self.revision_count.checked_sub(1)
    }
}

/// One committed revision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RevisionRootBucket {
    /// Revision number
    pub revision: u64,
    /// Highest node key allocated so far
    pub max_node_key: Option<NodeKey>,
    /// Top [IndirectBucket] of the node tree
    pub node_tree: Option<BucketKey>,
    /// The revision's [MetaBucket]
    pub meta: Option<BucketKey>,
    /// Commit time in milliseconds since the Unix epoch
    pub timestamp_millis: u64,
}

/// Fixed fan-out array of references to the next level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectBucket {
    references: Vec<Option<BucketKey>>,
}

impl IndirectBucket {
    /// An indirect bucket with `fan_out` empty slots
    pub fn new(fan_out: usize) -> Self {
        Self {
            references: vec![None; fan_out],
        }
    }

    /// Number of slots
    pub fn fan_out(&self) -> usize {
        self.references.len()
    }

    /// Reference held at `offset`
    pub fn get(&self, offset: usize) -> Option<BucketKey> {
        self.references.get(offset).copied().flatten()
    }

    /// Point `offset` at `key`
    pub fn set(&mut self, offset: usize, key: BucketKey) -> Result<(), SaplingBucketError> {
        let fan_out = self.references.len();
        let slot = self.references.get_mut(offset).ok_or_else(|| {
            SaplingBucketError::InvalidOperation(format!(
                "Offset {offset} outside fan-out {fan_out}"
            ))
        })?;
        *slot = Some(key);
        Ok(())
    }

    fn occupied(&self) -> impl Iterator<Item = (usize, BucketKey)> + '_ {
        self.references
            .iter()
            .enumerate()
            .filter_map(|(offset, key)| key.map(|key| (offset, key)))
    }
}

/// A page of node records for a contiguous key range.
#[derive(Clone, Debug, PartialEq)]
pub struct DataBucket<Node> {
    first_key: NodeKey,
    slots: Vec<Option<Node>>,
}

impl<Node> DataBucket<Node>
where
    Node: NodeRecord,
{
    /// An empty page starting at `first_key`
    pub fn new(first_key: NodeKey, slot_count: usize) -> Self {
        Self {
            first_key,
            slots: vec![None; slot_count],
        }
    }

    /// First key covered by this page
    pub fn first_key(&self) -> NodeKey {
        self.first_key
    }

    /// Record stored in `slot`
    pub fn get(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Store `node` in `slot`
    pub fn set(&mut self, slot: usize, node: Node) -> Result<(), SaplingBucketError> {
        if slot >= self.slots.len() {
            return Err(SaplingBucketError::InvalidOperation(format!(
                "Slot {slot} outside data bucket"
            )));
        }
        let expected = self.first_key.checked_add(slot as u64).ok_or_else(|| {
            SaplingBucketError::InvalidOperation(format!(
                "Slot {slot} overflows key space from {}",
                self.first_key
            ))
        })?;
        if node.key() != expected {
            return Err(SaplingBucketError::InvalidOperation(format!(
                "Node {} does not belong in slot for key {expected}",
                node.key()
            )));
        }
        self.slots[slot] = Some(node);
        Ok(())
    }

    /// Occupied slots in key order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().flatten()
    }
}

/// Application key/value metadata of a revision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaBucket {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MetaBucket {
    /// Value stored under `key`
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Store `value` under `key`, returning the previous value
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.insert(key, value)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tags of the bucket kinds, as written to storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BucketKind {
    /// [UberBucket]
    Uber = 0,
    /// [RevisionRootBucket]
    RevisionRoot = 1,
    /// [IndirectBucket]
    Indirect = 2,
    /// [DataBucket]
    Data = 3,
    /// [MetaBucket]
    Meta = 4,
}

impl TryFrom<u8> for BucketKind {
    type Error = SaplingBucketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => BucketKind::Uber,
            1 => BucketKind::RevisionRoot,
            2 => BucketKind::Indirect,
            3 => BucketKind::Data,
            4 => BucketKind::Meta,
            unknown => {
                return Err(SaplingBucketError::CorruptFormat(format!(
                    "Unknown bucket kind {unknown}"
                )));
            }
        })
    }
}

/// Any storable bucket.
#[derive(Clone, Debug, PartialEq)]
pub enum Bucket<Node> {
    /// See [UberBucket]
    Uber(UberBucket),
    /// See [RevisionRootBucket]
    RevisionRoot(RevisionRootBucket),
    /// See [IndirectBucket]
    Indirect(IndirectBucket),
    /// See [DataBucket]
    Data(DataBucket<Node>),
    /// See [MetaBucket]
    Meta(MetaBucket),
}

fn read_fan_out(reader: &Reader<'_>) -> Result<usize, SaplingBucketError> {
    let fan_out = reader.read_len()?;
    if fan_out > MAX_FAN_OUT {
        return Err(SaplingBucketError::CorruptFormat(format!(
            "Fan-out {fan_out} exceeds {MAX_FAN_OUT}"
        )));
    }
    Ok(fan_out)
}

fn unexpected(expected: BucketKind, found: BucketKind) -> SaplingBucketError {
    SaplingBucketError::CorruptFormat(format!("Expected {expected:?} bucket, found {found:?}"))
}

impl<Node> Bucket<Node>
where
    Node: NodeRecord,
{
    /// The kind of this bucket
    pub fn kind(&self) -> BucketKind {
        match self {
            Bucket::Uber(_) => BucketKind::Uber,
            Bucket::RevisionRoot(_) => BucketKind::RevisionRoot,
            Bucket::Indirect(_) => BucketKind::Indirect,
            Bucket::Data(_) => BucketKind::Data,
            Bucket::Meta(_) => BucketKind::Meta,
        }
    }

    /// This bucket as an [UberBucket]
    pub fn as_uber(&self) -> Result<&UberBucket, SaplingBucketError> {
        match self {
            Bucket::Uber(bucket) => Ok(bucket),
            other => Err(unexpected(BucketKind::Uber, other.kind())),
        }
    }

    /// This bucket as a [RevisionRootBucket]
    pub fn as_revision_root(&self) -> Result<&RevisionRootBucket, SaplingBucketError> {
        match self {
            Bucket::RevisionRoot(bucket) => Ok(bucket),
            other => Err(unexpected(BucketKind::RevisionRoot, other.kind())),
        }
    }

    /// This bucket as an [IndirectBucket]
    pub fn as_indirect(&self) -> Result<&IndirectBucket, SaplingBucketError> {
        match self {
            Bucket::Indirect(bucket) => Ok(bucket),
            other => Err(unexpected(BucketKind::Indirect, other.kind())),
        }
    }

    /// This bucket as a [DataBucket]
    pub fn as_data(&self) -> Result<&DataBucket<Node>, SaplingBucketError> {
        match self {
            Bucket::Data(bucket) => Ok(bucket),
            other => Err(unexpected(BucketKind::Data, other.kind())),
        }
    }

    /// This bucket as a [MetaBucket]
    pub fn as_meta(&self) -> Result<&MetaBucket, SaplingBucketError> {
        match self {
            Bucket::Meta(bucket) => Ok(bucket),
            other => Err(unexpected(BucketKind::Meta, other.kind())),
        }
    }

    /// Serialize this bucket, kind tag first
    pub fn encode(&self) -> Result<Vec<u8>, SaplingBucketError> {
        let mut writer = Writer::new();
        writer.write_u8(self.kind() as u8);

        match self {
            Bucket::Uber(uber) => {
                writer.write_u64(uber.revision_count);
                writer.write_link(uber.latest_root.map(|key| key.0))?;
                writer.write_link(uber.revision_tree.map(|key| key.0))?;
                writer.write_u64(uber.next_bucket_key);
            }
            Bucket::RevisionRoot(root) => {
                writer.write_u64(root.revision);
                writer.write_link(root.max_node_key)?;
                writer.write_link(root.node_tree.map(|key| key.0))?;
                writer.write_link(root.meta.map(|key| key.0))?;
                writer.write_u64(root.timestamp_millis);
            }
            Bucket::Indirect(indirect) => {
                // Sparse: only occupied slots are written.
                writer.write_len(indirect.fan_out())?;
                writer.write_len(indirect.occupied().count())?;
                for (offset, key) in indirect.occupied() {
                    writer.write_len(offset)?;
                    writer.write_u64(key.0);
                }
            }
            Bucket::Data(data) => {
                writer.write_u64(data.first_key);
                writer.write_len(data.slots.len())?;
                writer.write_len(data.nodes().count())?;
                for (slot, node) in data.slots.iter().enumerate() {
                    if let Some(node) = node {
                        writer.write_len(slot)?;
                        writer.write_u8(node.kind_tag());
                        writer.write_blob(&node.serialize()?)?;
                    }
                }
            }
            Bucket::Meta(meta) => {
                writer.write_len(meta.entries.len())?;
                for (key, value) in &meta.entries {
                    writer.write_blob(key)?;
                    writer.write_blob(value)?;
                }
            }
        }

        Ok(writer.into_inner())
    }

    /// Decode a bucket written by [Bucket::encode], rebuilding node records
    /// with `factory`
    pub fn decode<Factory>(bytes: &[u8], factory: &Factory) -> Result<Self, SaplingBucketError>
    where
        Factory: NodeFactory<Node = Node>,
    {
        let reader = Reader::new(bytes);
        let kind = BucketKind::try_from(reader.read_u8()?)?;

        let bucket = match kind {
            BucketKind::Uber => Bucket::Uber(UberBucket {
                revision_count: reader.read_u64()?,
                latest_root: reader.read_link()?.map(BucketKey),
                revision_tree: reader.read_link()?.map(BucketKey),
                next_bucket_key: reader.read_u64()?,
            }),
            BucketKind::RevisionRoot => Bucket::RevisionRoot(RevisionRootBucket {
                revision: reader.read_u64()?,
                max_node_key: reader.read_link()?,
                node_tree: reader.read_link()?.map(BucketKey),
                meta: reader.read_link()?.map(BucketKey),
                timestamp_millis: reader.read_u64()?,
            }),
            BucketKind::Indirect => {
                let mut indirect = IndirectBucket::new(read_fan_out(&reader)?);
                let count = reader.read_len()?;
                for _ in 0..count {
                    let offset = reader.read_len()?;
                    let key = BucketKey(reader.read_u64()?);
                    indirect.set(offset, key).map_err(|_| {
                        SaplingBucketError::CorruptFormat(format!(
                            "Indirect offset {offset} outside fan-out {}",
                            indirect.fan_out()
                        ))
                    })?;
                }
                Bucket::Indirect(indirect)
            }
            BucketKind::Data => {
                let first_key = reader.read_u64()?;
                let mut data = DataBucket::new(first_key, read_fan_out(&reader)?);
                let count = reader.read_len()?;
                for _ in 0..count {
                    let slot = reader.read_len()?;
                    let node_kind = reader.read_u8()?;
                    let node = factory.deserialize(node_kind, &reader.read_blob()?)?;
                    data.set(slot, node).map_err(|error| {
                        SaplingBucketError::CorruptFormat(format!("Misplaced record: {error}"))
                    })?;
                }
                Bucket::Data(data)
            }
            BucketKind::Meta => {
                let mut meta = MetaBucket::default();
                let count = reader.read_len()?;
                for _ in 0..count {
                    let key = reader.read_blob()?;
                    let value = reader.read_blob()?;
                    meta.insert(key, value);
                }
                Bucket::Meta(meta)
            }
        };

        reader.finish()?;
        Ok(bucket)
    }
}
