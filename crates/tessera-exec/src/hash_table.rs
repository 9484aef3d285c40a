use ahash::AHashMap;
use smallvec::SmallVec;

/// Physical location of a row: its global offset within the source table and its block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RowLocation {
    pub row_offset: usize,
    pub block_id: usize,
}

type Locations = SmallVec<[RowLocation; 1]>;

/// Join-key to row-location index built by the fused select + hash-build operator.
///
/// Keys are the raw bits of an integer join column widened to `u64`. Duplicate keys keep every
/// location, in table order.
#[derive(Clone, Debug, Default)]
pub struct JoinHashTable {
    map: AHashMap<u64, Locations>,
    entries: usize,
}

impl JoinHashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: AHashMap::with_capacity(capacity),
            entries: 0,
        }
    }

    pub fn insert(&mut self, key: u64, location: RowLocation) {
        self.map.entry(key).or_default().push(location);
        self.entries += 1;
    }

    /// Every location stored under `key`, in table order. Empty when the key is absent.
    pub fn probe(&self, key: u64) -> &[RowLocation] {
        self.map.get(&key).map(|l| l.as_slice()).unwrap_or(&[])
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.map.contains_key(&key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of stored locations (rows), counting duplicates.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &[RowLocation])> + '_ {
        self.map.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Move every entry of `shard` into `self`. Locations of `shard` land after existing ones,
    /// so merging shards in block order keeps table order per key.
    pub fn merge(&mut self, shard: JoinHashTable) {
        self.entries += shard.entries;
        for (key, locations) in shard.map {
            self.map.entry(key).or_default().extend(locations);
        }
    }
}
