//! Contract state and overlay abstractions.
//!
//! The [`State`] trait defines the interface for key-value storage, while
//! [`OverlayState`] buffers writes that are merged into the layer below only
//! when execution succeeds.

use crate::types::hash::Hash;
use std::collections::BTreeMap;

/// Pending writes: `Some(value)` for insertions, `None` for deletions.
pub type Writes = Vec<(Hash, Option<Vec<u8>>)>;

/// Key-value storage interface for contract execution.
///
/// Keys are hashes of the contract-level key bytes, see [`state_key`].
pub trait State {
    /// Retrieves a value by key, returning `None` if the key does not exist.
    fn get(&self, key: Hash) -> Option<Vec<u8>>;
    /// Stores a key-value pair, overwriting any existing value.
    fn push(&mut self, key: Hash, value: Vec<u8>);
    /// Removes a key from storage.
    fn delete(&mut self, key: Hash);

    /// Replays `writes` in order.
    fn apply(&mut self, writes: Writes) {
        for (key, value) in writes {
            match value {
                Some(value) => self.push(key, value),
                None => self.delete(key),
            }
        }
    }
}

/// Maps a contract key to its slot in the state.
pub fn state_key(key: &[u8]) -> Hash {
    let mut h = Hash::sha3();
    h.update(b"STATE");
    h.update(key);
    h.finalize()
}

/// Contract state of the whole chain, held in memory.
#[derive(Debug, Default)]
pub struct MemoryState {
    data: BTreeMap<Hash, Vec<u8>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl State for MemoryState {
    fn get(&self, key: Hash) -> Option<Vec<u8>> {
        self.data.get(&key).cloned()
    }

    fn push(&mut self, key: Hash, value: Vec<u8>) {
        self.data.insert(key, value);
    }

    fn delete(&mut self, key: Hash) {
        self.data.remove(&key);
    }
}

/// Write-buffering overlay on top of a base state.
///
/// Reads fall through to the base for keys not yet written. Overlays nest:
/// a transaction overlay sits on a block overlay, which sits on the chain
/// state.
pub struct OverlayState<'a> {
    base: &'a dyn State,
    writes: BTreeMap<Hash, Option<Vec<u8>>>,
}

impl<'a> OverlayState<'a> {
    /// Creates a new overlay backed by the given base storage.
    pub fn new(base: &'a dyn State) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Consumes the overlay and returns the pending writes in key order.
    pub fn into_writes(self) -> Writes {
        self.writes.into_iter().collect()
    }
}

impl State for OverlayState<'_> {
    fn get(&self, key: Hash) -> Option<Vec<u8>> {
        match self.writes.get(&key) {
            Some(value) => value.clone(),
            None => self.base.get(key),
        }
    }

    fn push(&mut self, key: Hash, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Hash) {
        self.writes.insert(key, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_data(data: &[(&[u8], &[u8])]) -> MemoryState {
        let mut state = MemoryState::new();
        for (key, value) in data {
            state.push(state_key(key), value.to_vec());
        }
        state
    }

    #[test]
    fn overlay_reads_through_to_base() {
        let base = with_data(&[(b"key", b"value")]);
        let overlay = OverlayState::new(&base);
        assert_eq!(overlay.get(state_key(b"key")), Some(b"value".to_vec()));
        assert_eq!(overlay.get(state_key(b"missing")), None);
    }

    #[test]
    fn overlay_write_shadows_base() {
        let base = with_data(&[(b"key", b"old")]);
        let mut overlay = OverlayState::new(&base);
        overlay.push(state_key(b"key"), b"new".to_vec());
        assert_eq!(overlay.get(state_key(b"key")), Some(b"new".to_vec()));
        assert_eq!(base.get(state_key(b"key")), Some(b"old".to_vec()));
    }

    #[test]
    fn overlay_delete_hides_base_value() {
        let base = with_data(&[(b"key", b"value")]);
        let mut overlay = OverlayState::new(&base);
        overlay.delete(state_key(b"key"));
        assert_eq!(overlay.get(state_key(b"key")), None);
    }

    #[test]
    fn nested_overlays_merge_upwards() {
        let mut base = with_data(&[(b"a", b"1"), (b"gone", b"x")]);
        let block_writes = {
            let mut block = OverlayState::new(&base);
            let tx_writes = {
                let mut tx = OverlayState::new(&block);
                tx.push(state_key(b"b"), b"2".to_vec());
                tx.delete(state_key(b"gone"));
                tx.into_writes()
            };
            block.apply(tx_writes);
            assert_eq!(block.get(state_key(b"b")), Some(b"2".to_vec()));
            block.into_writes()
        };

        base.apply(block_writes);
        assert_eq!(base.get(state_key(b"a")), Some(b"1".to_vec()));
        assert_eq!(base.get(state_key(b"b")), Some(b"2".to_vec()));
        assert_eq!(base.get(state_key(b"gone")), None);
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn dropped_overlay_leaves_base_untouched() {
        let base = with_data(&[(b"a", b"1")]);
        {
            let mut overlay = OverlayState::new(&base);
            overlay.push(state_key(b"a"), b"2".to_vec());
        }
        assert_eq!(base.get(state_key(b"a")), Some(b"1".to_vec()));
    }

    #[test]
    fn keys_are_namespaced() {
        let mut raw = Hash::sha3();
        raw.update(b"key");
        assert_ne!(state_key(b"key"), raw.finalize());
    }
}
