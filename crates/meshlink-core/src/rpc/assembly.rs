//! Chunked reply reassembly.
//!
//! A device splits a reply that exceeds the channel's per-message limit into
//! `chunk_len` fragments indexed `0..chunk_len`. Fragments may arrive in any
//! order; the body is the concatenation by index once every slot is filled.
//!
//! Slots are stored sparsely: memory follows the fragments received, never
//! the announced `chunk_len`.

use std::collections::BTreeMap;

use crate::error::AssemblyError;

/// Sparse slot table for one transaction.
#[derive(Debug, Clone)]
pub struct ChunkAssembly {
    transaction_id: u64,
    status: Option<u16>,
    method: Option<String>,
    total: usize,
    slots: BTreeMap<usize, String>,
}

impl ChunkAssembly {
    /// Create an assembly sized by the first fragment's `chunk_len`.
    ///
    /// # Errors
    ///
    /// - `AssemblyError::Empty` if `total` is zero
    pub fn new(
        transaction_id: u64,
        status: Option<u16>,
        method: Option<String>,
        total: usize,
    ) -> Result<Self, AssemblyError> {
        if total == 0 {
            return Err(AssemblyError::Empty { transaction_id });
        }

        Ok(Self { transaction_id, status, method, total, slots: BTreeMap::new() })
    }

    /// Store `chunk` at `index`. Returns `true` once every slot is filled.
    ///
    /// A repeated index overwrites the earlier fragment without counting
    /// twice.
    ///
    /// # Errors
    ///
    /// - `AssemblyError::LengthMismatch` if `total` disagrees with the
    ///   assembly size
    /// - `AssemblyError::IndexOutOfRange` if `index >= total`
    pub fn insert(&mut self, index: usize, total: usize, chunk: String) -> Result<bool, AssemblyError> {
        if total != self.total {
            return Err(AssemblyError::LengthMismatch { expected: self.total, actual: total });
        }
        if index >= total {
            return Err(AssemblyError::IndexOutOfRange { index, total });
        }

        self.slots.insert(index, chunk);
        Ok(self.is_complete())
    }

    /// Whether every slot is filled.
    pub fn is_complete(&self) -> bool {
        self.slots.len() == self.total
    }

    /// Number of filled slots.
    pub fn received(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Transaction this assembly belongs to.
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    /// Status carried by the first fragment.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Method carried by the first fragment.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Concatenate the filled slots in index order.
    ///
    /// Missing slots contribute nothing; callers check [`Self::is_complete`]
    /// first.
    pub fn into_body(self) -> String {
        self.slots.into_values().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn zero_chunks_is_rejected() {
        assert_eq!(
            ChunkAssembly::new(1, None, None, 0).unwrap_err(),
            AssemblyError::Empty { transaction_id: 1 }
        );
    }

    #[test]
    fn out_of_order_fragments_reassemble_by_index() {
        let mut assembly = ChunkAssembly::new(1, Some(200), None, 3).unwrap();

        assert!(!assembly.insert(2, 3, "c".to_string()).unwrap());
        assert!(!assembly.insert(0, 3, "a".to_string()).unwrap());
        assert!(assembly.insert(1, 3, "b".to_string()).unwrap());

        assert_eq!(assembly.into_body(), "abc");
    }

    #[test]
    fn duplicate_index_overwrites_without_double_count() {
        let mut assembly = ChunkAssembly::new(1, None, None, 2).unwrap();

        assert!(!assembly.insert(0, 2, "x".to_string()).unwrap());
        assert!(!assembly.insert(0, 2, "a".to_string()).unwrap());
        assert_eq!(assembly.received(), 1);

        assert!(assembly.insert(1, 2, "b".to_string()).unwrap());
        assert_eq!(assembly.into_body(), "ab");
    }

    #[test]
    fn bad_fragments_are_rejected() {
        let mut assembly = ChunkAssembly::new(1, None, None, 2).unwrap();

        assert_eq!(
            assembly.insert(2, 2, "x".to_string()),
            Err(AssemblyError::IndexOutOfRange { index: 2, total: 2 })
        );
        assert_eq!(
            assembly.insert(0, 3, "x".to_string()),
            Err(AssemblyError::LengthMismatch { expected: 2, actual: 3 })
        );
        assert_eq!(assembly.received(), 0);
    }

    #[test]
    fn announced_length_does_not_allocate_slots() {
        for total in [usize::MAX, 1_000_000_000] {
            let mut assembly = ChunkAssembly::new(1, Some(200), None, total).unwrap();

            assert!(!assembly.insert(0, total, "x".to_string()).unwrap());
            assert_eq!(assembly.received(), 1);
            assert_eq!(assembly.total(), total);
            assert!(!assembly.is_complete());
        }
    }

    fn chunks_and_order() -> impl Strategy<Value = (Vec<String>, Vec<usize>)> {
        prop::collection::vec("[a-z0-9]{0,8}", 1..12).prop_flat_map(|chunks| {
            let order = Just((0..chunks.len()).collect::<Vec<_>>()).prop_shuffle();
            (Just(chunks), order)
        })
    }

    proptest! {
        #[test]
        fn prop_any_permutation_reassembles_in_index_order((chunks, order) in chunks_and_order()) {
            let total = chunks.len();

            let mut assembly = ChunkAssembly::new(7, Some(200), None, total).unwrap();
            for (position, index) in order.iter().enumerate() {
                let complete = assembly.insert(*index, total, chunks[*index].clone()).unwrap();
                prop_assert_eq!(complete, position + 1 == total);
            }

            prop_assert_eq!(assembly.into_body(), chunks.concat());
        }
    }
}
