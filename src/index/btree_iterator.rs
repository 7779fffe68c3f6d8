use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::Result;
use crate::storage::page::LeafPageRef;

use super::key::Storable;

/// Forward cursor over the leaf chain. Holds the current leaf pinned under
/// a read latch; stepping past the last slot of a leaf latches the next
/// leaf before releasing the current one.
pub struct BPlusTreeIterator<K, V> {
    bpm: Arc<BufferPoolManager>,
    guard: Option<ReadPageGuard>,
    index: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K: Storable, V: Storable> BPlusTreeIterator<K, V> {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, guard: ReadPageGuard, index: usize) -> Self {
        Self {
            bpm,
            guard: Some(guard),
            index,
            _marker: PhantomData,
        }
    }

    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            guard: None,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// Yields the next pair in key order, or None past the rightmost leaf.
    pub fn next(&mut self) -> Result<Option<(K, V)>> {
        loop {
            let next_page_id = {
                let Some(guard) = self.guard.as_ref() else {
                    return Ok(None);
                };
                let leaf = LeafPageRef::<K, V>::new(guard.data());
                if self.index < leaf.size() {
                    let item = (leaf.key_at(self.index), leaf.value_at(self.index));
                    self.index += 1;
                    return Ok(Some(item));
                }
                leaf.next_page_id()
            };

            match next_page_id {
                None => {
                    self.guard = None;
                    return Ok(None);
                }
                Some(next) => {
                    // Latch the successor before the assignment releases
                    // the current leaf.
                    let next_guard = self.bpm.read_page(next)?;
                    self.guard = Some(next_guard);
                    self.index = 0;
                }
            }
        }
    }
}

impl<K: Storable, V: Storable> Iterator for BPlusTreeIterator<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match BPlusTreeIterator::next(self) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
