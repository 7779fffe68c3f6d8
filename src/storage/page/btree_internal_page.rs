use std::marker::PhantomData;

use crate::common::{PageId, INVALID_LSN, PAGE_SIZE};
use crate::index::Storable;
use crate::index::KeyComparator;

use super::btree_page::{
    read_page_id, read_u32, write_page_id, write_u32, BTreePageType, BTREE_PAGE_HEADER_SIZE,
    LSN_OFFSET, MAX_SIZE_OFFSET, PAGE_ID_OFFSET, PAGE_TYPE_OFFSET, PARENT_PAGE_ID_OFFSET,
    SIZE_OFFSET,
};

/// Internal node layout: the common header followed by `size` slots of
/// `(key, child page id)`. Slot 0's key is unused; the leftmost subtree has
/// no lower bound. `size` counts child pointers, so a node with `size`
/// children carries `size - 1` meaningful separator keys.
pub struct InternalPage<'a, K> {
    data: &'a mut [u8],
    _key: PhantomData<K>,
}

impl<'a, K: Storable> InternalPage<'a, K> {
    const SLOT_SIZE: usize = K::SIZE + PageId::SIZE;

    /// Number of child slots that fit in a page.
    pub fn capacity() -> usize {
        (PAGE_SIZE - BTREE_PAGE_HEADER_SIZE) / Self::SLOT_SIZE
    }

    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _key: PhantomData,
        }
    }

    pub fn init(&mut self, page_id: PageId, parent: Option<PageId>, max_size: usize) {
        debug_assert!(max_size <= Self::capacity());
        self.data.fill(0);
        write_u32(self.data, PAGE_TYPE_OFFSET, BTreePageType::Internal.as_u32());
        write_u32(self.data, LSN_OFFSET, INVALID_LSN);
        write_u32(self.data, SIZE_OFFSET, 0);
        write_u32(self.data, MAX_SIZE_OFFSET, max_size as u32);
        write_page_id(self.data, PARENT_PAGE_ID_OFFSET, parent);
        write_u32(self.data, PAGE_ID_OFFSET, page_id.as_u32());
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(read_u32(self.data, PAGE_ID_OFFSET))
    }

    pub fn parent_page_id(&self) -> Option<PageId> {
        read_page_id(self.data, PARENT_PAGE_ID_OFFSET)
    }

    pub fn set_parent_page_id(&mut self, parent: Option<PageId>) {
        write_page_id(self.data, PARENT_PAGE_ID_OFFSET, parent);
    }

    pub fn size(&self) -> usize {
        read_u32(self.data, SIZE_OFFSET) as usize
    }

    fn set_size(&mut self, size: usize) {
        write_u32(self.data, SIZE_OFFSET, size as u32);
    }

    pub fn max_size(&self) -> usize {
        read_u32(self.data, MAX_SIZE_OFFSET) as usize
    }

    /// Minimum child count of a non-root internal node.
    pub fn min_size(&self) -> usize {
        (self.max_size() + 1) / 2
    }

    fn slot(&self, index: usize) -> usize {
        BTREE_PAGE_HEADER_SIZE + index * Self::SLOT_SIZE
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        K::read_from(&self.data[self.slot(index)..])
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        let offset = self.slot(index);
        key.write_to(&mut self.data[offset..]);
    }

    pub fn value_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        PageId::read_from(&self.data[self.slot(index) + K::SIZE..])
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        let offset = self.slot(index) + K::SIZE;
        child.write_to(&mut self.data[offset..]);
    }

    /// Index of the slot holding the given child pointer, by linear scan.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// The child whose subtree may contain `key`: binary search over the
    /// separator keys in slots `[1, size)`.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> PageId {
        let mut lo = 1;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp.compare(&self.key_at(mid), key) == std::cmp::Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        self.value_at(lo - 1)
    }

    /// Fills an empty page with the two children of a fresh root.
    pub fn populate_new_root(&mut self, old_child: PageId, key: &K, new_child: PageId) {
        debug_assert_eq!(self.size(), 0);
        self.set_size(2);
        self.set_value_at(0, old_child);
        self.set_key_at(1, key);
        self.set_value_at(1, new_child);
    }

    /// Inserts `(key, new_child)` immediately after the slot holding
    /// `old_child`, shifting later slots right. Returns the new size.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &K, new_child: PageId) -> usize {
        let after = self
            .value_index(old_child)
            .expect("old child must be present")
            + 1;
        let size = self.size();
        let start = self.slot(after);
        let end = self.slot(size);
        self.data.copy_within(start..end, start + Self::SLOT_SIZE);
        self.set_size(size + 1);
        self.set_key_at(after, key);
        self.set_value_at(after, new_child);
        size + 1
    }

    /// Removes the slot at `index`, shifting later slots left.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        let start = self.slot(index + 1);
        let end = self.slot(size);
        let dest = self.slot(index);
        self.data.copy_within(start..end, dest);
        self.set_size(size - 1);
    }

    /// Reads out all slots; the key of entry 0 is the unused slot-0 key.
    pub fn entries(&self) -> Vec<(K, PageId)> {
        (0..self.size())
            .map(|i| (self.key_at(i), self.value_at(i)))
            .collect()
    }

    /// Rewrites the page's slots wholesale, discarding what was there.
    pub fn replace_with(&mut self, entries: &[(K, PageId)]) {
        self.set_size(0);
        self.copy_n_from(entries);
    }

    /// Appends the given slots at the current end.
    pub fn copy_n_from(&mut self, entries: &[(K, PageId)]) {
        let base = self.size();
        debug_assert!(base + entries.len() <= Self::capacity());
        self.set_size(base + entries.len());
        for (i, (key, child)) in entries.iter().enumerate() {
            self.set_key_at(base + i, key);
            self.set_value_at(base + i, *child);
        }
    }

    /// Moves every slot into `recipient`, carrying the parent's separator
    /// down as the first meaningful key. Returns the moved child ids so the
    /// caller can reparent them.
    pub fn move_all_to(&mut self, recipient: &mut InternalPage<'_, K>, middle_key: &K) -> Vec<PageId> {
        let mut entries = self.entries();
        if let Some(first) = entries.first_mut() {
            first.0 = *middle_key;
        }
        let moved = entries.iter().map(|&(_, child)| child).collect();
        recipient.copy_n_from(&entries);
        self.set_size(0);
        moved
    }

    /// Moves the first slot to the end of `recipient`; the parent's
    /// separator comes down as the moved slot's key. Returns the moved
    /// child id.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut InternalPage<'_, K>,
        middle_key: &K,
    ) -> PageId {
        let child = self.value_at(0);
        recipient.copy_n_from(&[(*middle_key, child)]);
        self.remove(0);
        child
    }

    /// Moves the last slot to the front of `recipient`; the parent's
    /// separator becomes the key of the slot it displaces. Returns the
    /// moved child id.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut InternalPage<'_, K>,
        middle_key: &K,
    ) -> PageId {
        let size = self.size();
        let child = self.value_at(size - 1);
        let key = self.key_at(size - 1);

        let rec_size = recipient.size();
        let start = recipient.slot(0);
        let end = recipient.slot(rec_size);
        recipient
            .data
            .copy_within(start..end, start + Self::SLOT_SIZE);
        recipient.set_size(rec_size + 1);
        recipient.set_key_at(0, &key);
        recipient.set_value_at(0, child);
        recipient.set_key_at(1, middle_key);

        self.set_size(size - 1);
        child
    }
}

/// Read-only view of an internal node.
pub struct InternalPageRef<'a, K> {
    data: &'a [u8],
    _key: PhantomData<K>,
}

impl<'a, K: Storable> InternalPageRef<'a, K> {
    const SLOT_SIZE: usize = K::SIZE + PageId::SIZE;

    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            _key: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        read_u32(self.data, SIZE_OFFSET) as usize
    }

    pub fn max_size(&self) -> usize {
        read_u32(self.data, MAX_SIZE_OFFSET) as usize
    }

    pub fn key_at(&self, index: usize) -> K {
        K::read_from(&self.data[BTREE_PAGE_HEADER_SIZE + index * Self::SLOT_SIZE..])
    }

    pub fn value_at(&self, index: usize) -> PageId {
        PageId::read_from(&self.data[BTREE_PAGE_HEADER_SIZE + index * Self::SLOT_SIZE + K::SIZE..])
    }

    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> PageId {
        let mut lo = 1;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp.compare(&self.key_at(mid), key) == std::cmp::Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        self.value_at(lo - 1)
    }

    /// Child holding the smallest keys, for leftmost descents.
    pub fn leftmost_child(&self) -> PageId {
        self.value_at(0)
    }
}
