use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{PageId, Result, StrataError, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::page::{
    BTreePageRef, HeaderPage, HeaderPageRef, InternalPage, InternalPageRef, LeafPage, LeafPageRef,
};

use super::btree_iterator::BPlusTreeIterator;
use super::key::{KeyComparator, Storable};

/// Thread-safe B+ tree index over buffer-pool pages.
///
/// Every node is a page; the root's identity is persisted in the header
/// page under the index name and cached behind the root latch. Mutating
/// descents crab write latches from the root down, releasing all held
/// ancestors as soon as the just-latched child is safe (cannot split for
/// inserts, cannot merge for deletes). The root latch itself is the
/// sentinel: it is retained exactly as long as the operation might still
/// change which page is the root.
pub struct BPlusTree<K, V, C> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    /// Cached root page id; INVALID_PAGE_ID when the tree is empty.
    /// The lock doubles as the root-identifier latch.
    root_page_id: RwLock<PageId>,
    _marker: std::marker::PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: Storable,
    V: Storable,
    C: KeyComparator<K>,
{
    /// Opens (or registers) the index named `index_name`, reading the
    /// persisted root from the header page. Node capacities are explicit
    /// so tests can force small fan-outs.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2 && leaf_max_size <= LeafPage::<K, V>::capacity());
        assert!(internal_max_size >= 3 && internal_max_size <= InternalPage::<K>::capacity());

        let index_name = index_name.into();
        let root = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data()).get_root_id(&index_name)
        };
        let root = match root {
            Some(root) => root,
            None => {
                let mut guard = bpm.write_page(HEADER_PAGE_ID)?;
                // Re-check under the write latch in case a concurrent open
                // of the same name won the race.
                match HeaderPageRef::new(guard.data()).get_root_id(&index_name) {
                    Some(root) => root,
                    None => {
                        let mut header = HeaderPage::new(guard.data_mut());
                        if !header.insert_record(&index_name, INVALID_PAGE_ID) {
                            return Err(StrataError::HeaderPageFull);
                        }
                        INVALID_PAGE_ID
                    }
                }
            }
        };

        Ok(Self {
            index_name,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: RwLock::new(root),
            _marker: std::marker::PhantomData,
        })
    }

    /// Opens the index with capacities derived from the page size.
    pub fn with_default_sizes(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
    ) -> Result<Self> {
        let leaf = LeafPage::<K, V>::capacity();
        let internal = InternalPage::<K>::capacity();
        Self::new(index_name, bpm, comparator, leaf, internal)
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup, crabbing read latches from the root to the leaf.
    pub fn get_value(&self, key: &K) -> Result<Option<V>> {
        let root_latch = self.root_page_id.read();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.bpm.read_page(*root_latch)?;
        drop(root_latch);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(LeafPageRef::<K, V>::new(guard.data()).lookup(key, &self.comparator));
            }
            let child = InternalPageRef::<K>::new(guard.data()).lookup(key, &self.comparator);
            // Latch the child before the assignment drops the parent guard.
            let child_guard = self.bpm.read_page(child)?;
            guard = child_guard;
        }
    }

    /// Inserts a key/value pair. Returns false (and changes nothing) when
    /// the key already exists.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        let mut root_latch = self.root_page_id.write();

        if *root_latch == INVALID_PAGE_ID {
            let mut guard = self.bpm.new_page_write()?;
            let pid = guard.page_id();
            {
                let mut leaf = LeafPage::<K, V>::new(guard.data_mut());
                leaf.init(pid, None, self.leaf_max_size);
                leaf.insert(key, value, &self.comparator);
            }
            drop(guard);
            *root_latch = pid;
            self.persist_root(pid)?;
            debug!(index = %self.index_name, root = %pid, "started new tree");
            return Ok(true);
        }

        let mut current = *root_latch;
        let mut sentinel = Some(root_latch);
        let mut ancestors: Vec<WritePageGuard> = Vec::new();

        let mut leaf_guard = loop {
            let guard = self.bpm.write_page(current)?;
            let hdr = BTreePageRef::new(guard.data());
            let is_leaf = hdr.is_leaf();
            let safe = if is_leaf {
                hdr.size() < self.leaf_max_size - 1
            } else {
                hdr.size() < self.internal_max_size
            };
            if safe {
                sentinel = None;
                ancestors.clear();
            }
            if is_leaf {
                break guard;
            }
            let child = InternalPageRef::<K>::new(guard.data()).lookup(key, &self.comparator);
            ancestors.push(guard);
            current = child;
        };

        {
            let view = LeafPageRef::<K, V>::new(leaf_guard.data());
            if view.lookup(key, &self.comparator).is_some() {
                return Ok(false);
            }
        }

        let new_size = {
            let mut leaf = LeafPage::<K, V>::new(leaf_guard.data_mut());
            leaf.insert(key, value, &self.comparator)
                .expect("duplicate was ruled out under the leaf latch")
        };
        if new_size < self.leaf_max_size {
            return Ok(true);
        }

        // Leaf overflow: split off the upper half and splice the chain.
        let mut right_guard = self.bpm.new_page_write()?;
        let right_pid = right_guard.page_id();
        let separator = {
            let mut leaf = LeafPage::<K, V>::new(leaf_guard.data_mut());
            let mut right = LeafPage::<K, V>::new(right_guard.data_mut());
            right.init(right_pid, leaf.parent_page_id(), self.leaf_max_size);
            leaf.move_half_to(&mut right);
            right.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(Some(right_pid));
            right.key_at(0)
        };

        self.insert_into_parent(&mut sentinel, &mut ancestors, leaf_guard, separator, right_guard)?;
        Ok(true)
    }

    /// Propagates a split upward: `left_guard` was split, `right_guard` is
    /// its fresh sibling, and `separator` is the smallest key under the
    /// sibling. Retained ancestors are consumed from the back.
    fn insert_into_parent(
        &self,
        sentinel: &mut Option<parking_lot::RwLockWriteGuard<'_, PageId>>,
        ancestors: &mut Vec<WritePageGuard>,
        mut left_guard: WritePageGuard,
        mut separator: K,
        mut right_guard: WritePageGuard,
    ) -> Result<()> {
        loop {
            let left_pid = left_guard.page_id();
            let right_pid = right_guard.page_id();

            let Some(mut parent_guard) = ancestors.pop() else {
                // The split node was the root: grow the tree by one level.
                let mut root_guard = self.bpm.new_page_write()?;
                let new_root_pid = root_guard.page_id();
                {
                    let mut root = InternalPage::<K>::new(root_guard.data_mut());
                    root.init(new_root_pid, None, self.internal_max_size);
                    root.populate_new_root(left_pid, &separator, right_pid);
                }
                self.set_parent(&mut left_guard, Some(new_root_pid));
                self.set_parent(&mut right_guard, Some(new_root_pid));

                let latch = sentinel
                    .as_mut()
                    .expect("a root split retains the root latch");
                **latch = new_root_pid;
                self.persist_root(new_root_pid)?;
                debug!(index = %self.index_name, root = %new_root_pid, "root split");
                return Ok(());
            };

            let parent_pid = parent_guard.page_id();
            let parent_size = BTreePageRef::new(parent_guard.data()).size();

            if parent_size < self.internal_max_size {
                {
                    let mut parent = InternalPage::<K>::new(parent_guard.data_mut());
                    parent.insert_node_after(left_pid, &separator, right_pid);
                }
                self.set_parent(&mut right_guard, Some(parent_pid));
                return Ok(());
            }

            // Full parent: copy its slots plus the new one into scratch,
            // split the scratch, and write both halves back.
            let mut entries = {
                let parent = InternalPage::<K>::new(parent_guard.data_mut());
                parent.entries()
            };
            let position = entries
                .iter()
                .position(|&(_, child)| child == left_pid)
                .expect("split child is referenced by its parent")
                + 1;
            entries.insert(position, (separator, right_pid));

            let keep = (entries.len() + 1) / 2;
            let riser = entries[keep].0;
            let parent_parent = BTreePageRef::new(parent_guard.data()).parent_page_id();

            let mut new_guard = self.bpm.new_page_write()?;
            let new_pid = new_guard.page_id();
            {
                let mut parent = InternalPage::<K>::new(parent_guard.data_mut());
                parent.replace_with(&entries[..keep]);
            }
            {
                let mut sibling = InternalPage::<K>::new(new_guard.data_mut());
                sibling.init(new_pid, parent_parent, self.internal_max_size);
                sibling.copy_n_from(&entries[keep..]);
            }

            // Children that moved under the new sibling get reparented; the
            // two whose latches we already hold are updated through their
            // guards.
            for &(_, child) in &entries[keep..] {
                if child == left_pid {
                    self.set_parent(&mut left_guard, Some(new_pid));
                } else if child == right_pid {
                    self.set_parent(&mut right_guard, Some(new_pid));
                } else {
                    let mut child_guard = self.bpm.write_page(child)?;
                    self.set_parent(&mut child_guard, Some(new_pid));
                }
            }
            if entries[..keep].iter().any(|&(_, child)| child == right_pid) {
                self.set_parent(&mut right_guard, Some(parent_pid));
            }

            drop(left_guard);
            drop(right_guard);
            left_guard = parent_guard;
            right_guard = new_guard;
            separator = riser;
        }
    }

    /// Removes a key if present. Under-full nodes redistribute from or
    /// coalesce with a sibling; emptied pages are deleted after all
    /// latches are released.
    pub fn remove(&self, key: &K) -> Result<()> {
        let mut deleted: Vec<PageId> = Vec::new();

        {
            let root_latch = self.root_page_id.write();
            if *root_latch == INVALID_PAGE_ID {
                return Ok(());
            }

            let mut current = *root_latch;
            let mut sentinel = Some(root_latch);
            let mut ancestors: Vec<WritePageGuard> = Vec::new();

            let mut leaf_guard = loop {
                let guard = self.bpm.write_page(current)?;
                let hdr = BTreePageRef::new(guard.data());
                let is_leaf = hdr.is_leaf();
                let is_root = hdr.parent_page_id().is_none();
                let safe = if is_root {
                    if is_leaf {
                        hdr.size() > 1
                    } else {
                        hdr.size() > 2
                    }
                } else if is_leaf {
                    hdr.size() > self.leaf_min_size()
                } else {
                    hdr.size() > self.internal_min_size()
                };
                if safe {
                    sentinel = None;
                    ancestors.clear();
                }
                if is_leaf {
                    break guard;
                }
                let child = InternalPageRef::<K>::new(guard.data()).lookup(key, &self.comparator);
                ancestors.push(guard);
                current = child;
            };

            {
                let view = LeafPageRef::<K, V>::new(leaf_guard.data());
                if view.lookup(key, &self.comparator).is_none() {
                    return Ok(());
                }
            }
            {
                let mut leaf = LeafPage::<K, V>::new(leaf_guard.data_mut());
                leaf.remove_and_delete_record(key, &self.comparator);
            }

            self.coalesce_or_redistribute(&mut sentinel, &mut ancestors, leaf_guard, &mut deleted)?;
        }

        for pid in deleted {
            self.bpm.delete_page(pid)?;
        }
        Ok(())
    }

    /// Restores size invariants from `node_guard` upward. Expects the
    /// retained ancestor chain in `ancestors` (nearest parent last).
    fn coalesce_or_redistribute(
        &self,
        sentinel: &mut Option<parking_lot::RwLockWriteGuard<'_, PageId>>,
        ancestors: &mut Vec<WritePageGuard>,
        mut node_guard: WritePageGuard,
        deleted: &mut Vec<PageId>,
    ) -> Result<()> {
        loop {
            let node_pid = node_guard.page_id();
            let (node_is_leaf, node_is_root, node_size) = {
                let hdr = BTreePageRef::new(node_guard.data());
                (hdr.is_leaf(), hdr.parent_page_id().is_none(), hdr.size())
            };

            if node_is_root {
                if !node_is_leaf && node_size == 1 {
                    // Internal root with a single child: promote the child.
                    let child_pid = InternalPageRef::<K>::new(node_guard.data()).value_at(0);
                    drop(node_guard);
                    {
                        let mut child_guard = self.bpm.write_page(child_pid)?;
                        self.set_parent(&mut child_guard, None);
                    }
                    let latch = sentinel
                        .as_mut()
                        .expect("a root change retains the root latch");
                    **latch = child_pid;
                    self.persist_root(child_pid)?;
                    deleted.push(node_pid);
                    debug!(index = %self.index_name, root = %child_pid, "collapsed root");
                } else if node_is_leaf && node_size == 0 {
                    drop(node_guard);
                    let latch = sentinel
                        .as_mut()
                        .expect("a root change retains the root latch");
                    **latch = INVALID_PAGE_ID;
                    self.persist_root(INVALID_PAGE_ID)?;
                    deleted.push(node_pid);
                    debug!(index = %self.index_name, "tree emptied");
                }
                return Ok(());
            }

            let min_size = if node_is_leaf {
                self.leaf_min_size()
            } else {
                self.internal_min_size()
            };
            if node_size >= min_size {
                return Ok(());
            }

            let mut parent_guard = ancestors
                .pop()
                .expect("an under-full node keeps its parent latched");
            let index = InternalPageRef::<K>::new(parent_guard.data())
                .value_index(node_pid)
                .expect("node is referenced by its parent");

            // Prefer the left sibling; only the leftmost child borrows
            // from the right.
            let (sibling_index, sibling_is_left) = if index > 0 {
                (index - 1, true)
            } else {
                (index + 1, false)
            };
            let sibling_pid =
                InternalPageRef::<K>::new(parent_guard.data()).value_at(sibling_index);
            let mut sibling_guard = self.bpm.write_page(sibling_pid)?;
            let sibling_size = BTreePageRef::new(sibling_guard.data()).size();

            if sibling_size > min_size {
                self.redistribute(
                    &mut parent_guard,
                    &mut node_guard,
                    &mut sibling_guard,
                    index,
                    sibling_is_left,
                    node_is_leaf,
                )?;
                return Ok(());
            }

            // Merge the right-hand page of the pair into the left-hand one
            // and drop the separator from the parent.
            if sibling_is_left {
                self.merge(&mut parent_guard, &mut sibling_guard, &mut node_guard, index)?;
                deleted.push(node_pid);
            } else {
                self.merge(
                    &mut parent_guard,
                    &mut node_guard,
                    &mut sibling_guard,
                    index + 1,
                )?;
                deleted.push(sibling_pid);
            }
            drop(node_guard);
            drop(sibling_guard);
            node_guard = parent_guard;
        }
    }

    /// Moves one boundary entry from `sibling` into `node`, fixing the
    /// parent separator. `index` is the node's slot in the parent.
    fn redistribute(
        &self,
        parent_guard: &mut WritePageGuard,
        node_guard: &mut WritePageGuard,
        sibling_guard: &mut WritePageGuard,
        index: usize,
        sibling_is_left: bool,
        is_leaf: bool,
    ) -> Result<()> {
        let node_pid = node_guard.page_id();

        if is_leaf {
            let new_separator;
            let separator_slot;
            {
                let mut node = LeafPage::<K, V>::new(node_guard.data_mut());
                let mut sibling = LeafPage::<K, V>::new(sibling_guard.data_mut());
                if sibling_is_left {
                    sibling.move_last_to_front_of(&mut node);
                    new_separator = node.key_at(0);
                    separator_slot = index;
                } else {
                    sibling.move_first_to_end_of(&mut node);
                    new_separator = sibling.key_at(0);
                    separator_slot = index + 1;
                }
            }
            let mut parent = InternalPage::<K>::new(parent_guard.data_mut());
            parent.set_key_at(separator_slot, &new_separator);
            Ok(())
        } else {
            let moved_child;
            let new_separator;
            let separator_slot;
            if sibling_is_left {
                let middle = InternalPageRef::<K>::new(parent_guard.data()).key_at(index);
                {
                    let mut node = InternalPage::<K>::new(node_guard.data_mut());
                    let mut sibling = InternalPage::<K>::new(sibling_guard.data_mut());
                    moved_child = sibling.move_last_to_front_of(&mut node, &middle);
                }
                // The donor's former last key landed in the node's slot 0.
                new_separator = InternalPageRef::<K>::new(node_guard.data()).key_at(0);
                separator_slot = index;
            } else {
                let middle = InternalPageRef::<K>::new(parent_guard.data()).key_at(index + 1);
                {
                    let mut node = InternalPage::<K>::new(node_guard.data_mut());
                    let mut sibling = InternalPage::<K>::new(sibling_guard.data_mut());
                    moved_child = sibling.move_first_to_end_of(&mut node, &middle);
                }
                new_separator = InternalPageRef::<K>::new(sibling_guard.data()).key_at(0);
                separator_slot = index + 1;
            }
            {
                let mut parent = InternalPage::<K>::new(parent_guard.data_mut());
                parent.set_key_at(separator_slot, &new_separator);
            }
            let mut child_guard = self.bpm.write_page(moved_child)?;
            self.set_parent(&mut child_guard, Some(node_pid));
            Ok(())
        }
    }

    /// Merges `right_guard`'s page into `left_guard`'s and removes the
    /// separator at `separator_index` from the parent.
    fn merge(
        &self,
        parent_guard: &mut WritePageGuard,
        left_guard: &mut WritePageGuard,
        right_guard: &mut WritePageGuard,
        separator_index: usize,
    ) -> Result<()> {
        let left_pid = left_guard.page_id();
        let is_leaf = BTreePageRef::new(left_guard.data()).is_leaf();

        if is_leaf {
            let mut right = LeafPage::<K, V>::new(right_guard.data_mut());
            let mut left = LeafPage::<K, V>::new(left_guard.data_mut());
            right.move_all_to(&mut left);
        } else {
            let middle = InternalPageRef::<K>::new(parent_guard.data()).key_at(separator_index);
            let moved = {
                let mut right = InternalPage::<K>::new(right_guard.data_mut());
                let mut left = InternalPage::<K>::new(left_guard.data_mut());
                right.move_all_to(&mut left, &middle)
            };
            for child in moved {
                let mut child_guard = self.bpm.write_page(child)?;
                self.set_parent(&mut child_guard, Some(left_pid));
            }
        }

        let mut parent = InternalPage::<K>::new(parent_guard.data_mut());
        parent.remove(separator_index);
        Ok(())
    }

    /// Iterator positioned at the smallest key.
    pub fn iter(&self) -> Result<BPlusTreeIterator<K, V>> {
        let root_latch = self.root_page_id.read();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(BPlusTreeIterator::empty(Arc::clone(&self.bpm)));
        }
        let mut guard = self.bpm.read_page(*root_latch)?;
        drop(root_latch);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(BPlusTreeIterator::new(Arc::clone(&self.bpm), guard, 0));
            }
            let child = InternalPageRef::<K>::new(guard.data()).leftmost_child();
            let child_guard = self.bpm.read_page(child)?;
            guard = child_guard;
        }
    }

    /// Iterator positioned at the first key `>=` the given key.
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIterator<K, V>> {
        let root_latch = self.root_page_id.read();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(BPlusTreeIterator::empty(Arc::clone(&self.bpm)));
        }
        let mut guard = self.bpm.read_page(*root_latch)?;
        drop(root_latch);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let index = LeafPageRef::<K, V>::new(guard.data()).key_index(key, &self.comparator);
                return Ok(BPlusTreeIterator::new(Arc::clone(&self.bpm), guard, index));
            }
            let child = InternalPageRef::<K>::new(guard.data()).lookup(key, &self.comparator);
            let child_guard = self.bpm.read_page(child)?;
            guard = child_guard;
        }
    }

    fn leaf_min_size(&self) -> usize {
        self.leaf_max_size / 2
    }

    fn internal_min_size(&self) -> usize {
        (self.internal_max_size + 1) / 2
    }

    /// Writes the parent pointer of whichever node kind the guard holds.
    fn set_parent(&self, guard: &mut WritePageGuard, parent: Option<PageId>) {
        if BTreePageRef::new(guard.data()).is_leaf() {
            LeafPage::<K, V>::new(guard.data_mut()).set_parent_page_id(parent);
        } else {
            InternalPage::<K>::new(guard.data_mut()).set_parent_page_id(parent);
        }
    }

    /// Records the root page id in the header page.
    fn persist_root(&self, root: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root)
            && !header.insert_record(&self.index_name, root)
        {
            return Err(StrataError::HeaderPageFull);
        }
        Ok(())
    }

    /// Walks the whole tree checking structural invariants: node size
    /// bounds, in-page key order, separator bounds, parent back-pointers,
    /// and the ascending leaf chain. Intended for tests.
    pub fn validate(&self) -> Result<()> {
        let root = *self.root_page_id.read();
        if root == INVALID_PAGE_ID {
            return Ok(());
        }
        self.validate_node(root, None, None, None, true)?;

        let mut iter = self.iter()?;
        let mut previous: Option<K> = None;
        while let Some((key, _)) = iter.next()? {
            if let Some(prev) = previous {
                if self.comparator.compare(&prev, &key) != std::cmp::Ordering::Less {
                    return Err(StrataError::IndexCorrupted(
                        "leaf chain keys are not strictly ascending".into(),
                    ));
                }
            }
            previous = Some(key);
        }
        Ok(())
    }

    fn validate_node(
        &self,
        page_id: PageId,
        expected_parent: Option<PageId>,
        lower: Option<K>,
        upper: Option<K>,
        is_root: bool,
    ) -> Result<()> {
        let corrupted = |msg: String| StrataError::IndexCorrupted(msg);
        let guard = self.bpm.read_page(page_id)?;
        let hdr = BTreePageRef::new(guard.data());

        if hdr.parent_page_id() != expected_parent {
            return Err(corrupted(format!("{page_id} has a wrong parent pointer")));
        }

        let in_bounds = |k: &K| {
            lower.as_ref().map_or(true, |lo| {
                self.comparator.compare(k, lo) != std::cmp::Ordering::Less
            }) && upper.as_ref().map_or(true, |hi| {
                self.comparator.compare(k, hi) == std::cmp::Ordering::Less
            })
        };

        if hdr.is_leaf() {
            let leaf = LeafPageRef::<K, V>::new(guard.data());
            if !is_root && (leaf.size() < self.leaf_min_size() || leaf.size() > self.leaf_max_size)
            {
                return Err(corrupted(format!("leaf {page_id} size out of bounds")));
            }
            for i in 0..leaf.size() {
                let key = leaf.key_at(i);
                if !in_bounds(&key) {
                    return Err(corrupted(format!("leaf {page_id} key out of range")));
                }
                if i > 0
                    && self.comparator.compare(&leaf.key_at(i - 1), &key)
                        != std::cmp::Ordering::Less
                {
                    return Err(corrupted(format!("leaf {page_id} keys out of order")));
                }
            }
            return Ok(());
        }

        let node = InternalPageRef::<K>::new(guard.data());
        if is_root {
            if node.size() < 2 {
                return Err(corrupted(format!("internal root {page_id} too small")));
            }
        } else if node.size() < self.internal_min_size() || node.size() > self.internal_max_size {
            return Err(corrupted(format!("internal {page_id} size out of bounds")));
        }

        for i in 1..node.size() {
            let key = node.key_at(i);
            if !in_bounds(&key) {
                return Err(corrupted(format!("internal {page_id} key out of range")));
            }
            if i > 1
                && self.comparator.compare(&node.key_at(i - 1), &key) != std::cmp::Ordering::Less
            {
                return Err(corrupted(format!("internal {page_id} keys out of order")));
            }
        }

        let size = node.size();
        let children: Vec<(PageId, Option<K>, Option<K>)> = (0..size)
            .map(|i| {
                let child_lower = if i == 0 { lower } else { Some(node.key_at(i)) };
                let child_upper = if i + 1 < size {
                    Some(node.key_at(i + 1))
                } else {
                    upper
                };
                (node.value_at(i), child_lower, child_upper)
            })
            .collect();
        drop(guard);

        for (child, child_lower, child_upper) in children {
            self.validate_node(child, Some(page_id), child_lower, child_upper, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{RecordId, SlotId};
    use crate::index::OrdComparator;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    type TestTree = BPlusTree<u32, RecordId, OrdComparator>;

    fn rid(n: u32) -> RecordId {
        RecordId::new(PageId::new(n), SlotId::new(n as u16))
    }

    fn create_tree(leaf_max: usize, internal_max: usize) -> (TestTree, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(32, 2, dm));
        let tree = BPlusTree::new("test_index", bpm, OrdComparator, leaf_max, internal_max).unwrap();
        (tree, temp)
    }

    #[test]
    fn test_empty_tree() {
        let (tree, _temp) = create_tree(4, 4);
        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&1).unwrap(), None);
        assert_eq!(tree.iter().unwrap().next().unwrap(), None);
    }

    #[test]
    fn test_insert_and_lookup_single_leaf() {
        let (tree, _temp) = create_tree(4, 4);

        assert!(tree.insert(&2, &rid(2)).unwrap());
        assert!(tree.insert(&1, &rid(1)).unwrap());
        assert!(tree.insert(&3, &rid(3)).unwrap());

        for k in [1u32, 2, 3] {
            assert_eq!(tree.get_value(&k).unwrap(), Some(rid(k)));
        }
        assert_eq!(tree.get_value(&4).unwrap(), None);
        tree.validate().unwrap();
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let (tree, _temp) = create_tree(4, 4);

        assert!(tree.insert(&1, &rid(1)).unwrap());
        assert!(!tree.insert(&1, &rid(9)).unwrap());
        assert_eq!(tree.get_value(&1).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_leaf_split_builds_root() {
        let (tree, _temp) = create_tree(4, 4);

        for k in 1u32..=5 {
            assert!(tree.insert(&k, &rid(k)).unwrap());
        }

        // The root must now be internal with separator 3.
        let root_pid = tree.root_page_id();
        let guard = tree.bpm.read_page(root_pid).unwrap();
        assert!(!BTreePageRef::new(guard.data()).is_leaf());
        let root = InternalPageRef::<u32>::new(guard.data());
        assert_eq!(root.size(), 2);
        assert_eq!(root.key_at(1), 3);
        drop(guard);

        let keys: Vec<u32> = tree
            .iter()
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
        tree.validate().unwrap();
    }

    #[test]
    fn test_delete_with_merge_collapses_root() {
        let (tree, _temp) = create_tree(4, 4);
        for k in 1u32..=5 {
            tree.insert(&k, &rid(k)).unwrap();
        }

        tree.remove(&4).unwrap();
        tree.remove(&5).unwrap();

        // [3] merged into [1,2]; the remaining leaf is the root.
        let root_pid = tree.root_page_id();
        let guard = tree.bpm.read_page(root_pid).unwrap();
        assert!(BTreePageRef::new(guard.data()).is_leaf());
        let leaf = LeafPageRef::<u32, RecordId>::new(guard.data());
        assert_eq!(leaf.size(), 3);
        drop(guard);

        for k in [1u32, 2, 3] {
            assert_eq!(tree.get_value(&k).unwrap(), Some(rid(k)));
        }
        assert_eq!(tree.get_value(&4).unwrap(), None);
        tree.validate().unwrap();
    }

    #[test]
    fn test_many_inserts_sequential() {
        let (tree, _temp) = create_tree(4, 4);
        for k in 0u32..256 {
            assert!(tree.insert(&k, &rid(k)).unwrap(), "insert {k}");
        }
        tree.validate().unwrap();
        for k in 0u32..256 {
            assert_eq!(tree.get_value(&k).unwrap(), Some(rid(k)), "lookup {k}");
        }

        let keys: Vec<u32> = tree.iter().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, (0u32..256).collect::<Vec<_>>());
    }

    #[test]
    fn test_many_inserts_reverse_then_delete_all() {
        let (tree, _temp) = create_tree(4, 5);
        for k in (0u32..200).rev() {
            tree.insert(&k, &rid(k)).unwrap();
        }
        tree.validate().unwrap();

        for k in 0u32..200 {
            tree.remove(&k).unwrap();
            if k % 37 == 0 {
                tree.validate().unwrap();
            }
        }
        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&13).unwrap(), None);
    }

    #[test]
    fn test_iter_from() {
        let (tree, _temp) = create_tree(4, 4);
        for k in [10u32, 20, 30, 40, 50] {
            tree.insert(&k, &rid(k)).unwrap();
        }

        let keys: Vec<u32> = tree
            .iter_from(&25)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![30, 40, 50]);
    }

    #[test]
    fn test_root_persisted_in_header() {
        let temp = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(32, 2, dm));

        {
            let tree: TestTree =
                BPlusTree::new("persisted", Arc::clone(&bpm), OrdComparator, 4, 4).unwrap();
            for k in 1u32..=10 {
                tree.insert(&k, &rid(k)).unwrap();
            }
            bpm.flush_all_pages().unwrap();
        }

        // Re-open against the same pool: the root comes from the header.
        let tree: TestTree = BPlusTree::new("persisted", bpm, OrdComparator, 4, 4).unwrap();
        assert!(!tree.is_empty());
        for k in 1u32..=10 {
            assert_eq!(tree.get_value(&k).unwrap(), Some(rid(k)));
        }
    }

    #[test]
    fn test_concurrent_inserts() {
        let temp = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(64, 2, dm));
        let tree: Arc<TestTree> =
            Arc::new(BPlusTree::new("concurrent", bpm, OrdComparator, 8, 8).unwrap());

        let mut handles = Vec::new();
        for t in 0..4u32 {
            let tree = Arc::clone(&tree);
            handles.push(std::thread::spawn(move || {
                for i in 0..128u32 {
                    let key = i * 4 + t;
                    tree.insert(&key, &rid(key)).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        tree.validate().unwrap();
        for key in 0u32..512 {
            assert_eq!(tree.get_value(&key).unwrap(), Some(rid(key)), "lookup {key}");
        }
    }
}
