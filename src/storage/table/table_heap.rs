use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, RecordId, Result};
use crate::storage::page::{TablePage, TablePageRef};

/// Tuple storage as a singly-linked chain of table pages.
///
/// Inserts walk the chain and extend it when no page has room; deletes
/// mark slots empty in place. Tuples are addressed by `RecordId`.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    /// Serializes chain extension so two inserts cannot both append a page
    extend_latch: Mutex<()>,
}

impl TableHeap {
    /// Creates a heap with one empty page.
    pub fn new(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        let first_page_id = bpm.new_page()?;
        {
            let mut guard = bpm.write_page(first_page_id)?;
            TablePage::new(guard.data_mut()).init(first_page_id);
        }
        bpm.unpin_page(first_page_id, true);

        Ok(Self {
            bpm,
            first_page_id,
            extend_latch: Mutex::new(()),
        })
    }

    /// Opens an existing heap rooted at `first_page_id`.
    pub fn open(bpm: Arc<BufferPoolManager>, first_page_id: PageId) -> Self {
        Self {
            bpm,
            first_page_id,
            extend_latch: Mutex::new(()),
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Inserts a tuple into the first page with room, appending a fresh
    /// page to the chain when none has any.
    pub fn insert_tuple(&self, tuple: &[u8]) -> Result<RecordId> {
        let _guard = self.extend_latch.lock();

        let mut page_id = self.first_page_id;
        loop {
            let mut guard = self.bpm.write_page(page_id)?;
            let mut page = TablePage::new(guard.data_mut());

            if page.can_insert(tuple.len()) {
                return page.insert_tuple(tuple);
            }

            match page.next_page_id() {
                Some(next) => {
                    drop(guard);
                    page_id = next;
                }
                None => {
                    let new_page_id = self.bpm.new_page()?;
                    page.set_next_page_id(Some(new_page_id));
                    drop(guard);

                    let mut new_guard = self.bpm.write_page(new_page_id)?;
                    let mut new_page = TablePage::new(new_guard.data_mut());
                    new_page.init(new_page_id);
                    let rid = new_page.insert_tuple(tuple);
                    drop(new_guard);
                    self.bpm.unpin_page(new_page_id, true);
                    return rid;
                }
            }
        }
    }

    /// Reads a tuple by record id.
    pub fn get_tuple(&self, rid: RecordId) -> Result<Vec<u8>> {
        let guard = self.bpm.read_page(rid.page_id)?;
        let page = TablePageRef::new(guard.data());
        Ok(page.get_tuple(rid.slot_id)?.to_vec())
    }

    /// Marks the tuple's slot deleted.
    pub fn delete_tuple(&self, rid: RecordId) -> Result<()> {
        let mut guard = self.bpm.write_page(rid.page_id)?;
        TablePage::new(guard.data_mut()).delete_tuple(rid.slot_id)
    }

    /// Iterator over all live tuples in chain order.
    pub fn iter(&self) -> TableIterator {
        TableIterator {
            bpm: Arc::clone(&self.bpm),
            next_page_id: Some(self.first_page_id),
            buffered: Vec::new(),
            cursor: 0,
        }
    }
}

/// Forward cursor over a table heap. Materializes one page of tuples at a
/// time so no page stays pinned across yields.
pub struct TableIterator {
    bpm: Arc<BufferPoolManager>,
    next_page_id: Option<PageId>,
    buffered: Vec<(RecordId, Vec<u8>)>,
    cursor: usize,
}

impl TableIterator {
    pub fn next(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        loop {
            if self.cursor < self.buffered.len() {
                let item = self.buffered[self.cursor].clone();
                self.cursor += 1;
                return Ok(Some(item));
            }

            let Some(page_id) = self.next_page_id else {
                return Ok(None);
            };

            let guard = self.bpm.read_page(page_id)?;
            let page = TablePageRef::new(guard.data());
            self.buffered = page
                .record_ids()
                .into_iter()
                .map(|rid| match page.get_tuple(rid.slot_id) {
                    Ok(tuple) => Ok((rid, tuple.to_vec())),
                    Err(e) => Err(e),
                })
                .collect::<Result<Vec<_>>>()?;
            self.cursor = 0;
            self.next_page_id = page.next_page_id();
        }
    }
}

impl Iterator for TableIterator {
    type Item = Result<(RecordId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match TableIterator::next(self) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
