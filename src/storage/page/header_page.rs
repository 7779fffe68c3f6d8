use crate::common::{PageId, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

/// Bytes reserved for an index name within a record
const NAME_SIZE: usize = 32;
/// name + root page id
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Most records a header page can hold
pub const HEADER_PAGE_CAPACITY: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// The well-known page 0: a flat table of `(index name, root page id)`
/// records, touched only by index bootstrap and root-change paths.
///
/// Names longer than 32 bytes are truncated to their first 32 bytes.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(
            self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        &self.data[offset..offset + NAME_SIZE]
    }

    fn root_at(&self, index: usize) -> PageId {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
        PageId::new(u32::from_le_bytes(
            self.data[offset..offset + 4].try_into().unwrap(),
        ))
    }

    fn set_record(&mut self, index: usize, name: &[u8; NAME_SIZE], root: PageId) {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        self.data[offset..offset + NAME_SIZE].copy_from_slice(name);
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root.as_u32().to_le_bytes());
    }

    fn encode_name(name: &str) -> [u8; NAME_SIZE] {
        let mut fixed = [0u8; NAME_SIZE];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_SIZE);
        fixed[..len].copy_from_slice(&bytes[..len]);
        fixed
    }

    fn find(&self, name: &str) -> Option<usize> {
        let fixed = Self::encode_name(name);
        (0..self.record_count()).find(|&i| self.name_at(i) == fixed)
    }

    /// Registers a new index. Returns false if the name already exists or
    /// the page is full.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> bool {
        if self.find(name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= HEADER_PAGE_CAPACITY {
            return false;
        }
        self.set_record(count, &Self::encode_name(name), root);
        self.set_record_count(count + 1);
        true
    }

    /// Points an existing record at a new root. Returns false if absent.
    pub fn update_record(&mut self, name: &str, root: PageId) -> bool {
        match self.find(name) {
            Some(index) => {
                self.set_record(index, &Self::encode_name(name), root);
                true
            }
            None => false,
        }
    }

    /// Drops a record, moving the last record into its slot.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.find(name) else {
            return false;
        };
        let count = self.record_count();
        if index != count - 1 {
            let mut last_name = [0u8; NAME_SIZE];
            last_name.copy_from_slice(self.name_at(count - 1));
            let last_root = self.root_at(count - 1);
            self.set_record(index, &last_name, last_root);
        }
        self.set_record_count(count - 1);
        true
    }

    /// Root page id registered under the given index name.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|index| self.root_at(index))
    }
}

/// Read-only view of the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(
            self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        let fixed = HeaderPage::encode_name(name);
        (0..self.record_count())
            .find(|&i| {
                let offset = RECORDS_OFFSET + i * RECORD_SIZE;
                self.data[offset..offset + NAME_SIZE] == fixed
            })
            .map(|i| {
                let offset = RECORDS_OFFSET + i * RECORD_SIZE + NAME_SIZE;
                PageId::new(u32::from_le_bytes(
                    self.data[offset..offset + 4].try_into().unwrap(),
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);

        assert!(page.insert_record("orders_pk", PageId::new(3)));
        assert!(page.insert_record("users_pk", PageId::new(7)));
        assert!(!page.insert_record("orders_pk", PageId::new(9)));

        assert_eq!(page.get_root_id("orders_pk"), Some(PageId::new(3)));
        assert_eq!(page.get_root_id("users_pk"), Some(PageId::new(7)));
        assert_eq!(page.get_root_id("missing"), None);
    }

    #[test]
    fn test_update() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);

        assert!(!page.update_record("orders_pk", PageId::new(5)));
        page.insert_record("orders_pk", PageId::new(3));
        assert!(page.update_record("orders_pk", PageId::new(5)));
        assert_eq!(page.get_root_id("orders_pk"), Some(PageId::new(5)));
    }

    #[test]
    fn test_delete_swaps_last() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);

        page.insert_record("a", PageId::new(1));
        page.insert_record("b", PageId::new(2));
        page.insert_record("c", PageId::new(3));

        assert!(page.delete_record("a"));
        assert_eq!(page.record_count(), 2);
        assert_eq!(page.get_root_id("a"), None);
        assert_eq!(page.get_root_id("b"), Some(PageId::new(2)));
        assert_eq!(page.get_root_id("c"), Some(PageId::new(3)));
    }

    #[test]
    fn test_capacity_limit() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);

        for i in 0..HEADER_PAGE_CAPACITY {
            assert!(page.insert_record(&format!("idx_{i}"), PageId::new(i as u32)));
        }
        assert!(!page.insert_record("one_too_many", PageId::new(0)));
    }
}
