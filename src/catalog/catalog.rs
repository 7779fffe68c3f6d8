use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::BufferPoolManager;
use crate::common::{RecordId, Result, StrataError, TableId};
use crate::index::{BPlusTree, OrdComparator};
use crate::storage::table::TableHeap;
use crate::tuple::{Schema, Tuple, Value};

/// Index instantiation used by the executor layer: integer keys mapping
/// to row identifiers.
pub type TableIndex = BPlusTree<i32, RecordId, OrdComparator>;

pub struct TableInfo {
    pub name: String,
    pub oid: TableId,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

pub struct IndexInfo {
    pub name: String,
    pub table_name: String,
    /// Column of the indexed table the key is drawn from
    pub key_column: usize,
    pub index: Arc<TableIndex>,
}

impl IndexInfo {
    /// Extracts the index key from a tuple of the indexed table.
    pub fn key_of(&self, tuple: &Tuple) -> Result<i32> {
        match tuple.value(self.key_column) {
            Value::Integer(v) => Ok(*v),
            other => Err(StrataError::Execution(format!(
                "index {} expects an INTEGER key, got {other}",
                self.name
            ))),
        }
    }
}

/// Name-keyed registry of tables and their indexes. Metadata only lives
/// in memory; the heaps and trees it points at live in the buffer pool.
pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    next_oid: AtomicU32,
    tables: Mutex<HashMap<String, Arc<TableInfo>>>,
    tables_by_oid: Mutex<HashMap<TableId, Arc<TableInfo>>>,
    indexes: Mutex<HashMap<String, Arc<IndexInfo>>>,
    indexes_by_table: Mutex<HashMap<String, Vec<Arc<IndexInfo>>>>,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            next_oid: AtomicU32::new(0),
            tables: Mutex::new(HashMap::new()),
            tables_by_oid: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
            indexes_by_table: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a table with a fresh heap.
    pub fn create_table(&self, name: impl Into<String>, schema: Schema) -> Result<Arc<TableInfo>> {
        let name = name.into();
        let mut tables = self.tables.lock();
        if tables.contains_key(&name) {
            return Err(StrataError::Execution(format!(
                "table {name:?} already exists"
            )));
        }

        let heap = Arc::new(TableHeap::new(Arc::clone(&self.bpm))?);
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(TableInfo {
            name: name.clone(),
            oid,
            schema,
            heap,
        });

        tables.insert(name.clone(), Arc::clone(&info));
        self.tables_by_oid.lock().insert(oid, Arc::clone(&info));
        self.indexes_by_table.lock().entry(name).or_default();
        Ok(info)
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableInfo>> {
        self.tables
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::TableNotFound(name.to_string()))
    }

    pub fn table_by_oid(&self, oid: TableId) -> Result<Arc<TableInfo>> {
        self.tables_by_oid
            .lock()
            .get(&oid)
            .cloned()
            .ok_or_else(|| StrataError::TableNotFound(format!("oid {oid}")))
    }

    /// Creates a B+ tree index over one integer column of an existing
    /// table and backfills it from the heap.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_column: usize,
    ) -> Result<Arc<IndexInfo>> {
        let index_name = index_name.into();
        let table = self.table(table_name)?;

        let mut indexes = self.indexes.lock();
        if indexes.contains_key(&index_name) {
            return Err(StrataError::Execution(format!(
                "index {index_name:?} already exists"
            )));
        }

        let index = Arc::new(TableIndex::with_default_sizes(
            index_name.clone(),
            Arc::clone(&self.bpm),
            OrdComparator,
        )?);

        let info = Arc::new(IndexInfo {
            name: index_name.clone(),
            table_name: table_name.to_string(),
            key_column,
            index,
        });

        for item in table.heap.iter() {
            let (rid, bytes) = item?;
            let tuple = Tuple::from_bytes(&table.schema, &bytes)?;
            let key = info.key_of(&tuple)?;
            info.index.insert(&key, &rid)?;
        }

        indexes.insert(index_name, Arc::clone(&info));
        self.indexes_by_table
            .lock()
            .entry(table_name.to_string())
            .or_default()
            .push(Arc::clone(&info));
        Ok(info)
    }

    pub fn index(&self, name: &str) -> Result<Arc<IndexInfo>> {
        self.indexes
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::IndexNotFound(name.to_string()))
    }

    /// Every index declared over the given table.
    pub fn table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        self.indexes_by_table
            .lock()
            .get(table_name)
            .cloned()
            .unwrap_or_default()
    }
}
