use std::sync::Arc;

use crate::catalog::TableInfo;
use crate::common::{RecordId, Result};
use crate::concurrency::{IsolationLevel, LockMode};
use crate::index::BPlusTreeIterator;
use crate::tuple::Tuple;

use super::{Executor, ExecutorContext};

/// Scan driven by a B+ tree index: either a point probe (when an equality
/// key is given) or a walk of the leaf chain in key order. Row locking
/// mirrors the sequential scan.
pub struct IndexScanExecutor {
    ctx: Arc<ExecutorContext>,
    index_name: String,
    /// Point predicate: yield only the row matching this key
    point_key: Option<i32>,
    table: Option<Arc<TableInfo>>,
    matches: Vec<RecordId>,
    cursor: usize,
    tree_iter: Option<BPlusTreeIterator<i32, RecordId>>,
}

impl IndexScanExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        index_name: impl Into<String>,
        point_key: Option<i32>,
    ) -> Self {
        Self {
            ctx,
            index_name: index_name.into(),
            point_key,
            table: None,
            matches: Vec::new(),
            cursor: 0,
            tree_iter: None,
        }
    }

    /// End-of-scan release under READ_COMMITTED; see the sequential
    /// scan's discipline.
    fn release_read_locks(&self, table: &TableInfo) -> Result<()> {
        for rid in self.ctx.txn.shared_row_locks_on(table.oid) {
            self.ctx
                .lock_manager
                .unlock_row(&self.ctx.txn, table.oid, rid)?;
        }
        if self.ctx.txn.is_table_intention_shared_locked(table.oid) {
            self.ctx
                .lock_manager
                .unlock_table(&self.ctx.txn, table.oid)?;
        }
        Ok(())
    }

    fn next_rid(&mut self) -> Result<Option<RecordId>> {
        if let Some(iter) = self.tree_iter.as_mut() {
            return Ok(iter.next()?.map(|(_, rid)| rid));
        }
        if self.cursor < self.matches.len() {
            let rid = self.matches[self.cursor];
            self.cursor += 1;
            return Ok(Some(rid));
        }
        Ok(None)
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        let index = self.ctx.catalog.index(&self.index_name)?;
        let table = self.ctx.catalog.table(&index.table_name)?;

        let txn = &self.ctx.txn;
        let covered = txn.is_table_intention_shared_locked(table.oid)
            || txn.is_table_shared_locked(table.oid)
            || txn.is_table_intention_exclusive_locked(table.oid)
            || txn.is_table_shared_intention_exclusive_locked(table.oid)
            || txn.is_table_exclusive_locked(table.oid);
        if txn.isolation_level() != IsolationLevel::ReadUncommitted && !covered {
            self.ctx
                .lock_manager
                .lock_table(txn, LockMode::IntentionShared, table.oid)?;
        }

        match self.point_key {
            Some(key) => {
                self.matches = index.index.get_value(&key)?.into_iter().collect();
                self.cursor = 0;
            }
            None => {
                self.tree_iter = Some(index.index.iter()?);
            }
        }

        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, RecordId)>> {
        let table = Arc::clone(self.table.as_ref().expect("init must run first"));

        let Some(rid) = self.next_rid()? else {
            if self.ctx.txn.isolation_level() == IsolationLevel::ReadCommitted {
                self.release_read_locks(&table)?;
            }
            return Ok(None);
        };

        let txn = &self.ctx.txn;
        if txn.isolation_level() != IsolationLevel::ReadUncommitted
            && !txn.is_row_shared_locked(table.oid, rid)
            && !txn.is_row_exclusive_locked(table.oid, rid)
        {
            self.ctx
                .lock_manager
                .lock_row(txn, LockMode::Shared, table.oid, rid)?;
        }

        let bytes = table.heap.get_tuple(rid)?;
        let tuple = Tuple::from_bytes(&table.schema, &bytes)?;
        Ok(Some((tuple, rid)))
    }
}
