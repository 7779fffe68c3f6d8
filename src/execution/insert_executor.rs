use std::sync::Arc;

use crate::common::{RecordId, Result};
use crate::concurrency::LockMode;
use crate::tuple::{Tuple, Value};

use super::{null_rid, Executor, ExecutorContext};

/// Inserts every child-produced row into the target table and its
/// indexes. IX is taken on the table at init; each inserted row is locked
/// X before any index entry is written. `next` reports the row count
/// exactly once.
pub struct InsertExecutor {
    ctx: Arc<ExecutorContext>,
    table_name: String,
    child: Box<dyn Executor>,
    done: bool,
}

impl InsertExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_name: impl Into<String>,
        child: Box<dyn Executor>,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            child,
            done: false,
        }
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        let table = self.ctx.catalog.table(&self.table_name)?;
        let txn = &self.ctx.txn;
        let covered = txn.is_table_intention_exclusive_locked(table.oid)
            || txn.is_table_shared_intention_exclusive_locked(table.oid)
            || txn.is_table_exclusive_locked(table.oid);
        if covered {
            return Ok(());
        }
        self.ctx
            .lock_manager
            .lock_table(txn, LockMode::IntentionExclusive, table.oid)
    }

    fn next(&mut self) -> Result<Option<(Tuple, RecordId)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let table = self.ctx.catalog.table(&self.table_name)?;
        let indexes = self.ctx.catalog.table_indexes(&self.table_name);

        let mut count = 0i32;
        while let Some((tuple, _)) = self.child.next()? {
            let bytes = tuple.to_bytes(&table.schema)?;
            let rid = table.heap.insert_tuple(&bytes)?;

            self.ctx
                .lock_manager
                .lock_row(&self.ctx.txn, LockMode::Exclusive, table.oid, rid)?;

            for index in &indexes {
                let key = index.key_of(&tuple)?;
                index.index.insert(&key, &rid)?;
            }
            count += 1;
        }

        Ok(Some((Tuple::new(vec![Value::Integer(count)]), null_rid())))
    }
}
