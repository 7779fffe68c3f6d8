use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::common::{RecordId, Result};
use crate::tuple::{Tuple, Value};

use super::{Executor, ExecutorContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// Index nested-loop join: for every outer row, the join key is probed
/// in the inner table's B+ tree and the matching inner row is fetched by
/// record id. A LEFT join pads missing inner columns with nulls.
pub struct NestedIndexJoinExecutor {
    ctx: Arc<ExecutorContext>,
    child: Box<dyn Executor>,
    inner_index_name: String,
    /// Outer column the join key is drawn from
    key_column: usize,
    join_type: JoinType,
    index: Option<Arc<IndexInfo>>,
    inner_table: Option<Arc<TableInfo>>,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        child: Box<dyn Executor>,
        inner_index_name: impl Into<String>,
        key_column: usize,
        join_type: JoinType,
    ) -> Self {
        Self {
            ctx,
            child,
            inner_index_name: inner_index_name.into(),
            key_column,
            join_type,
            index: None,
            inner_table: None,
        }
    }

    fn null_padding(inner: &TableInfo) -> Tuple {
        Tuple::new(vec![Value::Null; inner.schema.column_count()])
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        let index = self.ctx.catalog.index(&self.inner_index_name)?;
        let inner_table = self.ctx.catalog.table(&index.table_name)?;
        self.index = Some(index);
        self.inner_table = Some(inner_table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, RecordId)>> {
        let index = Arc::clone(self.index.as_ref().expect("init must run first"));
        let inner_table = Arc::clone(self.inner_table.as_ref().expect("init must run first"));

        loop {
            let Some((outer, outer_rid)) = self.child.next()? else {
                return Ok(None);
            };

            let probe = match outer.value(self.key_column) {
                Value::Integer(key) => index.index.get_value(key)?,
                // A null join key never matches.
                _ => None,
            };

            match probe {
                Some(inner_rid) => {
                    let bytes = inner_table.heap.get_tuple(inner_rid)?;
                    let inner = Tuple::from_bytes(&inner_table.schema, &bytes)?;
                    return Ok(Some((Tuple::concat(&outer, &inner), outer_rid)));
                }
                None if self.join_type == JoinType::Left => {
                    let padded = Tuple::concat(&outer, &Self::null_padding(&inner_table));
                    return Ok(Some((padded, outer_rid)));
                }
                None => continue,
            }
        }
    }
}
