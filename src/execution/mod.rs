mod aggregation_executor;
mod delete_executor;
mod executor_context;
mod index_scan_executor;
mod insert_executor;
mod nested_index_join_executor;
mod seq_scan_executor;
mod topn_executor;
mod values_executor;

use std::sync::Arc;

use crate::common::{RecordId, Result, INVALID_PAGE_ID, SlotId};
use crate::tuple::Tuple;

pub use aggregation_executor::{AggregateExpr, AggregationExecutor, AggregationType};
pub use delete_executor::DeleteExecutor;
pub use executor_context::ExecutorContext;
pub use index_scan_executor::IndexScanExecutor;
pub use insert_executor::InsertExecutor;
pub use nested_index_join_executor::{JoinType, NestedIndexJoinExecutor};
pub use seq_scan_executor::SeqScanExecutor;
pub use topn_executor::{OrderBy, OrderDirection, TopNExecutor};
pub use values_executor::ValuesExecutor;

/// Pull-based operator interface: `init` prepares state and takes
/// operator-level locks; `next` yields one tuple at a time. Executors
/// hold page guards and so stay on the thread that created them.
pub trait Executor {
    fn init(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<(Tuple, RecordId)>>;
}

/// Row predicate applied by scans.
pub type Predicate = Arc<dyn Fn(&Tuple) -> bool + Send + Sync>;

/// Placeholder record id for tuples that do not come from a table page
/// (literal rows, aggregates, counts).
pub fn null_rid() -> RecordId {
    RecordId::new(INVALID_PAGE_ID, SlotId::new(0))
}
