use crate::common::{RecordId, Result};
use crate::tuple::{Tuple, Value};

use super::{null_rid, Executor};

/// Leaf executor producing a literal row set once; the canonical child of
/// an insert.
pub struct ValuesExecutor {
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self { rows, cursor: 0 }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, RecordId)>> {
        if self.cursor >= self.rows.len() {
            return Ok(None);
        }
        let tuple = Tuple::new(self.rows[self.cursor].clone());
        self.cursor += 1;
        Ok(Some((tuple, null_rid())))
    }
}
