use std::collections::HashMap;

use crate::common::{RecordId, Result};
use crate::tuple::{Tuple, Value};

use super::{null_rid, Executor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

/// One aggregate over one input column (ignored for COUNT(*)).
#[derive(Debug, Clone, Copy)]
pub struct AggregateExpr {
    pub op: AggregationType,
    pub column: usize,
}

impl AggregateExpr {
    pub fn new(op: AggregationType, column: usize) -> Self {
        Self { op, column }
    }
}

/// Hash aggregation: `init` drains the child into a table keyed by the
/// group-by columns, combining each row into per-group aggregate values;
/// `next` yields one row per group (group values, then aggregates). With
/// no groups and no input, a single identity row is produced.
pub struct AggregationExecutor {
    child: Box<dyn Executor>,
    group_by: Vec<usize>,
    aggregates: Vec<AggregateExpr>,
    output: Vec<Tuple>,
    cursor: usize,
}

impl AggregationExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        group_by: Vec<usize>,
        aggregates: Vec<AggregateExpr>,
    ) -> Self {
        Self {
            child,
            group_by,
            aggregates,
            output: Vec::new(),
            cursor: 0,
        }
    }

    fn identity_values(&self) -> Vec<Value> {
        self.aggregates
            .iter()
            .map(|agg| match agg.op {
                AggregationType::CountStar | AggregationType::Count => Value::Integer(0),
                _ => Value::Null,
            })
            .collect()
    }

    fn combine(&self, state: &mut [Value], tuple: &Tuple) {
        for (slot, agg) in state.iter_mut().zip(&self.aggregates) {
            let input = tuple.value(agg.column);
            match agg.op {
                AggregationType::CountStar => {
                    *slot = Value::Integer(slot.as_i32().unwrap_or(0) + 1);
                }
                AggregationType::Count => {
                    if !input.is_null() {
                        *slot = Value::Integer(slot.as_i32().unwrap_or(0) + 1);
                    }
                }
                AggregationType::Sum => {
                    if let Some(v) = input.as_i64() {
                        *slot = match slot.as_i64() {
                            Some(acc) => Value::BigInt(acc + v),
                            None => Value::BigInt(v),
                        };
                    }
                }
                AggregationType::Min => {
                    if !input.is_null() && (slot.is_null() || input < slot) {
                        *slot = input.clone();
                    }
                }
                AggregationType::Max => {
                    if !input.is_null() && (slot.is_null() || input > slot) {
                        *slot = input.clone();
                    }
                }
            }
        }
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.output.clear();
        self.cursor = 0;

        let mut groups: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
        let mut order: Vec<Vec<Value>> = Vec::new();

        while let Some((tuple, _)) = self.child.next()? {
            let key: Vec<Value> = self
                .group_by
                .iter()
                .map(|&column| tuple.value(column).clone())
                .collect();
            let state = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                self.aggregates
                    .iter()
                    .map(|agg| match agg.op {
                        AggregationType::CountStar | AggregationType::Count => Value::Integer(0),
                        _ => Value::Null,
                    })
                    .collect()
            });
            self.combine(state, &tuple);
        }

        if groups.is_empty() && self.group_by.is_empty() {
            self.output.push(Tuple::new(self.identity_values()));
            return Ok(());
        }

        for key in order {
            let state = groups.remove(&key).expect("group recorded at insertion");
            let mut values = key;
            values.extend(state);
            self.output.push(Tuple::new(values));
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, RecordId)>> {
        if self.cursor >= self.output.len() {
            return Ok(None);
        }
        let tuple = self.output[self.cursor].clone();
        self.cursor += 1;
        Ok(Some((tuple, null_rid())))
    }
}
