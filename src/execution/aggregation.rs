use std::collections::HashMap;

use crate::record::{DataType, Value};

use super::condition::{decode_col, find_col, ColRef, CompOp};
use super::error::{QueryError, QueryResult};
use super::{Executor, ExecutorKind, OutCol};

/// Aggregate function applied to a selected column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    /// Plain group-by column, no aggregation
    None,
    Count,
    CountStar,
    Min,
    Max,
    Sum,
}

/// One item of the aggregation's select list
#[derive(Debug, Clone)]
pub struct AggSelect {
    pub func: AggFunc,
    /// Source column; absent only for COUNT(*)
    pub col: Option<ColRef>,
}

impl AggSelect {
    pub fn plain(col: ColRef) -> Self {
        Self {
            func: AggFunc::None,
            col: Some(col),
        }
    }

    pub fn agg(func: AggFunc, col: ColRef) -> Self {
        Self {
            func,
            col: Some(col),
        }
    }

    pub fn count_star() -> Self {
        Self {
            func: AggFunc::CountStar,
            col: None,
        }
    }
}

/// HAVING conjunct, evaluated per group against the aggregated row
#[derive(Debug, Clone)]
pub struct HavingCond {
    pub func: AggFunc,
    pub col: Option<ColRef>,
    pub op: CompOp,
    pub rhs: Value,
}

/// Hash aggregation with optional GROUP BY and HAVING.
///
/// Rows group by the concatenated raw bytes of the GROUP BY columns;
/// groups are emitted in first-seen order. Empty input with no GROUP BY
/// yields one identity row (COUNT = 0, other aggregates NULL); with GROUP
/// BY it yields nothing.
pub struct AggregationExec {
    child: Box<dyn Executor>,
    select: Vec<AggSelect>,
    group_by: Vec<OutCol>,
    having: Vec<HavingCond>,
    cols: Vec<OutCol>,
    len: usize,

    groups: Vec<Vec<Vec<u8>>>,
    cur: usize,
    out: Option<Vec<u8>>,
    identity_emitted: bool,
    ended: bool,
}

impl AggregationExec {
    pub fn new(
        child: Box<dyn Executor>,
        select: Vec<AggSelect>,
        group_by: Vec<ColRef>,
        having: Vec<HavingCond>,
    ) -> QueryResult<Self> {
        let group_cols: Vec<OutCol> = group_by
            .iter()
            .map(|col_ref| find_col(child.cols(), col_ref).cloned())
            .collect::<QueryResult<_>>()?;

        // Resolve the output schema
        let mut cols = Vec::with_capacity(select.len());
        let mut offset = 0;
        for item in &select {
            let (table, name, dtype) = match (&item.func, &item.col) {
                (AggFunc::CountStar, _) => (String::new(), "*".to_string(), DataType::Int),
                (func, Some(col_ref)) => {
                    let src = find_col(child.cols(), col_ref)?;
                    let dtype = match func {
                        AggFunc::Count => DataType::Int,
                        AggFunc::Sum => match src.dtype {
                            DataType::Int => DataType::Int,
                            DataType::Float => DataType::Float,
                            other => {
                                return Err(QueryError::Internal(format!(
                                    "SUM over non-numeric column {} ({})",
                                    src.name,
                                    other.name()
                                )))
                            }
                        },
                        _ => src.dtype,
                    };
                    if *func == AggFunc::None
                        && !group_cols.iter().any(|g| g.name == src.name && g.table == src.table)
                    {
                        return Err(QueryError::Internal(format!(
                            "column {} must appear in GROUP BY or an aggregate",
                            src.name
                        )));
                    }
                    (src.table.clone(), src.name.clone(), dtype)
                }
                _ => {
                    return Err(QueryError::Internal(
                        "aggregate select item without a column".to_string(),
                    ))
                }
            };
            let len = dtype.size();
            cols.push(OutCol {
                table,
                name,
                dtype,
                offset,
                len,
            });
            offset += len;
        }

        Ok(Self {
            child,
            select,
            group_by: group_cols,
            having,
            cols,
            len: offset,
            groups: Vec::new(),
            cur: 0,
            out: None,
            identity_emitted: false,
            ended: false,
        })
    }

    /// Aggregate one function over a group's rows
    fn aggregate_value(
        &self,
        func: AggFunc,
        col: Option<&ColRef>,
        rows: &[Vec<u8>],
    ) -> QueryResult<Value> {
        if rows.is_empty() {
            return Ok(match func {
                AggFunc::Count | AggFunc::CountStar => Value::Int(0),
                _ => Value::Null,
            });
        }

        match func {
            AggFunc::Count | AggFunc::CountStar => Ok(Value::Int(rows.len() as i32)),
            AggFunc::None => {
                let col_ref = col.ok_or_else(|| {
                    QueryError::Internal("group column reference missing".to_string())
                })?;
                decode_col(&rows[0], find_col(self.child.cols(), col_ref)?)
            }
            AggFunc::Min | AggFunc::Max => {
                let col_ref = col.ok_or_else(|| {
                    QueryError::Internal("aggregate column reference missing".to_string())
                })?;
                let src = find_col(self.child.cols(), col_ref)?;
                let mut best = decode_col(&rows[0], src)?;
                for row in &rows[1..] {
                    let value = decode_col(row, src)?;
                    let ord = value.compare(&best)?;
                    let better = match func {
                        AggFunc::Min => ord == std::cmp::Ordering::Less,
                        _ => ord == std::cmp::Ordering::Greater,
                    };
                    if better {
                        best = value;
                    }
                }
                Ok(best)
            }
            AggFunc::Sum => {
                let col_ref = col.ok_or_else(|| {
                    QueryError::Internal("aggregate column reference missing".to_string())
                })?;
                let src = find_col(self.child.cols(), col_ref)?;
                match src.dtype {
                    DataType::Int => {
                        let mut sum = 0i32;
                        for row in rows {
                            if let Value::Int(v) = decode_col(row, src)? {
                                sum += v;
                            }
                        }
                        Ok(Value::Int(sum))
                    }
                    DataType::Float => {
                        let mut sum = 0f32;
                        for row in rows {
                            if let Value::Float(v) = decode_col(row, src)? {
                                sum += v;
                            }
                        }
                        Ok(Value::Float(sum))
                    }
                    other => Err(QueryError::Internal(format!(
                        "SUM over non-numeric type {}",
                        other.name()
                    ))),
                }
            }
        }
    }

    fn passes_having(&self, rows: &[Vec<u8>]) -> QueryResult<bool> {
        for cond in &self.having {
            let value = self.aggregate_value(cond.func, cond.col.as_ref(), rows)?;
            if !cond.op.matches(value.compare(&cond.rhs)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Serialize the aggregated row for a group
    fn encode_group(&self, rows: &[Vec<u8>]) -> QueryResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len);
        for (item, col) in self.select.iter().zip(&self.cols) {
            let value = self.aggregate_value(item.func, item.col.as_ref(), rows)?;
            out.extend_from_slice(&value.serialize(col.dtype)?);
        }
        Ok(out)
    }

    fn produce(&mut self) -> QueryResult<()> {
        debug_assert!(self.out.is_none());
        loop {
            if self.groups.is_empty() && self.group_by.is_empty() {
                // Aggregates over an empty relation still produce one row
                if !self.identity_emitted {
                    self.identity_emitted = true;
                    self.out = Some(self.encode_group(&[])?);
                } else {
                    self.ended = true;
                }
                return Ok(());
            }
            if self.cur >= self.groups.len() {
                self.ended = true;
                return Ok(());
            }
            let rows = std::mem::take(&mut self.groups[self.cur]);
            self.cur += 1;
            if self.passes_having(&rows)? {
                self.out = Some(self.encode_group(&rows)?);
                return Ok(());
            }
        }
    }
}

impl Executor for AggregationExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        let mut group_index: HashMap<Vec<u8>, usize> = HashMap::new();

        self.child.begin_tuple()?;
        while !self.child.is_end() {
            let row = self.child.current()?;
            let mut key = Vec::new();
            for col in &self.group_by {
                key.extend_from_slice(&row[col.offset..col.offset + col.len]);
            }
            let slot = *group_index.entry(key).or_insert_with(|| {
                self.groups.push(Vec::new());
                self.groups.len() - 1
            });
            self.groups[slot].push(row);
            self.child.next_tuple()?;
        }

        self.cur = 0;
        self.produce()
    }

    fn next_tuple(&mut self) -> QueryResult<()> {
        if self.ended {
            return Err(QueryError::Internal(
                "advancing a finished aggregation".to_string(),
            ));
        }
        self.produce()
    }

    fn is_end(&self) -> bool {
        self.ended
    }

    fn current(&mut self) -> QueryResult<Vec<u8>> {
        self.out
            .take()
            .ok_or_else(|| QueryError::Internal("aggregate row already consumed".to_string()))
    }

    fn cols(&self) -> &[OutCol] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Aggregation
    }
}
