use std::cmp::Ordering;

use crate::record::{DataType, Value};

use super::error::{QueryError, QueryResult};
use super::OutCol;

/// Comparison operator of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompOp {
    /// The operator after swapping the two sides of a comparison
    pub fn swapped(self) -> CompOp {
        match self {
            CompOp::Eq => CompOp::Eq,
            CompOp::Ne => CompOp::Ne,
            CompOp::Lt => CompOp::Gt,
            CompOp::Gt => CompOp::Lt,
            CompOp::Le => CompOp::Ge,
            CompOp::Ge => CompOp::Le,
        }
    }

    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Ne => ord != Ordering::Equal,
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Le => ord != Ordering::Greater,
            CompOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Reference to a column, optionally qualified by table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColRef {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

/// Right-hand side of a predicate: a literal or another column
#[derive(Debug, Clone)]
pub enum Operand {
    Literal(Value),
    Column(ColRef),
}

/// One conjunct of a WHERE clause; predicates are AND-only
#[derive(Debug, Clone)]
pub struct Condition {
    pub lhs: ColRef,
    pub op: CompOp,
    pub rhs: Operand,
}

impl Condition {
    pub fn new(lhs: ColRef, op: CompOp, rhs: Operand) -> Self {
        Self { lhs, op, rhs }
    }

    /// Put the column resolvable in `cols` on the left, swapping the
    /// operator when the sides trade places
    pub fn normalized_for(self, cols: &[OutCol]) -> Condition {
        if find_col(cols, &self.lhs).is_ok() {
            return self;
        }
        if let Operand::Column(rhs_col) = &self.rhs {
            if find_col(cols, rhs_col).is_ok() {
                return Condition {
                    lhs: rhs_col.clone(),
                    op: self.op.swapped(),
                    rhs: Operand::Column(self.lhs),
                };
            }
        }
        self
    }

    /// Evaluate against one row; column operands resolve within `cols`
    pub fn eval_row(&self, row: &[u8], cols: &[OutCol]) -> QueryResult<bool> {
        let lhs_col = find_col(cols, &self.lhs)?;
        let lhs = decode_col(row, lhs_col)?;
        let rhs = match &self.rhs {
            Operand::Literal(value) => value.clone(),
            Operand::Column(col_ref) => decode_col(row, find_col(cols, col_ref)?)?,
        };
        Ok(self.op.matches(lhs.compare(&rhs)?))
    }
}

/// Assignment of one column in an UPDATE
#[derive(Debug, Clone)]
pub struct SetClause {
    pub column: String,
    pub value: Value,
}

/// Resolve a column reference by name (and table, when qualified)
pub fn find_col<'a>(cols: &'a [OutCol], target: &ColRef) -> QueryResult<&'a OutCol> {
    let mut matches = cols.iter().filter(|col| {
        col.name == target.column
            && target
                .table
                .as_ref()
                .map_or(true, |table| &col.table == table)
    });

    let found = matches
        .next()
        .ok_or_else(|| QueryError::ColumnNotFound(target.column.clone()))?;
    if matches.next().is_some() {
        return Err(QueryError::AmbiguousColumn(target.column.clone()));
    }
    Ok(found)
}

/// Decode one column out of a tuple
pub fn decode_col(row: &[u8], col: &OutCol) -> QueryResult<Value> {
    Ok(Value::deserialize(
        &row[col.offset..col.offset + col.len],
        col.dtype,
    )?)
}

/// Compare the same column across two tuples of one schema (sort keys,
/// merge-join sweep)
pub fn compare_at(a: &[u8], b: &[u8], col: &OutCol) -> Ordering {
    let lhs = &a[col.offset..col.offset + col.len];
    let rhs = &b[col.offset..col.offset + col.len];
    match col.dtype {
        DataType::Int | DataType::Date => {
            let l = i32::from_le_bytes([lhs[0], lhs[1], lhs[2], lhs[3]]);
            let r = i32::from_le_bytes([rhs[0], rhs[1], rhs[2], rhs[3]]);
            l.cmp(&r)
        }
        DataType::Float => {
            let l = f32::from_le_bytes([lhs[0], lhs[1], lhs[2], lhs[3]]);
            let r = f32::from_le_bytes([rhs[0], rhs[1], rhs[2], rhs[3]]);
            l.total_cmp(&r)
        }
        DataType::Char(_) => lhs.cmp(rhs),
    }
}
