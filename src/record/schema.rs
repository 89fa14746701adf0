use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};
use super::value::{DataType, Value};

/// Column definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub dtype: DataType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }

    pub fn size(&self) -> usize {
        self.dtype.size()
    }
}

/// Table schema; records are the fixed-width concatenation of the columns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    table_name: String,
    columns: Vec<ColumnDef>,
    record_size: usize,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        let record_size = columns.iter().map(|c| c.size()).sum();
        Self {
            table_name: table_name.into(),
            columns,
            record_size,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnDef> {
        self.columns.get(idx)
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Total record size in bytes
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Byte offset of a column within a record
    pub fn column_offset(&self, col_idx: usize) -> usize {
        self.columns[..col_idx].iter().map(|c| c.size()).sum()
    }

    /// Encode one row of values into record bytes
    pub fn encode_row(&self, values: &[Value]) -> RecordResult<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(RecordError::SchemaMismatch(format!(
                "expected {} columns, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        let mut row = Vec::with_capacity(self.record_size);
        for (value, col) in values.iter().zip(&self.columns) {
            row.extend_from_slice(&value.serialize(col.dtype)?);
        }
        Ok(row)
    }

    /// Decode record bytes back into values
    pub fn decode_row(&self, data: &[u8]) -> RecordResult<Vec<Value>> {
        if data.len() != self.record_size {
            return Err(RecordError::RecordSizeMismatch {
                expected: self.record_size,
                actual: data.len(),
            });
        }

        let mut values = Vec::with_capacity(self.columns.len());
        let mut offset = 0;
        for col in &self.columns {
            let size = col.size();
            values.push(Value::deserialize(&data[offset..offset + size], col.dtype)?);
            offset += size;
        }
        Ok(values)
    }

    /// Decode a single column out of record bytes
    pub fn decode_column(&self, data: &[u8], col_idx: usize) -> RecordResult<Value> {
        let col = &self.columns[col_idx];
        let offset = self.column_offset(col_idx);
        Value::deserialize(&data[offset..offset + col.size()], col.dtype)
    }
}
