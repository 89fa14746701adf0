use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::record::TableSchema;

/// Name of the catalog meta-file inside a database directory
pub const META_FILE: &str = "__meta";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Column {0} not found")]
    ColumnNotFound(String),

    #[error("Column {0} is ambiguous")]
    AmbiguousColumn(String),

    #[error("Index {0} not found")]
    IndexNotFound(String),

    #[error("Index {0} already exists")]
    IndexExists(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Metadata of one index over a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub table: String,
    /// Indexed column names, in key order
    pub columns: Vec<String>,
}

impl IndexMeta {
    /// Canonical index name: `<table>_<col1>_<col2>...`
    pub fn index_name(table: &str, columns: &[String]) -> String {
        let mut name = table.to_string();
        for col in columns {
            name.push('_');
            name.push_str(col);
        }
        name
    }
}

/// Metadata of one table: its schema plus its indexes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub schema: TableSchema,
    pub indexes: Vec<IndexMeta>,
}

/// In-memory catalog, serialized to the `__meta` JSON file in the
/// database directory
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: HashMap<String, TableMeta>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table(&self, name: &str) -> CatalogResult<&TableMeta> {
        self.tables
            .get(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    pub fn add_table(&mut self, schema: TableSchema) -> CatalogResult<()> {
        let name = schema.table_name().to_string();
        if self.tables.contains_key(&name) {
            return Err(CatalogError::TableExists(name));
        }
        self.tables.insert(
            name,
            TableMeta {
                schema,
                indexes: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn remove_table(&mut self, name: &str) -> CatalogResult<TableMeta> {
        self.tables
            .remove(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    pub fn add_index(&mut self, table: &str, columns: Vec<String>) -> CatalogResult<IndexMeta> {
        let meta = self
            .tables
            .get_mut(table)
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;

        for col in &columns {
            if meta.schema.find_column(col).is_none() {
                return Err(CatalogError::ColumnNotFound(col.clone()));
            }
        }

        let name = IndexMeta::index_name(table, &columns);
        if meta.indexes.iter().any(|ix| ix.name == name) {
            return Err(CatalogError::IndexExists(name));
        }

        let index = IndexMeta {
            name,
            table: table.to_string(),
            columns,
        };
        meta.indexes.push(index.clone());
        Ok(index)
    }

    pub fn remove_index(&mut self, table: &str, columns: &[String]) -> CatalogResult<IndexMeta> {
        let meta = self
            .tables
            .get_mut(table)
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;

        let name = IndexMeta::index_name(table, columns);
        let pos = meta
            .indexes
            .iter()
            .position(|ix| ix.name == name)
            .ok_or_else(|| CatalogError::IndexNotFound(name))?;
        Ok(meta.indexes.remove(pos))
    }

    /// Write the catalog to `<dir>/__meta`
    pub fn save(&self, dir: &Path) -> CatalogResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(META_FILE), json)?;
        Ok(())
    }

    /// Load the catalog from `<dir>/__meta`, or start empty if absent
    pub fn load(dir: &Path) -> CatalogResult<Self> {
        let path = dir.join(META_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
