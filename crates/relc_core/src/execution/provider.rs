use std::collections::HashMap;
use std::fmt::Debug;

use indexmap::IndexMap;
use relc_error::{DbError, Result};

use crate::lowering::raw::RawScalar;
use crate::lowering::scalar::constant::encode_value;
use crate::relalg::description::TableDescription;
use crate::types::datatype::DataType;

/// Source of rows for external tables.
pub trait TableProvider: Debug {
    /// Read every row of `table`, producing the requested columns in order.
    ///
    /// Errors if a column is missing or has a different type than requested.
    fn scan(&self, table: &str, columns: &[(String, DataType)]) -> Result<Vec<Vec<RawScalar>>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<(String, DataType)>,
    pub rows: Vec<Vec<RawScalar>>,
}

/// Tables held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableProvider {
    tables: HashMap<String, MemoryTable>,
}

impl MemoryTableProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider from the tables of a query description, encoding
    /// each literal according to its column type.
    pub fn from_descriptions(tables: &IndexMap<String, TableDescription>) -> Result<Self> {
        let mut provider = Self::new();
        for (name, table) in tables {
            let columns: Vec<_> = table
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.datatype))
                .collect();

            let mut rows = Vec::with_capacity(table.rows.len());
            for (row_idx, row) in table.rows.iter().enumerate() {
                if row.len() != columns.len() {
                    return Err(DbError::new("Row has wrong number of values")
                        .with_field("table", name)
                        .with_field("row", row_idx)
                        .with_field("expected", columns.len())
                        .with_field("got", row.len()));
                }
                let encoded = row
                    .iter()
                    .zip(&columns)
                    .map(|(value, (_, datatype))| encode_value(value.as_ref(), datatype))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| e.with_field("table", name).with_field("row", row_idx))?;
                rows.push(encoded);
            }

            provider.insert_table(name.clone(), columns, rows)?;
        }
        Ok(provider)
    }

    pub fn insert_table(
        &mut self,
        name: impl Into<String>,
        columns: Vec<(String, DataType)>,
        rows: Vec<Vec<RawScalar>>,
    ) -> Result<()> {
        let name = name.into();
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(DbError::new("Row has wrong number of values")
                .with_field("table", &name)
                .with_field("expected", columns.len())
                .with_field("got", row.len()));
        }
        if self.tables.contains_key(&name) {
            return Err(DbError::new(format!("Duplicate table '{name}'")));
        }
        self.tables.insert(name, MemoryTable { columns, rows });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }
}

impl TableProvider for MemoryTableProvider {
    fn scan(&self, table: &str, columns: &[(String, DataType)]) -> Result<Vec<Vec<RawScalar>>> {
        let source = self
            .tables
            .get(table)
            .ok_or_else(|| DbError::new(format!("Missing table '{table}'")))?;

        let mut indices = Vec::with_capacity(columns.len());
        for (name, datatype) in columns {
            let idx = source
                .columns
                .iter()
                .position(|(n, _)| n == name)
                .ok_or_else(|| {
                    DbError::new(format!("Missing column '{name}'")).with_field("table", table)
                })?;
            let actual = source.columns[idx].1;
            if actual != *datatype {
                return Err(DbError::new("Column type mismatch")
                    .with_field("table", table)
                    .with_field("column", name)
                    .with_field("expected", datatype)
                    .with_field("got", actual));
            }
            indices.push(idx);
        }

        Ok(source
            .rows
            .iter()
            .map(|row| indices.iter().map(|idx| row[*idx].clone()).collect())
            .collect())
    }
}
