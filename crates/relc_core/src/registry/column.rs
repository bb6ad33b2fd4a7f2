use std::collections::HashMap;
use std::fmt;

use relc_error::{DbError, Result};

use crate::types::column::ColumnType;
use crate::types::datatype::DataType;

/// Stable identity of a column within a compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Introduces a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnDef(pub ColumnId);

/// Names an existing column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef(pub ColumnId);

impl ColumnDef {
    pub const fn id(&self) -> ColumnId {
        self.0
    }

    pub const fn reference(&self) -> ColumnRef {
        ColumnRef(self.0)
    }
}

impl ColumnRef {
    pub const fn id(&self) -> ColumnId {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub scope: String,
    pub name: String,
    pub column_type: ColumnType,
}

/// Registry of every column created during a compilation.
///
/// Columns are never removed. Types may be updated when a rewrite changes the
/// type of the state a column references.
#[derive(Debug, Default)]
pub struct ColumnManager {
    columns: Vec<Column>,
    by_name: HashMap<(String, String), ColumnId>,
    scope_counts: HashMap<String, usize>,
}

impl ColumnManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new column definition.
    ///
    /// Errors if the name is already taken within the scope.
    pub fn create_def(
        &mut self,
        scope: &str,
        name: &str,
        column_type: impl Into<ColumnType>,
    ) -> Result<ColumnDef> {
        let key = (scope.to_string(), name.to_string());
        if self.by_name.contains_key(&key) {
            return Err(DbError::new("Duplicate column name in scope")
                .with_field("scope", scope)
                .with_field("name", name));
        }

        let id = ColumnId(self.columns.len() as u32);
        self.columns.push(Column {
            scope: scope.to_string(),
            name: name.to_string(),
            column_type: column_type.into(),
        });
        self.by_name.insert(key, id);

        Ok(ColumnDef(id))
    }

    pub fn create_ref(&self, def: ColumnDef) -> ColumnRef {
        def.reference()
    }

    /// Resolve a column by its (scope, name) pair.
    pub fn lookup(&self, scope: &str, name: &str) -> Option<ColumnRef> {
        self.by_name
            .get(&(scope.to_string(), name.to_string()))
            .map(|id| ColumnRef(*id))
    }

    /// Get a scope name based on `prefix` that hasn't been handed out yet.
    pub fn unique_scope(&mut self, prefix: &str) -> String {
        loop {
            let count = self.scope_counts.entry(prefix.to_string()).or_insert(0);
            let scope = if *count == 0 {
                prefix.to_string()
            } else {
                format!("{prefix}{count}")
            };
            *count += 1;

            let taken = self.columns.iter().any(|c| c.scope == scope);
            if !taken {
                return scope;
            }
        }
    }

    pub fn get(&self, id: ColumnId) -> Result<&Column> {
        self.columns
            .get(id.0 as usize)
            .ok_or_else(|| DbError::new(format!("Unknown column: {id}")))
    }

    pub fn column_type(&self, id: ColumnId) -> Result<&ColumnType> {
        Ok(&self.get(id)?.column_type)
    }

    /// Get the scalar type for a column, erroring if the column holds a
    /// reference.
    pub fn datatype(&self, id: ColumnId) -> Result<DataType> {
        let col = self.get(id)?;
        col.column_type.try_as_scalar().ok_or_else(|| {
            DbError::new("Expected scalar column")
                .with_field("column", format!("{}.{}", col.scope, col.name))
                .with_field("type", &col.column_type)
        })
    }

    pub fn set_column_type(&mut self, id: ColumnId, column_type: ColumnType) -> Result<()> {
        let col = self
            .columns
            .get_mut(id.0 as usize)
            .ok_or_else(|| DbError::new(format!("Unknown column: {id}")))?;
        col.column_type = column_type;
        Ok(())
    }

    /// Fully qualified display name for a column.
    pub fn display_name(&self, id: ColumnId) -> String {
        match self.get(id) {
            Ok(col) => format!("{}.{}", col.scope, col.name),
            Err(_) => id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup() {
        let mut columns = ColumnManager::new();
        let def = columns.create_def("t", "a", DataType::int64()).unwrap();
        assert_eq!(Some(def.reference()), columns.lookup("t", "a"));
        assert_eq!(None, columns.lookup("t", "b"));
        assert_eq!(DataType::int64(), columns.datatype(def.id()).unwrap());
        assert_eq!("t.a", columns.display_name(def.id()));
    }

    #[test]
    fn duplicate_name_in_scope() {
        let mut columns = ColumnManager::new();
        columns.create_def("t", "a", DataType::int64()).unwrap();
        columns.create_def("u", "a", DataType::int64()).unwrap();
        assert!(columns.create_def("t", "a", DataType::bool()).is_err());
    }

    #[test]
    fn unique_scopes() {
        let mut columns = ColumnManager::new();
        assert_eq!("map", columns.unique_scope("map"));
        assert_eq!("map1", columns.unique_scope("map"));
        columns.create_def("sort2", "x", DataType::bool()).unwrap();
        assert_eq!("sort", columns.unique_scope("sort"));
        assert_eq!("sort1", columns.unique_scope("sort"));
        // Skips the scope already used by a column.
        assert_eq!("sort3", columns.unique_scope("sort"));
    }
}
