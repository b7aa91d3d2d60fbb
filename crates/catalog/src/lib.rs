use ahash::RandomState;
use common::{DbError, DbResult, Row};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use types::SqlType;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Column definition with its position in the table's row layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: SqlType,
    pub ordinal: usize,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: SqlType, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            ordinal,
        }
    }
}

/// Index metadata recorded by `CREATE [UNIQUE] INDEX`. Index structures are
/// maintained elsewhere; the catalog only remembers the definitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<usize>,
    pub unique: bool,
}

/// A table: schema, index definitions, the in-memory row heap, and the
/// row-count statistic refreshed by ANALYZE.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    pub heap: Vec<Row>,
    pub row_count_stat: Option<usize>,
    #[serde(skip)]
    #[serde(default = "Map::default")]
    column_index: Map<String, usize>,
}

impl TableDef {
    fn new(name: String, columns: Vec<ColumnDef>) -> Self {
        let mut table = Self {
            name,
            columns,
            indexes: Vec::new(),
            heap: Vec::new(),
            row_count_stat: None,
            column_index: Map::default(),
        };
        table.rebuild_index();
        table
    }

    fn rebuild_index(&mut self) {
        self.column_index = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.column_index.get(name).map(|&i| &self.columns[i])
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Estimated cardinality: the ANALYZE statistic when present, otherwise
    /// the live heap size.
    pub fn estimated_rows(&self) -> usize {
        self.row_count_stat.unwrap_or(self.heap.len())
    }
}

/// Process-wide catalog of tables, mutated only by DDL and INSERT.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    tables: Vec<TableDef>,
    name_index: Map<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_table(&self, name: &str) -> Option<&TableDef> {
        self.name_index.get(name).map(|&i| &self.tables[i])
    }

    pub fn table(&self, name: &str) -> DbResult<&TableDef> {
        self.try_table(name)
            .ok_or_else(|| DbError::UnknownTable(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> DbResult<&mut TableDef> {
        let idx = *self
            .name_index
            .get(name)
            .ok_or_else(|| DbError::UnknownTable(name.to_string()))?;
        Ok(&mut self.tables[idx])
    }

    pub fn column(&self, table: &str, column: &str) -> DbResult<&ColumnDef> {
        self.table(table)?
            .column(column)
            .ok_or_else(|| DbError::UnknownColumn(format!("{table}.{column}")))
    }

    /// Create a table. Column ordinals are assigned 0..N-1 in declaration
    /// order; duplicate column names are rejected.
    pub fn create(&mut self, name: &str, columns: Vec<(String, SqlType)>) -> DbResult<()> {
        if self.name_index.contains_key(name) {
            return Err(DbError::Catalog(format!("table '{name}' already exists")));
        }
        if columns.is_empty() {
            return Err(DbError::Catalog(format!("table '{name}' has no columns")));
        }
        let mut defs = Vec::with_capacity(columns.len());
        for (ordinal, (col_name, ty)) in columns.into_iter().enumerate() {
            if defs.iter().any(|c: &ColumnDef| c.name == col_name) {
                return Err(DbError::Catalog(format!(
                    "duplicate column '{col_name}' on table '{name}'"
                )));
            }
            defs.push(ColumnDef::new(col_name, ty, ordinal));
        }
        self.name_index.insert(name.to_string(), self.tables.len());
        self.tables.push(TableDef::new(name.to_string(), defs));
        Ok(())
    }

    pub fn drop(&mut self, name: &str) -> DbResult<()> {
        let idx = *self
            .name_index
            .get(name)
            .ok_or_else(|| DbError::UnknownTable(name.to_string()))?;
        self.tables.remove(idx);
        self.name_index.clear();
        for (i, t) in self.tables.iter().enumerate() {
            self.name_index.insert(t.name.clone(), i);
        }
        Ok(())
    }

    /// Record an index definition over named columns.
    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        columns: &[String],
        unique: bool,
    ) -> DbResult<()> {
        if columns.is_empty() {
            return Err(DbError::Catalog(
                "index must reference at least one column".into(),
            ));
        }
        let table = self.table(table_name)?;
        let mut resolved = Vec::with_capacity(columns.len());
        for name in columns {
            let col = table
                .column(name)
                .ok_or_else(|| DbError::UnknownColumn(format!("{table_name}.{name}")))?;
            resolved.push(col.ordinal);
        }
        let table = self.table_mut(table_name)?;
        if table.indexes.iter().any(|i| i.name == index_name) {
            return Err(DbError::Catalog(format!(
                "index '{index_name}' already exists on '{table_name}'"
            )));
        }
        table.indexes.push(IndexDef {
            name: index_name.to_string(),
            columns: resolved,
            unique,
        });
        Ok(())
    }

    /// Append a row after checking its arity against the schema.
    pub fn insert_row(&mut self, table_name: &str, row: Row) -> DbResult<()> {
        let table = self.table_mut(table_name)?;
        if row.len() != table.arity() {
            return Err(DbError::Catalog(format!(
                "row width {} does not match table '{}' width {}",
                row.len(),
                table_name,
                table.arity()
            )));
        }
        table.heap.push(row);
        Ok(())
    }

    /// ANALYZE: refresh the row-count statistic from the heap.
    pub fn analyze(&mut self, table_name: &str) -> DbResult<usize> {
        let table = self.table_mut(table_name)?;
        let n = table.heap.len();
        table.row_count_stat = Some(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Value;

    fn two_col_table(catalog: &mut Catalog, name: &str) {
        catalog
            .create(
                name,
                vec![("id".into(), SqlType::Int), ("name".into(), SqlType::Char(16))],
            )
            .unwrap();
    }

    #[test]
    fn ordinals_are_declaration_order() {
        let mut catalog = Catalog::new();
        two_col_table(&mut catalog, "users");
        let t = catalog.table("users").unwrap();
        assert_eq!(t.column("id").unwrap().ordinal, 0);
        assert_eq!(t.column("name").unwrap().ordinal, 1);
        // 0..N-1 permutation
        let mut ords: Vec<_> = t.columns().iter().map(|c| c.ordinal).collect();
        ords.sort_unstable();
        assert_eq!(ords, vec![0, 1]);
    }

    #[test]
    fn duplicate_tables_and_columns_are_rejected() {
        let mut catalog = Catalog::new();
        two_col_table(&mut catalog, "users");
        assert!(catalog.create("users", vec![("x".into(), SqlType::Int)]).is_err());
        assert!(catalog
            .create(
                "bad",
                vec![("x".into(), SqlType::Int), ("x".into(), SqlType::Int)]
            )
            .is_err());
    }

    #[test]
    fn unknown_lookups_surface_typed_errors() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.table("nope"),
            Err(DbError::UnknownTable(_))
        ));
        let mut catalog = Catalog::new();
        two_col_table(&mut catalog, "users");
        assert!(matches!(
            catalog.column("users", "ghost"),
            Err(DbError::UnknownColumn(_))
        ));
    }

    #[test]
    fn insert_checks_row_width() {
        let mut catalog = Catalog::new();
        two_col_table(&mut catalog, "users");
        assert!(catalog
            .insert_row("users", Row::new(vec![Value::Int(1)]))
            .is_err());
        catalog
            .insert_row(
                "users",
                Row::new(vec![Value::Int(1), Value::Str("ada".into())]),
            )
            .unwrap();
        assert_eq!(catalog.table("users").unwrap().heap.len(), 1);
    }

    #[test]
    fn analyze_records_row_count() {
        let mut catalog = Catalog::new();
        two_col_table(&mut catalog, "users");
        catalog
            .insert_row(
                "users",
                Row::new(vec![Value::Int(1), Value::Str("ada".into())]),
            )
            .unwrap();
        assert_eq!(catalog.analyze("users").unwrap(), 1);
        assert_eq!(catalog.table("users").unwrap().estimated_rows(), 1);
    }

    #[test]
    fn index_definitions_resolve_columns() {
        let mut catalog = Catalog::new();
        two_col_table(&mut catalog, "users");
        catalog
            .create_index("users", "users_id", &["id".into()], true)
            .unwrap();
        let t = catalog.table("users").unwrap();
        assert_eq!(t.indexes.len(), 1);
        assert_eq!(t.indexes[0].columns, vec![0]);
        assert!(t.indexes[0].unique);
        // duplicate index name
        assert!(catalog
            .create_index("users", "users_id", &["name".into()], false)
            .is_err());
    }

    #[test]
    fn drop_reindexes_remaining_tables() {
        let mut catalog = Catalog::new();
        two_col_table(&mut catalog, "a");
        two_col_table(&mut catalog, "b");
        catalog.drop("a").unwrap();
        assert!(catalog.try_table("a").is_none());
        assert!(catalog.table("b").is_ok());
    }
}
