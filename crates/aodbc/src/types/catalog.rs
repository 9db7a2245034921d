//! Catalog (metadata discovery) requests.
//!
//! Each query struct carries the optional search arguments of the matching
//! ODBC catalog function; `None` means "no filter".

/// Arguments for `SQLTables`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablesQuery {
    pub table: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    /// One of `TABLE`, `VIEW`, `SYSTEM TABLE`, ...
    pub table_type: Option<String>,
}

/// Arguments for `SQLColumns`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnsQuery {
    pub table: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub column: Option<String>,
}

/// Arguments for `SQLStatistics`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsQuery {
    pub table: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    /// Only report unique indexes.
    pub unique: bool,
    /// Only report cardinality/pages when readily available.
    pub quick: bool,
}

impl StatisticsQuery {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            catalog: None,
            schema: None,
            unique: false,
            quick: true,
        }
    }
}

/// Arguments for `SQLSpecialColumns` (row id and row version columns).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialColumnsQuery {
    pub table: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub nullable: bool,
}

impl SpecialColumnsQuery {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            catalog: None,
            schema: None,
            nullable: true,
        }
    }
}

/// Arguments for `SQLPrimaryKeys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysQuery {
    pub table: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
}

impl KeysQuery {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            catalog: None,
            schema: None,
        }
    }
}

/// Arguments for `SQLForeignKeys`.
///
/// `table` names the referenced (primary key) table, `foreign_table` the
/// referencing one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignKeysQuery {
    pub table: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub foreign_table: Option<String>,
    pub foreign_catalog: Option<String>,
    pub foreign_schema: Option<String>,
}

/// Arguments for `SQLProcedures` and `SQLProcedureColumns`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProceduresQuery {
    pub procedure: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
}

/// A catalog function call forwarded to the native cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogQuery {
    Tables(TablesQuery),
    Columns(ColumnsQuery),
    Statistics(StatisticsQuery),
    RowIdColumns(SpecialColumnsQuery),
    RowVerColumns(SpecialColumnsQuery),
    PrimaryKeys(KeysQuery),
    ForeignKeys(ForeignKeysQuery),
    TypeInfo(Option<i16>),
    Procedures(ProceduresQuery),
    ProcedureColumns(ProceduresQuery),
}

impl CatalogQuery {
    /// ODBC function name, for diagnostics.
    #[must_use]
    pub const fn function_name(&self) -> &'static str {
        match self {
            Self::Tables(_) => "SQLTables",
            Self::Columns(_) => "SQLColumns",
            Self::Statistics(_) => "SQLStatistics",
            Self::RowIdColumns(_) | Self::RowVerColumns(_) => "SQLSpecialColumns",
            Self::PrimaryKeys(_) => "SQLPrimaryKeys",
            Self::ForeignKeys(_) => "SQLForeignKeys",
            Self::TypeInfo(_) => "SQLGetTypeInfo",
            Self::Procedures(_) => "SQLProcedures",
            Self::ProcedureColumns(_) => "SQLProcedureColumns",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let q = StatisticsQuery::new("T");
        assert!(!q.unique);
        assert!(q.quick);

        let q = SpecialColumnsQuery::new("T");
        assert!(q.nullable);

        let q = TablesQuery::default();
        assert!(q.table.is_none() && q.table_type.is_none());
    }

    #[test]
    fn test_function_name() {
        assert_eq!(
            CatalogQuery::Tables(TablesQuery::default()).function_name(),
            "SQLTables"
        );
        assert_eq!(
            CatalogQuery::RowVerColumns(SpecialColumnsQuery::new("T")).function_name(),
            "SQLSpecialColumns"
        );
        assert_eq!(CatalogQuery::TypeInfo(None).function_name(), "SQLGetTypeInfo");
    }
}
