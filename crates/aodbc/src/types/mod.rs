//! Value and metadata types shared by the driver interface and the async API.

pub mod catalog;
pub mod constants;
mod value;

use std::sync::Arc;

pub use catalog::{
    CatalogQuery, ColumnsQuery, ForeignKeysQuery, KeysQuery, ProceduresQuery, SpecialColumnsQuery,
    StatisticsQuery, TablesQuery,
};
pub use value::{Row, Value};

/// Converter applied to every fetched value of a registered SQL type.
///
/// Receives the raw value (`Value::Null` for NULL) and returns the value that
/// is handed to the caller.
pub type OutputConverter = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Column description from the last executed statement.
///
/// Mirrors the DB-API 7-tuple `(name, type_code, display_size, internal_size,
/// precision, scale, null_ok)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub type_code: i16,
    pub display_size: Option<u32>,
    pub internal_size: Option<u32>,
    pub precision: Option<u16>,
    pub scale: Option<i16>,
    pub nullable: bool,
}

impl ColumnDescription {
    /// Description with only name, type code and nullability known.
    #[must_use]
    pub fn new(name: impl Into<String>, type_code: i16, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_code,
            display_size: None,
            internal_size: None,
            precision: None,
            scale: None,
            nullable,
        }
    }
}
