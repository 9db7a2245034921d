//! SQLite backend over `rusqlite`.
//!
//! Connection strings name the database file with `Database=<path>` (or a
//! registered data source with `DSN=<name>`); `Mode=ro|rw|rwc` picks the open
//! flags. Manual-commit mode is emulated by opening a transaction before the
//! first writing statement, the way ODBC drivers do for engines without a
//! session-level autocommit switch.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{ErrorCode, OpenFlags, ToSql};

use super::{ConnectParams, Driver, DriverResult, NativeConnection, NativeCursor};
use crate::dsn::ConnectionString;
use crate::error::DriverError;
use crate::types::constants::{attr, info, sql_type};
use crate::types::{
    CatalogQuery, ColumnDescription, ColumnsQuery, ForeignKeysQuery, KeysQuery, OutputConverter,
    Row, SpecialColumnsQuery, StatisticsQuery, TablesQuery, Value,
};

const DRIVER_NAME: &str = "aodbc-sqlite";

/// Map a SQLite result code to a driver error with a SQLSTATE.
fn map_result_code(code: ErrorCode, message: String) -> DriverError {
    match code {
        ErrorCode::ConstraintViolation => DriverError::integrity(message).with_sqlstate("23000"),
        ErrorCode::TypeMismatch | ErrorCode::TooBig => {
            DriverError::data(message).with_sqlstate("22000")
        }
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
            DriverError::operational(message).with_sqlstate("HYT00")
        }
        ErrorCode::SystemIoFailure => DriverError::operational(message).with_sqlstate("08S01"),
        ErrorCode::CannotOpen => DriverError::operational(message).with_sqlstate("08001"),
        ErrorCode::ReadOnly => DriverError::operational(message).with_sqlstate("25006"),
        ErrorCode::OperationInterrupted => {
            DriverError::operational(message).with_sqlstate("HY008")
        }
        ErrorCode::OutOfMemory => DriverError::operational(message).with_sqlstate("HY001"),
        ErrorCode::ApiMisuse => DriverError::programming(message).with_sqlstate("HY010"),
        ErrorCode::Unknown
        | ErrorCode::PermissionDenied
        | ErrorCode::AuthorizationForStatementDenied => {
            DriverError::programming(message).with_sqlstate("42000")
        }
        _ => DriverError::operational(message).with_sqlstate("HY000"),
    }
}

/// Map a `rusqlite` error to a driver error with a SQLSTATE.
fn map_error(err: &rusqlite::Error) -> DriverError {
    use rusqlite::Error as E;

    match err {
        E::SqliteFailure(ffi_err, msg) => {
            let message = msg.clone().unwrap_or_else(|| ffi_err.to_string());
            map_result_code(ffi_err.code, message)
        }
        // Prepare-time failures: syntax errors and unknown tables or columns.
        E::SqlInputError { error, msg, .. } => map_result_code(error.code, msg.clone()),
        E::InvalidParameterCount(given, expected) => DriverError::programming(format!(
            "The SQL contains {expected} parameter markers, but {given} parameters were supplied"
        ))
        .with_sqlstate("07002"),
        E::InvalidColumnType(..)
        | E::FromSqlConversionFailure(..)
        | E::IntegralValueOutOfRange(..)
        | E::Utf8Error(..)
        | E::NulError(..) => DriverError::data(err.to_string()).with_sqlstate("22018"),
        E::InvalidQuery
        | E::MultipleStatement
        | E::ExecuteReturnedResults
        | E::InvalidParameterName(..) => {
            DriverError::programming(err.to_string()).with_sqlstate("42000")
        }
        _ => DriverError::internal(err.to_string()).with_sqlstate("HY000"),
    }
}

/// Any failure while opening a session is a client unable to establish it.
fn map_connect_error(err: &rusqlite::Error) -> DriverError {
    DriverError::operational(map_error(err).message()).with_sqlstate("08001")
}

/// SQL type code for a declared column type, following SQLite affinity rules.
fn type_code_for(decl_type: Option<&str>) -> i16 {
    let Some(decl) = decl_type.filter(|d| !d.is_empty()) else {
        return sql_type::UNKNOWN;
    };
    let decl = decl.to_ascii_uppercase();
    if decl.contains("BIGINT") {
        sql_type::BIGINT
    } else if decl.contains("INT") {
        sql_type::INTEGER
    } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
        sql_type::VARCHAR
    } else if decl.contains("BLOB") {
        sql_type::VARBINARY
    } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
        sql_type::DOUBLE
    } else {
        sql_type::NUMERIC
    }
}

/// SQL type code of a value whose column has no declared type.
const fn runtime_type_code(value: &Value) -> i16 {
    match value {
        Value::Null => sql_type::UNKNOWN,
        Value::Integer(_) => sql_type::BIGINT,
        Value::Real(_) => sql_type::DOUBLE,
        Value::Text(_) => sql_type::VARCHAR,
        Value::Blob(_) => sql_type::VARBINARY,
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Self::Null => ValueRef::Null,
            Self::Integer(v) => ValueRef::Integer(*v),
            Self::Real(v) => ValueRef::Real(*v),
            Self::Text(s) => ValueRef::Text(s.as_bytes()),
            Self::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

fn open_flags(mode: Option<&str>) -> DriverResult<OpenFlags> {
    let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    match mode.map(str::to_ascii_lowercase).as_deref() {
        None | Some("rwc") => Ok(base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE),
        Some("rw") => Ok(base | OpenFlags::SQLITE_OPEN_READ_WRITE),
        Some("ro") => Ok(base | OpenFlags::SQLITE_OPEN_READ_ONLY),
        Some(other) => Err(DriverError::interface(format!("invalid Mode attribute: {other:?}"))
            .with_sqlstate("HY024")),
    }
}

/// SQLite driver.
///
/// Besides plain `Database=<path>` strings, named data sources can be
/// registered with [`SqliteDriver::with_data_source`] and selected with
/// `DSN=<name>`.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    sources: BTreeMap<String, PathBuf>,
}

impl SqliteDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named data source.
    #[must_use]
    pub fn with_data_source(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.sources.insert(name.into(), path.into());
        self
    }

    fn resolve(&self, conn_str: &ConnectionString) -> DriverResult<(String, String)> {
        if let Some(database) = conn_str.get("Database") {
            let dsn = conn_str.get("DSN").unwrap_or_default().to_string();
            return Ok((dsn, database.to_string()));
        }
        if let Some(name) = conn_str.get("DSN") {
            if let Some((key, path)) = self
                .sources
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
            {
                return Ok((key.clone(), path.to_string_lossy().into_owned()));
            }
        }
        Err(DriverError::interface(
            "Data source name not found and no default driver specified",
        )
        .with_sqlstate("IM002"))
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "SQLite"
    }

    fn connect(
        &self,
        conn_str: &ConnectionString,
        params: &ConnectParams,
    ) -> DriverResult<Box<dyn NativeConnection>> {
        let (dsn, database) = self.resolve(conn_str)?;
        let flags = open_flags(conn_str.get("Mode"))?;
        let conn = rusqlite::Connection::open_with_flags(&database, flags)
            .map_err(|e| map_connect_error(&e))?;
        if params.timeout > 0 {
            conn.busy_timeout(Duration::from_secs(params.timeout.into()))
                .map_err(|e| map_connect_error(&e))?;
        }
        tracing::debug!(database = %database, autocommit = params.autocommit, "sqlite session opened");

        Ok(Box::new(SqliteConnection {
            session: Arc::new(Mutex::new(Session {
                conn: Some(conn),
                autocommit: params.autocommit,
                timeout: params.timeout,
                dsn,
                database,
                converters: HashMap::new(),
            })),
        }))
    }

    fn data_sources(&self) -> DriverResult<BTreeMap<String, String>> {
        Ok(self
            .sources
            .iter()
            .map(|(name, path)| (name.clone(), format!("SQLite database at {}", path.display())))
            .collect())
    }
}

struct Session {
    conn: Option<rusqlite::Connection>,
    autocommit: bool,
    timeout: u32,
    dsn: String,
    database: String,
    converters: HashMap<i16, OutputConverter>,
}

impl Session {
    fn conn(&self) -> DriverResult<&rusqlite::Connection> {
        self.conn.as_ref().ok_or_else(|| {
            DriverError::programming("Attempt to use a closed connection.").with_sqlstate("08003")
        })
    }

    fn commit(&self) -> DriverResult<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT").map_err(|e| map_error(&e))?;
        }
        Ok(())
    }

    fn rollback(&self) -> DriverResult<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK").map_err(|e| map_error(&e))?;
        }
        Ok(())
    }
}

type SharedSession = Arc<Mutex<Session>>;

/// Open a transaction before a writing statement in manual-commit mode.
fn begin_if_needed(conn: &rusqlite::Connection, autocommit: bool, readonly: bool) -> DriverResult<()> {
    if !autocommit && !readonly && conn.is_autocommit() {
        conn.execute_batch("BEGIN").map_err(|e| map_error(&e))?;
    }
    Ok(())
}

fn collect<T, F>(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[&dyn ToSql],
    f: F,
) -> DriverResult<Vec<T>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql).map_err(|e| map_error(&e))?;
    let rows = stmt.query_map(params, f).map_err(|e| map_error(&e))?;
    let collected = rows.collect::<rusqlite::Result<Vec<T>>>();
    collected.map_err(|e| map_error(&e))
}

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, text)
}

/// A native SQLite session.
struct SqliteConnection {
    session: SharedSession,
}

impl NativeConnection for SqliteConnection {
    fn cursor(&mut self) -> DriverResult<Box<dyn NativeCursor>> {
        self.session.lock().conn()?;
        Ok(Box::new(SqliteCursor::new(Arc::clone(&self.session))))
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.session.lock().commit()
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.session.lock().rollback()
    }

    fn close(&mut self) -> DriverResult<()> {
        let mut session = self.session.lock();
        let Some(conn) = session.conn.take() else {
            return Ok(());
        };
        if !conn.is_autocommit() {
            let _ = conn.execute_batch("ROLLBACK");
        }
        match conn.close() {
            Ok(()) => {
                tracing::debug!(database = %session.database, "sqlite session closed");
                Ok(())
            }
            Err((conn, err)) => {
                session.conn = Some(conn);
                Err(map_error(&err))
            }
        }
    }

    fn autocommit(&self) -> bool {
        self.session.lock().autocommit
    }

    fn set_autocommit(&mut self, autocommit: bool) -> DriverResult<()> {
        let mut session = self.session.lock();
        if autocommit && !session.autocommit {
            // Switching autocommit on ends the pending transaction.
            session.commit()?;
        }
        session.conn()?;
        session.autocommit = autocommit;
        Ok(())
    }

    fn timeout(&self) -> u32 {
        self.session.lock().timeout
    }

    fn getinfo(&self, info_type: u16) -> DriverResult<Value> {
        let session = self.session.lock();
        session.conn()?;
        match info_type {
            info::DBMS_NAME => Ok(text("SQLite")),
            info::DBMS_VER => Ok(text(rusqlite::version())),
            info::DRIVER_NAME => Ok(text(DRIVER_NAME)),
            info::DRIVER_VER => Ok(text(env!("CARGO_PKG_VERSION"))),
            info::DATABASE_NAME => Ok(text(session.database.as_str())),
            info::DATA_SOURCE_NAME => Ok(text(session.dsn.as_str())),
            other => Err(DriverError::not_supported(format!(
                "information type {other} is not supported"
            ))
            .with_sqlstate("HY096")),
        }
    }

    fn add_output_converter(&mut self, sql_type: i16, converter: OutputConverter) -> DriverResult<()> {
        self.session.lock().converters.insert(sql_type, converter);
        Ok(())
    }

    fn clear_output_converters(&mut self) -> DriverResult<()> {
        self.session.lock().converters.clear();
        Ok(())
    }

    fn set_attr(&mut self, attr_id: i32, value: i64) -> DriverResult<()> {
        match attr_id {
            attr::AUTOCOMMIT => self.set_autocommit(value != 0),
            attr::LOGIN_TIMEOUT | attr::CONNECTION_TIMEOUT => {
                let mut session = self.session.lock();
                let secs = u32::try_from(value.max(0)).unwrap_or(u32::MAX);
                session
                    .conn()?
                    .busy_timeout(Duration::from_secs(secs.into()))
                    .map_err(|e| map_error(&e))?;
                session.timeout = secs;
                Ok(())
            }
            other => Err(DriverError::not_supported(format!(
                "connection attribute {other} is not supported"
            ))
            .with_sqlstate("HYC00")),
        }
    }
}

/// Result-set columns of the catalog functions.
mod catalog_columns {
    use crate::types::constants::sql_type::{INTEGER, VARCHAR};

    pub const TABLES: &[(&str, i16)] = &[
        ("TABLE_CAT", VARCHAR),
        ("TABLE_SCHEM", VARCHAR),
        ("TABLE_NAME", VARCHAR),
        ("TABLE_TYPE", VARCHAR),
        ("REMARKS", VARCHAR),
    ];

    pub const COLUMNS: &[(&str, i16)] = &[
        ("TABLE_CAT", VARCHAR),
        ("TABLE_SCHEM", VARCHAR),
        ("TABLE_NAME", VARCHAR),
        ("COLUMN_NAME", VARCHAR),
        ("DATA_TYPE", INTEGER),
        ("TYPE_NAME", VARCHAR),
        ("COLUMN_SIZE", INTEGER),
        ("BUFFER_LENGTH", INTEGER),
        ("DECIMAL_DIGITS", INTEGER),
        ("NUM_PREC_RADIX", INTEGER),
        ("NULLABLE", INTEGER),
        ("REMARKS", VARCHAR),
        ("COLUMN_DEF", VARCHAR),
        ("SQL_DATA_TYPE", INTEGER),
        ("SQL_DATETIME_SUB", INTEGER),
        ("CHAR_OCTET_LENGTH", INTEGER),
        ("ORDINAL_POSITION", INTEGER),
        ("IS_NULLABLE", VARCHAR),
    ];

    pub const STATISTICS: &[(&str, i16)] = &[
        ("TABLE_CAT", VARCHAR),
        ("TABLE_SCHEM", VARCHAR),
        ("TABLE_NAME", VARCHAR),
        ("NON_UNIQUE", INTEGER),
        ("INDEX_QUALIFIER", VARCHAR),
        ("INDEX_NAME", VARCHAR),
        ("TYPE", INTEGER),
        ("ORDINAL_POSITION", INTEGER),
        ("COLUMN_NAME", VARCHAR),
        ("ASC_OR_DESC", VARCHAR),
        ("CARDINALITY", INTEGER),
        ("PAGES", INTEGER),
        ("FILTER_CONDITION", VARCHAR),
    ];

    pub const SPECIAL_COLUMNS: &[(&str, i16)] = &[
        ("SCOPE", INTEGER),
        ("COLUMN_NAME", VARCHAR),
        ("DATA_TYPE", INTEGER),
        ("TYPE_NAME", VARCHAR),
        ("COLUMN_SIZE", INTEGER),
        ("BUFFER_LENGTH", INTEGER),
        ("DECIMAL_DIGITS", INTEGER),
        ("PSEUDO_COLUMN", INTEGER),
    ];

    pub const PRIMARY_KEYS: &[(&str, i16)] = &[
        ("TABLE_CAT", VARCHAR),
        ("TABLE_SCHEM", VARCHAR),
        ("TABLE_NAME", VARCHAR),
        ("COLUMN_NAME", VARCHAR),
        ("KEY_SEQ", INTEGER),
        ("PK_NAME", VARCHAR),
    ];

    pub const FOREIGN_KEYS: &[(&str, i16)] = &[
        ("PKTABLE_CAT", VARCHAR),
        ("PKTABLE_SCHEM", VARCHAR),
        ("PKTABLE_NAME", VARCHAR),
        ("PKCOLUMN_NAME", VARCHAR),
        ("FKTABLE_CAT", VARCHAR),
        ("FKTABLE_SCHEM", VARCHAR),
        ("FKTABLE_NAME", VARCHAR),
        ("FKCOLUMN_NAME", VARCHAR),
        ("KEY_SEQ", INTEGER),
        ("UPDATE_RULE", INTEGER),
        ("DELETE_RULE", INTEGER),
        ("FK_NAME", VARCHAR),
        ("PK_NAME", VARCHAR),
        ("DEFERRABILITY", INTEGER),
    ];

    pub const TYPE_INFO: &[(&str, i16)] = &[
        ("TYPE_NAME", VARCHAR),
        ("DATA_TYPE", INTEGER),
        ("COLUMN_SIZE", INTEGER),
        ("LITERAL_PREFIX", VARCHAR),
        ("LITERAL_SUFFIX", VARCHAR),
        ("CREATE_PARAMS", VARCHAR),
        ("NULLABLE", INTEGER),
        ("CASE_SENSITIVE", INTEGER),
        ("SEARCHABLE", INTEGER),
    ];

    pub const PROCEDURES: &[(&str, i16)] = &[
        ("PROCEDURE_CAT", VARCHAR),
        ("PROCEDURE_SCHEM", VARCHAR),
        ("PROCEDURE_NAME", VARCHAR),
        ("NUM_INPUT_PARAMS", INTEGER),
        ("NUM_OUTPUT_PARAMS", INTEGER),
        ("NUM_RESULT_SETS", INTEGER),
        ("REMARKS", VARCHAR),
        ("PROCEDURE_TYPE", INTEGER),
    ];

    pub const PROCEDURE_COLUMNS: &[(&str, i16)] = &[
        ("PROCEDURE_CAT", VARCHAR),
        ("PROCEDURE_SCHEM", VARCHAR),
        ("PROCEDURE_NAME", VARCHAR),
        ("COLUMN_NAME", VARCHAR),
        ("COLUMN_TYPE", INTEGER),
        ("DATA_TYPE", INTEGER),
        ("TYPE_NAME", VARCHAR),
    ];
}

/// Types reported by `SQLGetTypeInfo`.
const TYPE_INFO_ROWS: &[(&str, i16, Option<&str>)] = &[
    ("BIGINT", sql_type::BIGINT, None),
    ("INTEGER", sql_type::INTEGER, None),
    ("NUMERIC", sql_type::NUMERIC, None),
    ("REAL", sql_type::DOUBLE, None),
    ("TEXT", sql_type::VARCHAR, Some("'")),
    ("BLOB", sql_type::VARBINARY, Some("X'")),
];

/// ODBC referential action codes (`SQL_CASCADE`, ...).
fn referential_action(rule: &str) -> i64 {
    match rule.to_ascii_uppercase().as_str() {
        "CASCADE" => 0,
        "RESTRICT" => 1,
        "SET NULL" => 2,
        "SET DEFAULT" => 4,
        _ => 3,
    }
}

/// A statement context on a [`SqliteConnection`].
///
/// Result sets are fully materialized on execute.
struct SqliteCursor {
    session: SharedSession,
    description: Option<Vec<ColumnDescription>>,
    rows: VecDeque<Row>,
    rowcount: i64,
    closed: bool,
}

impl SqliteCursor {
    fn new(session: SharedSession) -> Self {
        Self {
            session,
            description: None,
            rows: VecDeque::new(),
            rowcount: -1,
            closed: false,
        }
    }

    fn check_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::programming("Attempt to use a closed cursor.").with_sqlstate("HY010"));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.description = None;
        self.rows.clear();
        self.rowcount = -1;
    }

    fn load(&mut self, columns: &[(&str, i16)], rows: Vec<Row>) {
        self.description = Some(
            columns
                .iter()
                .map(|(name, code)| ColumnDescription::new(*name, *code, true))
                .collect(),
        );
        self.rows = rows.into();
        self.rowcount = -1;
    }

    fn tables(conn: &rusqlite::Connection, q: &TablesQuery) -> DriverResult<Vec<Row>> {
        let sql = "SELECT name, CASE WHEN name LIKE 'sqlite\\_%' ESCAPE '\\' THEN 'SYSTEM TABLE' \
                   ELSE upper(type) END AS kind \
                   FROM sqlite_master \
                   WHERE type IN ('table', 'view') AND (?1 IS NULL OR name LIKE ?1) \
                   ORDER BY kind, name";
        let found = collect(conn, sql, &[&q.table], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let wanted = q.table_type.as_deref().map(str::to_ascii_uppercase);
        Ok(found
            .into_iter()
            .filter(|(_, kind)| wanted.as_deref().is_none_or(|w| w == kind))
            .map(|(name, kind)| vec![Value::Null, Value::Null, text(name), text(kind), Value::Null])
            .collect())
    }

    fn columns(conn: &rusqlite::Connection, q: &ColumnsQuery) -> DriverResult<Vec<Row>> {
        let sql = "SELECT m.name, p.cid, p.name, p.type, p.\"notnull\", p.dflt_value \
                   FROM sqlite_master m JOIN pragma_table_info(m.name) p \
                   WHERE m.type IN ('table', 'view') \
                   AND (?1 IS NULL OR m.name LIKE ?1) AND (?2 IS NULL OR p.name LIKE ?2) \
                   ORDER BY m.name, p.cid";
        let found = collect(conn, sql, &[&q.table, &q.column], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;
        Ok(found
            .into_iter()
            .map(|(table, cid, name, decl, not_null, default)| {
                let code = i64::from(type_code_for(decl.as_deref()));
                vec![
                    Value::Null,
                    Value::Null,
                    text(table),
                    text(name),
                    Value::Integer(code),
                    opt_text(decl.as_deref()),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::from(!not_null),
                    Value::Null,
                    opt_text(default.as_deref()),
                    Value::Integer(code),
                    Value::Null,
                    Value::Null,
                    Value::Integer(cid + 1),
                    text(if not_null { "NO" } else { "YES" }),
                ]
            })
            .collect())
    }

    fn statistics(conn: &rusqlite::Connection, q: &StatisticsQuery) -> DriverResult<Vec<Row>> {
        let sql = "SELECT il.name, il.\"unique\", ii.seqno, ii.name \
                   FROM pragma_index_list(?1) il JOIN pragma_index_info(il.name) ii \
                   WHERE (?2 = 0 OR il.\"unique\" = 1) \
                   ORDER BY il.\"unique\" DESC, il.name, ii.seqno";
        let found = collect(conn, sql, &[&q.table, &q.unique], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        Ok(found
            .into_iter()
            .map(|(index, unique, seqno, column)| {
                vec![
                    Value::Null,
                    Value::Null,
                    text(q.table.as_str()),
                    Value::from(!unique),
                    Value::Null,
                    text(index),
                    // SQL_INDEX_OTHER
                    Value::Integer(3),
                    Value::Integer(seqno + 1),
                    opt_text(column.as_deref()),
                    text("A"),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                ]
            })
            .collect())
    }

    fn primary_key_columns(
        conn: &rusqlite::Connection,
        table: &str,
    ) -> DriverResult<Vec<(String, Option<String>, i64)>> {
        collect(
            conn,
            "SELECT name, type, pk FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk",
            &[&table],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
    }

    fn row_id_columns(conn: &rusqlite::Connection, q: &SpecialColumnsQuery) -> DriverResult<Vec<Row>> {
        let keys = Self::primary_key_columns(conn, &q.table)?;
        // SQL_SCOPE_SESSION, SQL_PC_NOT_PSEUDO / SQL_PC_PSEUDO
        let rows = if keys.is_empty() {
            let exists = collect(
                conn,
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                &[&q.table],
                |_| Ok(()),
            )?;
            exists
                .into_iter()
                .map(|()| {
                    vec![
                        Value::Integer(2),
                        text("rowid"),
                        Value::Integer(sql_type::BIGINT.into()),
                        text("INTEGER"),
                        Value::Null,
                        Value::Null,
                        Value::Null,
                        Value::Integer(2),
                    ]
                })
                .collect()
        } else {
            keys.into_iter()
                .map(|(name, decl, _)| {
                    vec![
                        Value::Integer(2),
                        text(name),
                        Value::Integer(type_code_for(decl.as_deref()).into()),
                        opt_text(decl.as_deref()),
                        Value::Null,
                        Value::Null,
                        Value::Null,
                        Value::Integer(1),
                    ]
                })
                .collect()
        };
        Ok(rows)
    }

    fn primary_keys(conn: &rusqlite::Connection, q: &KeysQuery) -> DriverResult<Vec<Row>> {
        let keys = Self::primary_key_columns(conn, &q.table)?;
        Ok(keys
            .into_iter()
            .map(|(name, _, seq)| {
                vec![
                    Value::Null,
                    Value::Null,
                    text(q.table.as_str()),
                    text(name),
                    Value::Integer(seq),
                    Value::Null,
                ]
            })
            .collect())
    }

    fn foreign_keys(conn: &rusqlite::Connection, q: &ForeignKeysQuery) -> DriverResult<Vec<Row>> {
        let sql = "SELECT f.\"table\", f.\"to\", m.name, f.\"from\", f.seq, f.on_update, f.on_delete, f.id \
                   FROM sqlite_master m JOIN pragma_foreign_key_list(m.name) f \
                   WHERE m.type = 'table' \
                   AND (?1 IS NULL OR f.\"table\" = ?1) AND (?2 IS NULL OR m.name = ?2) \
                   ORDER BY m.name, f.id, f.seq";
        let found = collect(conn, sql, &[&q.table, &q.foreign_table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;
        Ok(found
            .into_iter()
            .map(|(pk_table, pk_col, fk_table, fk_col, seq, on_update, on_delete, id)| {
                let fk_name = format!("fk_{fk_table}_{id}");
                vec![
                    Value::Null,
                    Value::Null,
                    text(pk_table),
                    opt_text(pk_col.as_deref()),
                    Value::Null,
                    Value::Null,
                    text(fk_table),
                    text(fk_col),
                    Value::Integer(seq + 1),
                    Value::Integer(referential_action(&on_update)),
                    Value::Integer(referential_action(&on_delete)),
                    text(fk_name),
                    Value::Null,
                    // SQL_NOT_DEFERRABLE
                    Value::Integer(7),
                ]
            })
            .collect())
    }

    fn type_info(data_type: Option<i16>) -> Vec<Row> {
        TYPE_INFO_ROWS
            .iter()
            .filter(|(_, code, _)| data_type.is_none_or(|wanted| wanted == *code))
            .map(|(name, code, quote)| {
                vec![
                    text(*name),
                    Value::Integer((*code).into()),
                    Value::Null,
                    opt_text(*quote),
                    opt_text(quote.map(|_| "'")),
                    Value::Null,
                    // SQL_NULLABLE
                    Value::Integer(1),
                    Value::from(*code == sql_type::VARCHAR),
                    // SQL_SEARCHABLE
                    Value::Integer(3),
                ]
            })
            .collect()
    }
}

impl NativeCursor for SqliteCursor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<()> {
        self.check_open()?;
        self.reset();

        let shared = Arc::clone(&self.session);
        let session = shared.lock();
        let conn = session.conn()?;
        let mut stmt = conn.prepare(sql).map_err(|e| map_error(&e))?;
        begin_if_needed(conn, session.autocommit, stmt.readonly())?;

        let column_count = stmt.column_count();
        let bound = rusqlite::params_from_iter(params.iter());
        if column_count == 0 {
            let changed = stmt.execute(bound).map_err(|e| map_error(&e))?;
            self.rowcount = i64::try_from(changed).unwrap_or(i64::MAX);
            return Ok(());
        }

        let mut description: Vec<ColumnDescription> = stmt
            .columns()
            .iter()
            .map(|col| ColumnDescription::new(col.name(), type_code_for(col.decl_type()), true))
            .collect();

        let mut fetched = VecDeque::new();
        let mut rows = stmt.query(bound).map_err(|e| map_error(&e))?;
        while let Some(row) = rows.next().map_err(|e| map_error(&e))? {
            let mut values = Vec::with_capacity(column_count);
            for (idx, column) in description.iter_mut().enumerate() {
                let value = value_from_ref(row.get_ref(idx).map_err(|e| map_error(&e))?);
                if column.type_code == sql_type::UNKNOWN && !value.is_null() {
                    column.type_code = runtime_type_code(&value);
                }
                let value = match session.converters.get(&column.type_code) {
                    Some(convert) => convert(value),
                    None => value,
                };
                values.push(value);
            }
            fetched.push_back(values);
        }

        self.description = Some(description);
        self.rows = fetched;
        Ok(())
    }

    fn executemany(&mut self, sql: &str, seq_of_params: &[Vec<Value>]) -> DriverResult<()> {
        let mut total = 0;
        for params in seq_of_params {
            self.execute(sql, params)?;
            total += self.rowcount.max(0);
        }
        self.rowcount = total;
        Ok(())
    }

    fn fetchone(&mut self) -> DriverResult<Option<Row>> {
        self.check_open()?;
        Ok(self.rows.pop_front())
    }

    fn fetchall(&mut self) -> DriverResult<Vec<Row>> {
        self.check_open()?;
        Ok(self.rows.drain(..).collect())
    }

    fn nextset(&mut self) -> DriverResult<bool> {
        self.check_open()?;
        self.reset();
        Ok(false)
    }

    fn catalog(&mut self, query: &CatalogQuery) -> DriverResult<()> {
        use catalog_columns as cols;

        self.check_open()?;
        self.reset();
        let shared = Arc::clone(&self.session);
        let session = shared.lock();
        let conn = session.conn()?;

        let (columns, rows) = match query {
            CatalogQuery::Tables(q) => (cols::TABLES, Self::tables(conn, q)?),
            CatalogQuery::Columns(q) => (cols::COLUMNS, Self::columns(conn, q)?),
            CatalogQuery::Statistics(q) => (cols::STATISTICS, Self::statistics(conn, q)?),
            CatalogQuery::RowIdColumns(q) => (cols::SPECIAL_COLUMNS, Self::row_id_columns(conn, q)?),
            // SQLite has no automatically updated row version columns.
            CatalogQuery::RowVerColumns(_) => (cols::SPECIAL_COLUMNS, Vec::new()),
            CatalogQuery::PrimaryKeys(q) => (cols::PRIMARY_KEYS, Self::primary_keys(conn, q)?),
            CatalogQuery::ForeignKeys(q) => (cols::FOREIGN_KEYS, Self::foreign_keys(conn, q)?),
            CatalogQuery::TypeInfo(data_type) => (cols::TYPE_INFO, Self::type_info(*data_type)),
            CatalogQuery::Procedures(_) => (cols::PROCEDURES, Vec::new()),
            CatalogQuery::ProcedureColumns(_) => (cols::PROCEDURE_COLUMNS, Vec::new()),
        };
        drop(session);
        self.load(columns, rows);
        Ok(())
    }

    fn skip(&mut self, count: usize) -> DriverResult<()> {
        self.check_open()?;
        let count = count.min(self.rows.len());
        self.rows.drain(..count);
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.check_open()?;
        self.session.lock().commit()
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.check_open()?;
        self.session.lock().rollback()
    }

    fn close(&mut self) -> DriverResult<()> {
        self.reset();
        self.closed = true;
        Ok(())
    }

    fn description(&self) -> Option<Vec<ColumnDescription>> {
        self.description.clone()
    }

    fn rowcount(&self) -> i64 {
        self.rowcount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverErrorKind;

    fn open(dsn: &str, autocommit: bool) -> Box<dyn NativeConnection> {
        let conn_str = ConnectionString::parse(dsn).unwrap();
        let params = ConnectParams {
            autocommit,
            ..ConnectParams::default()
        };
        SqliteDriver::new().connect(&conn_str, &params).unwrap()
    }

    fn memory() -> Box<dyn NativeConnection> {
        open("Database=:memory:", true)
    }

    #[test]
    fn test_select_literal() {
        let mut conn = memory();
        let mut cur = conn.execute("SELECT 1", &[]).unwrap();
        assert_eq!(cur.fetchone().unwrap(), Some(vec![Value::Integer(1)]));
        assert_eq!(cur.fetchone().unwrap(), None);

        let desc = cur.description().unwrap();
        assert_eq!(desc[0].name, "1");
        assert_eq!(desc[0].type_code, sql_type::BIGINT);
        assert_eq!(cur.rowcount(), -1);
    }

    #[test]
    fn test_dml_rowcount_and_params() {
        let mut conn = memory();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        let mut cur = conn.cursor().unwrap();
        cur.executemany(
            "INSERT INTO t (name) VALUES (?)",
            &[vec![Value::from("a")], vec![Value::from("b")]],
        )
        .unwrap();
        assert_eq!(cur.rowcount(), 2);

        cur.execute("UPDATE t SET name = ? WHERE id > ?", &[Value::from("z"), Value::from(0)])
            .unwrap();
        assert_eq!(cur.rowcount(), 2);

        cur.execute("SELECT id, name FROM t ORDER BY id", &[]).unwrap();
        let desc = cur.description().unwrap();
        assert_eq!(desc[0].type_code, sql_type::INTEGER);
        assert_eq!(desc[1].type_code, sql_type::VARCHAR);
        assert_eq!(cur.fetchall().unwrap().len(), 2);
    }

    #[test]
    fn test_manual_commit_mode() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("Database={}", dir.path().join("tx.db").display());

        let mut writer = open(&dsn, false);
        writer.execute("CREATE TABLE t (v INTEGER)", &[]).unwrap();
        writer.commit().unwrap();

        writer.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        writer.rollback().unwrap();
        writer.execute("INSERT INTO t VALUES (2)", &[]).unwrap();
        writer.commit().unwrap();

        let mut reader = open(&dsn, true);
        let mut cur = reader.execute("SELECT v FROM t", &[]).unwrap();
        assert_eq!(cur.fetchall().unwrap(), vec![vec![Value::Integer(2)]]);
    }

    #[test]
    fn test_error_mapping() {
        let mut conn = memory();
        let err = conn.execute("SELEC 1", &[]).err().unwrap();
        assert_eq!(err.kind(), DriverErrorKind::Programming);
        assert_eq!(err.sqlstate(), Some("42000"));

        let err = conn.execute("SELECT * FROM missing", &[]).err().unwrap();
        assert_eq!(err.kind(), DriverErrorKind::Programming);
        assert_eq!(err.sqlstate(), Some("42000"));
        assert!(err.message().contains("no such table"));

        conn.execute("CREATE TABLE u (id INTEGER PRIMARY KEY)", &[])
            .unwrap();
        conn.execute("INSERT INTO u VALUES (1)", &[]).unwrap();
        let err = conn.execute("INSERT INTO u VALUES (1)", &[]).err().unwrap();
        assert_eq!(err.kind(), DriverErrorKind::Integrity);
        assert_eq!(err.sqlstate(), Some("23000"));

        let err = conn.execute("SELECT ?", &[]).err().unwrap();
        assert_eq!(err.sqlstate(), Some("07002"));
    }

    #[test]
    fn test_unknown_dsn() {
        let conn_str = ConnectionString::parse("nowhere").unwrap();
        let err = SqliteDriver::new()
            .connect(&conn_str, &ConnectParams::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), DriverErrorKind::Interface);
        assert_eq!(err.sqlstate(), Some("IM002"));
    }

    #[test]
    fn test_named_data_source() {
        let dir = tempfile::tempdir().unwrap();
        let driver = SqliteDriver::new().with_data_source("local", dir.path().join("n.db"));
        let sources = driver.data_sources().unwrap();
        assert!(sources["local"].starts_with("SQLite database at"));

        let conn_str = ConnectionString::parse("DSN=LOCAL").unwrap();
        let conn = driver.connect(&conn_str, &ConnectParams::default()).unwrap();
        assert_eq!(conn.getinfo(info::DATA_SOURCE_NAME).unwrap(), text("local"));
    }

    #[test]
    fn test_read_only_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("Database={};Mode=ro", dir.path().join("missing.db").display());
        let conn_str = ConnectionString::parse(&dsn).unwrap();
        let err = SqliteDriver::new()
            .connect(&conn_str, &ConnectParams::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), DriverErrorKind::Operational);
        assert_eq!(err.sqlstate(), Some("08001"));
    }

    #[test]
    fn test_output_converter() {
        let mut conn = memory();
        conn.add_output_converter(
            sql_type::VARCHAR,
            Arc::new(|v| match v {
                Value::Text(s) => Value::Text(s.to_uppercase()),
                other => other,
            }),
        )
        .unwrap();
        let mut cur = conn.execute("SELECT 'abc'", &[]).unwrap();
        assert_eq!(cur.fetchone().unwrap(), Some(vec![text("ABC")]));

        conn.clear_output_converters().unwrap();
        let mut cur = conn.execute("SELECT 'abc'", &[]).unwrap();
        assert_eq!(cur.fetchone().unwrap(), Some(vec![text("abc")]));
    }

    #[test]
    fn test_getinfo_and_set_attr() {
        let mut conn = memory();
        assert_eq!(conn.getinfo(info::DBMS_NAME).unwrap(), text("SQLite"));
        assert_eq!(conn.getinfo(info::DBMS_VER).unwrap(), text(rusqlite::version()));
        assert_eq!(
            conn.getinfo(9999).unwrap_err().kind(),
            DriverErrorKind::NotSupported
        );

        conn.set_attr(attr::AUTOCOMMIT, 0).unwrap();
        assert!(!conn.autocommit());
        conn.set_attr(attr::LOGIN_TIMEOUT, 3).unwrap();
        assert_eq!(conn.timeout(), 3);
        assert_eq!(
            conn.set_attr(1234, 1).unwrap_err().sqlstate(),
            Some("HYC00")
        );
    }

    #[test]
    fn test_closed_handles() {
        let mut conn = memory();
        let mut cur = conn.cursor().unwrap();
        cur.close().unwrap();
        assert!(cur.fetchone().is_err());

        let mut cur = conn.cursor().unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        let err = cur.execute("SELECT 1", &[]).unwrap_err();
        assert_eq!(err.kind(), DriverErrorKind::Programming);
        assert!(!err.is_connection_closed());
        assert!(conn.cursor().is_err());
    }

    #[test]
    fn test_catalog_functions() {
        let mut conn = memory();
        conn.execute(
            "CREATE TABLE parent (id INTEGER PRIMARY KEY, code TEXT NOT NULL UNIQUE)",
            &[],
        )
        .unwrap();
        conn.execute(
            "CREATE TABLE child (id INTEGER, parent_id INTEGER REFERENCES parent(id) ON DELETE CASCADE)",
            &[],
        )
        .unwrap();
        conn.execute("CREATE VIEW v AS SELECT id FROM parent", &[]).unwrap();

        let mut cur = conn.cursor().unwrap();
        cur.catalog(&CatalogQuery::Tables(TablesQuery {
            table_type: Some("table".into()),
            ..TablesQuery::default()
        }))
        .unwrap();
        let names: Vec<_> = cur.fetchall().unwrap().into_iter().map(|r| r[2].clone()).collect();
        assert_eq!(names, vec![text("child"), text("parent")]);

        cur.catalog(&CatalogQuery::Columns(ColumnsQuery {
            table: Some("parent".into()),
            ..ColumnsQuery::default()
        }))
        .unwrap();
        let rows = cur.fetchall().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][3], text("code"));
        assert_eq!(rows[1][10], Value::Integer(0));
        assert_eq!(rows[1][17], text("NO"));

        cur.catalog(&CatalogQuery::PrimaryKeys(KeysQuery::new("parent")))
            .unwrap();
        assert_eq!(cur.fetchone().unwrap().unwrap()[3], text("id"));

        cur.catalog(&CatalogQuery::RowIdColumns(SpecialColumnsQuery::new("child")))
            .unwrap();
        assert_eq!(cur.fetchone().unwrap().unwrap()[1], text("rowid"));

        cur.catalog(&CatalogQuery::ForeignKeys(ForeignKeysQuery {
            foreign_table: Some("child".into()),
            ..ForeignKeysQuery::default()
        }))
        .unwrap();
        let fk = cur.fetchone().unwrap().unwrap();
        assert_eq!(fk[2], text("parent"));
        assert_eq!(fk[7], text("parent_id"));
        assert_eq!(fk[10], Value::Integer(0));

        let mut stats = StatisticsQuery::new("parent");
        stats.unique = true;
        cur.catalog(&CatalogQuery::Statistics(stats)).unwrap();
        let rows = cur.fetchall().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][8], text("code"));

        cur.catalog(&CatalogQuery::TypeInfo(Some(sql_type::VARCHAR)))
            .unwrap();
        assert_eq!(cur.fetchall().unwrap().len(), 1);

        cur.catalog(&CatalogQuery::RowVerColumns(SpecialColumnsQuery::new("child")))
            .unwrap();
        assert!(cur.description().is_some());
        assert!(cur.fetchone().unwrap().is_none());
    }
}
