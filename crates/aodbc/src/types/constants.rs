//! ODBC numeric codes understood by the bundled drivers.

/// SQL data type codes (`SQL_*`), used for column descriptions and output
/// converter registration.
pub mod sql_type {
    pub const UNKNOWN: i16 = 0;
    pub const NUMERIC: i16 = 2;
    pub const INTEGER: i16 = 4;
    pub const DOUBLE: i16 = 8;
    pub const VARCHAR: i16 = 12;
    pub const BIGINT: i16 = -5;
    pub const VARBINARY: i16 = -3;
    pub const WVARCHAR: i16 = -9;
}

/// `SQLGetInfo` information types.
pub mod info {
    pub const DATA_SOURCE_NAME: u16 = 2;
    pub const DRIVER_NAME: u16 = 6;
    pub const DRIVER_VER: u16 = 7;
    pub const DATABASE_NAME: u16 = 16;
    pub const DBMS_NAME: u16 = 17;
    pub const DBMS_VER: u16 = 18;
}

/// `SQLSetConnectAttr` attribute ids.
pub mod attr {
    pub const AUTOCOMMIT: i32 = 102;
    pub const LOGIN_TIMEOUT: i32 = 103;
    pub const CONNECTION_TIMEOUT: i32 = 113;
}
