//! Scriptable in-memory driver for tests.
//!
//! `SELECT <n>` yields one row `[n]`, `SELECT ?` echoes its parameters and
//! anything else succeeds with no result set. Failures and latency can be
//! injected through [`MockDriver`]'s setters.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::driver::{ConnectParams, Driver, DriverResult, NativeConnection, NativeCursor};
use crate::dsn::ConnectionString;
use crate::error::DriverError;
use crate::types::constants::{attr, info, sql_type};
use crate::types::{ColumnDescription, OutputConverter, Row, Value};

#[derive(Debug, Default)]
struct MockState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    fail_connect: AtomicBool,
    fail_close: AtomicBool,
    connect_delay_ms: AtomicU64,
    next_error: Mutex<Option<DriverError>>,
    executed: Mutex<Vec<String>>,
    last_dsn: Mutex<Option<String>>,
}

/// Driver whose sessions live in memory and count their lifecycle events.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions opened so far.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Sessions closed successfully so far.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.connects() - self.closes()
    }

    /// Statements executed on any session, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().clone()
    }

    /// Connection string of the last connect attempt.
    pub fn last_dsn(&self) -> Option<String> {
        self.state.last_dsn.lock().clone()
    }

    /// Make connect attempts fail with `08001`.
    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make session close fail with a programming error.
    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Block every connect for `delay` on the worker thread.
    pub fn set_connect_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.connect_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Fail the next executed statement with `err`.
    pub fn fail_next_execute(&self, err: DriverError) {
        *self.state.next_error.lock() = Some(err);
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn connect(
        &self,
        conn_str: &ConnectionString,
        params: &ConnectParams,
    ) -> DriverResult<Box<dyn NativeConnection>> {
        *self.state.last_dsn.lock() = Some(conn_str.to_string());
        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(DriverError::operational("mock connect refused").with_sqlstate("08001"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            closed: Arc::new(AtomicBool::new(false)),
            autocommit: params.autocommit,
            timeout: params.timeout,
            converters: Arc::new(Mutex::new(BTreeMap::new())),
        }))
    }

    fn data_sources(&self) -> DriverResult<BTreeMap<String, String>> {
        Ok(BTreeMap::from([(
            "mock".to_string(),
            "In-memory mock data source".to_string(),
        )]))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    closed: Arc<AtomicBool>,
    autocommit: bool,
    timeout: u32,
    converters: Arc<Mutex<BTreeMap<i16, OutputConverter>>>,
}

fn closed_error() -> DriverError {
    DriverError::programming("Attempt to use a closed connection.").with_sqlstate("08003")
}

impl MockConnection {
    fn check_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        Ok(())
    }
}

impl NativeConnection for MockConnection {
    fn cursor(&mut self) -> DriverResult<Box<dyn NativeCursor>> {
        self.check_open()?;
        Ok(Box::new(MockCursor {
            state: Arc::clone(&self.state),
            conn_closed: Arc::clone(&self.closed),
            converters: Arc::clone(&self.converters),
            rows: VecDeque::new(),
            description: None,
            rowcount: -1,
        }))
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.check_open()
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.check_open()
    }

    fn close(&mut self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(DriverError::programming("mock close failure"));
        }
        self.closed.store(true, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn set_autocommit(&mut self, autocommit: bool) -> DriverResult<()> {
        self.check_open()?;
        self.autocommit = autocommit;
        Ok(())
    }

    fn timeout(&self) -> u32 {
        self.timeout
    }

    fn getinfo(&self, info_type: u16) -> DriverResult<Value> {
        self.check_open()?;
        match info_type {
            info::DBMS_NAME => Ok(Value::from("Mock")),
            other => Err(DriverError::not_supported(format!(
                "information type {other} is not supported"
            ))),
        }
    }

    fn add_output_converter(&mut self, sql_type: i16, converter: OutputConverter) -> DriverResult<()> {
        self.check_open()?;
        self.converters.lock().insert(sql_type, converter);
        Ok(())
    }

    fn clear_output_converters(&mut self) -> DriverResult<()> {
        self.check_open()?;
        self.converters.lock().clear();
        Ok(())
    }

    fn set_attr(&mut self, attr_id: i32, value: i64) -> DriverResult<()> {
        match attr_id {
            attr::AUTOCOMMIT => self.set_autocommit(value != 0),
            attr::LOGIN_TIMEOUT => {
                self.check_open()?;
                self.timeout = u32::try_from(value).unwrap_or(0);
                Ok(())
            }
            other => Err(DriverError::not_supported(format!(
                "connection attribute {other} is not supported"
            ))),
        }
    }
}

struct MockCursor {
    state: Arc<MockState>,
    conn_closed: Arc<AtomicBool>,
    converters: Arc<Mutex<BTreeMap<i16, OutputConverter>>>,
    rows: VecDeque<Row>,
    description: Option<Vec<ColumnDescription>>,
    rowcount: i64,
}

impl MockCursor {
    fn check_open(&self) -> DriverResult<()> {
        if self.conn_closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        Ok(())
    }

    fn convert(&self, value: Value) -> Value {
        let code = match value {
            Value::Integer(_) => sql_type::BIGINT,
            Value::Text(_) => sql_type::VARCHAR,
            _ => return value,
        };
        match self.converters.lock().get(&code) {
            Some(convert) => convert(value),
            None => value,
        }
    }
}

impl NativeCursor for MockCursor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<()> {
        self.check_open()?;
        self.state.executed.lock().push(sql.to_string());
        if let Some(err) = self.state.next_error.lock().take() {
            return Err(err);
        }

        self.rows.clear();
        self.description = None;
        self.rowcount = -1;

        let trimmed = sql.trim();
        let Some(expr) = trimmed
            .get(..7)
            .filter(|head| head.eq_ignore_ascii_case("SELECT "))
            .map(|_| trimmed[7..].trim())
        else {
            self.rowcount = 0;
            return Ok(());
        };

        let row: Row = if expr == "?" {
            params.iter().cloned().map(|v| self.convert(v)).collect()
        } else if let Ok(n) = expr.parse::<i64>() {
            vec![self.convert(Value::Integer(n))]
        } else {
            return Err(DriverError::programming(format!("mock cannot evaluate {expr:?}"))
                .with_sqlstate("42000"));
        };
        self.description = Some(
            (0..row.len())
                .map(|i| ColumnDescription::new(format!("c{i}"), sql_type::BIGINT, true))
                .collect(),
        );
        self.rows.push_back(row);
        Ok(())
    }

    fn fetchone(&mut self) -> DriverResult<Option<Row>> {
        self.check_open()?;
        Ok(self.rows.pop_front())
    }

    fn nextset(&mut self) -> DriverResult<bool> {
        self.check_open()?;
        Ok(false)
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.check_open()
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.check_open()
    }

    fn close(&mut self) -> DriverResult<()> {
        self.rows.clear();
        Ok(())
    }

    fn description(&self) -> Option<Vec<ColumnDescription>> {
        self.description.clone()
    }

    fn rowcount(&self) -> i64 {
        self.rowcount
    }
}
