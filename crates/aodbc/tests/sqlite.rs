//! End-to-end tests against the bundled SQLite driver.

use std::sync::Arc;
use std::time::Duration;

use aodbc::types::constants::{info, sql_type};
use aodbc::types::{ColumnsQuery, ForeignKeysQuery, KeysQuery, StatisticsQuery, TablesQuery};
use aodbc::{
    ConnectOptions, Connection, DriverErrorKind, Error, Executor, Pool, PoolConfig, Row,
    SqliteDriver, Value, scoped,
};
use futures::{FutureExt, TryStreamExt};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

struct Db {
    dir: TempDir,
    dsn: String,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn database() -> Db {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let dsn = format!("Database={};", dir.path().join("test.db").display());
    Db { dir, dsn }
}

async fn open(db: &Db) -> Connection {
    aodbc::connect(&db.dsn, ConnectOptions::new().autocommit(true))
        .await
        .unwrap()
}

async fn seed(db: &Db) {
    let conn = open(db).await;
    conn.execute(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, score REAL)",
        &[],
    )
    .await
    .unwrap();
    conn.execute(
        "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id) ON DELETE CASCADE, body TEXT)",
        &[],
    )
    .await
    .unwrap();
    conn.close().await.unwrap();
}

fn pool_config(db: &Db, minsize: usize, maxsize: usize) -> PoolConfig {
    PoolConfig::new(db.dsn.clone()).minsize(minsize).maxsize(maxsize)
}

async fn count_users(db: &Db) -> Value {
    let conn = open(db).await;
    let cursor = conn.execute("SELECT count(*) FROM users", &[]).await.unwrap();
    let row = cursor.fetchone().await.unwrap().unwrap();
    conn.close().await.unwrap();
    row[0].clone()
}

#[tokio::test]
async fn test_pool_warm_up_fills_minsize() {
    let db = database();
    let pool = Pool::new(pool_config(&db, 10, 10)).await.unwrap();

    assert_eq!(pool.size(), 10);
    assert_eq!(pool.freesize(), 10);

    pool.close();
    pool.wait_closed().await.unwrap();
    assert!(pool.closed());
}

#[tokio::test]
async fn test_pool_blocks_at_maxsize() {
    let db = database();
    let pool = Pool::new(pool_config(&db, 0, 2)).await.unwrap();

    let (a, b) = tokio::join!(pool.acquire(), pool.acquire());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(pool.size(), 2);
    assert_eq!(pool.freesize(), 0);

    let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
    assert!(blocked.is_err());

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    a.release().await.unwrap();
    let c = waiter.await.unwrap().unwrap();
    assert_eq!(pool.size(), 2);

    b.release().await.unwrap();
    c.release().await.unwrap();
    pool.close();
    pool.wait_closed().await.unwrap();
}

#[tokio::test]
async fn test_pooled_select_one() {
    let db = database();
    let pool = Pool::new(pool_config(&db, 1, 1)).await.unwrap();

    let conn = pool.acquire().await.unwrap();
    let mut cursor = conn.cursor().await.unwrap();
    cursor.execute("SELECT 1", &[]).await.unwrap();
    assert_eq!(cursor.fetchone().await.unwrap(), Some(vec![Value::Integer(1)]));
    cursor.close().await.unwrap();

    pool.release(conn).await.unwrap();
    pool.close();
    pool.wait_closed().await.unwrap();
}

#[tokio::test]
async fn test_pool_close_then_acquire() {
    let db = database();
    let pool = Pool::new(pool_config(&db, 1, 2)).await.unwrap();
    let conn = pool.acquire().await.unwrap();

    pool.close();
    assert!(pool.acquire().await.unwrap_err().is_pool_closing());

    conn.release().await.unwrap();
    pool.wait_closed().await.unwrap();
    assert!(pool.closed());
    assert_eq!(pool.size(), 0);
}

#[tokio::test]
async fn test_pool_rejects_minsize_above_maxsize() {
    let db = database();
    let err = Pool::new(pool_config(&db, 5, 2)).await.unwrap_err();
    assert!(matches!(err, Error::Value(_)));
}

#[tokio::test]
async fn test_scoped_connection_commits() {
    let db = database();
    seed(&db).await;
    let pool = Pool::new(pool_config(&db, 1, 1)).await.unwrap();

    scoped::with_connection(&pool, |conn| {
        async move {
            assert!(!conn.autocommit()?);
            conn.execute("INSERT INTO users (name) VALUES (?)", &[Value::from("ada")])
                .await?;
            Ok(())
        }
        .boxed()
    })
    .await
    .unwrap();
    assert_eq!(count_users(&db).await, Value::Integer(1));

    let err = scoped::with_connection(&pool, |conn| {
        async move {
            conn.execute("INSERT INTO users (name) VALUES (?)", &[Value::from("bob")])
                .await?;
            Err::<(), _>(Error::value("abort"))
        }
        .boxed()
    })
    .await
    .unwrap_err();
    assert!(err.is_value());
    assert_eq!(count_users(&db).await, Value::Integer(1));

    pool.close();
    pool.wait_closed().await.unwrap();
}

#[tokio::test]
async fn test_cursor_operations() {
    let db = database();
    seed(&db).await;
    let conn = open(&db).await;
    let mut cursor = conn.cursor().await.unwrap();

    cursor
        .executemany(
            "INSERT INTO users (name, score) VALUES (?, ?)",
            vec![
                vec![Value::from("ada"), Value::from(1.5)],
                vec![Value::from("bob"), Value::Null],
                vec![Value::from("cy"), Value::from(3.0)],
            ],
        )
        .await
        .unwrap();
    assert_eq!(cursor.rowcount(), 3);

    cursor
        .execute("SELECT id, name, score FROM users ORDER BY id", &[])
        .await
        .unwrap();
    let names: Vec<String> = cursor
        .description()
        .unwrap()
        .into_iter()
        .map(|column| column.name)
        .collect();
    assert_eq!(names, ["id", "name", "score"]);

    cursor.set_arraysize(2);
    let batch = cursor.fetchmany(None).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[1][2], Value::Null);
    let rest: Vec<Row> = cursor.rows().try_collect().await.unwrap();
    assert_eq!(rest, vec![vec![Value::Integer(3), Value::from("cy"), Value::Real(3.0)]]);

    cursor
        .execute("UPDATE users SET score = 0 WHERE score IS NOT NULL", &[])
        .await
        .unwrap();
    assert_eq!(cursor.rowcount(), 2);

    cursor.close().await.unwrap();
    assert!(cursor.fetchone().await.unwrap_err().is_invalid_state());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_manual_commit_and_rollback() {
    let db = database();
    seed(&db).await;
    let conn = aodbc::connect(&db.dsn, ConnectOptions::new()).await.unwrap();
    assert!(!conn.autocommit().unwrap());

    conn.execute("INSERT INTO users (name) VALUES ('ada')", &[])
        .await
        .unwrap();
    conn.rollback().await.unwrap();
    assert_eq!(count_users(&db).await, Value::Integer(0));

    conn.execute("INSERT INTO users (name) VALUES ('ada')", &[])
        .await
        .unwrap();
    conn.commit().await.unwrap();
    assert_eq!(count_users(&db).await, Value::Integer(1));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_constraint_violation_keeps_connection() {
    let db = database();
    seed(&db).await;
    let conn = open(&db).await;
    conn.execute("INSERT INTO users (name) VALUES ('ada')", &[])
        .await
        .unwrap();

    let err = conn
        .execute("INSERT INTO users (name) VALUES ('ada')", &[])
        .await
        .unwrap_err();
    let driver_err = err.driver_error().unwrap();
    assert_eq!(driver_err.kind(), DriverErrorKind::Integrity);
    assert_eq!(driver_err.sqlstate(), Some("23000"));
    assert!(!conn.closed());

    let err = conn.execute("SELECT * FROM missing", &[]).await.unwrap_err();
    assert_eq!(err.driver_error().unwrap().kind(), DriverErrorKind::Programming);
    assert!(!conn.closed());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_catalog_functions() {
    let db = database();
    seed(&db).await;
    let conn = open(&db).await;
    conn.execute("CREATE INDEX idx_posts_user ON posts (user_id)", &[])
        .await
        .unwrap();

    let mut cursor = conn.cursor().await.unwrap();
    let tables = cursor
        .tables(TablesQuery {
            table_type: Some("TABLE".into()),
            ..TablesQuery::default()
        })
        .await
        .unwrap()
        .fetchall()
        .await
        .unwrap();
    let names: Vec<&Value> = tables.iter().map(|row| &row[2]).collect();
    assert_eq!(names, [&Value::from("posts"), &Value::from("users")]);

    let columns = cursor
        .columns(ColumnsQuery {
            table: Some("users".into()),
            ..ColumnsQuery::default()
        })
        .await
        .unwrap()
        .fetchall()
        .await
        .unwrap();
    assert_eq!(columns.len(), 3);
    assert_eq!(columns[1][3], Value::from("name"));
    assert_eq!(columns[1][17], Value::from("NO"));

    let keys = cursor
        .primary_keys(KeysQuery::new("users"))
        .await
        .unwrap()
        .fetchall()
        .await
        .unwrap();
    assert_eq!(keys, vec![vec![
        Value::Null,
        Value::Null,
        Value::from("users"),
        Value::from("id"),
        Value::Integer(1),
        Value::Null,
    ]]);

    let foreign = cursor
        .foreign_keys(ForeignKeysQuery {
            foreign_table: Some("posts".into()),
            ..ForeignKeysQuery::default()
        })
        .await
        .unwrap()
        .fetchall()
        .await
        .unwrap();
    assert_eq!(foreign.len(), 1);
    assert_eq!(foreign[0][2], Value::from("users"));
    assert_eq!(foreign[0][7], Value::from("user_id"));
    // SQL_CASCADE
    assert_eq!(foreign[0][10], Value::Integer(0));

    let stats = cursor
        .statistics(StatisticsQuery::new("posts"))
        .await
        .unwrap()
        .fetchall()
        .await
        .unwrap();
    assert!(stats.iter().any(|row| row[5] == Value::from("idx_posts_user")));

    let types = cursor
        .type_info(Some(sql_type::VARCHAR))
        .await
        .unwrap()
        .fetchall()
        .await
        .unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0][0], Value::from("TEXT"));

    cursor.close().await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_connection_metadata() {
    let db = database();
    let conn = aodbc::connect(
        &db.dsn,
        ConnectOptions::new()
            .timeout(3)
            .executor(Executor::bounded(2)),
    )
    .await
    .unwrap();

    assert_eq!(conn.getinfo(info::DBMS_NAME).await.unwrap(), Value::from("SQLite"));
    assert_eq!(conn.timeout().unwrap(), 3);

    conn.add_output_converter(
        sql_type::VARCHAR,
        Arc::new(|value| match value {
            Value::Text(s) => Value::Text(s.to_uppercase()),
            other => other,
        }),
    )
    .await
    .unwrap();
    let cursor = conn.execute("SELECT CAST('abc' AS TEXT)", &[]).await.unwrap();
    assert_eq!(cursor.fetchone().await.unwrap(), Some(vec![Value::from("ABC")]));

    conn.close().await.unwrap();
    assert!(conn.closed());
}

#[tokio::test]
async fn test_missing_read_only_database_fails_to_connect() {
    let dir = TempDir::new().unwrap();
    let dsn = format!("Database={};Mode=ro;", dir.path().join("absent.db").display());

    let err = aodbc::connect(&dsn, ConnectOptions::new()).await.unwrap_err();
    assert!(err.is_connection());
}

#[tokio::test]
async fn test_named_data_sources() {
    let db = database();
    let path = db.dir.path().join("test.db");
    let driver = SqliteDriver::new().with_data_source("main", &path);

    let sources = aodbc::data_sources_with(Arc::new(driver.clone()), &Executor::new())
        .await
        .unwrap();
    assert!(sources["main"].starts_with("SQLite database at"));

    let conn = aodbc::connect("main", ConnectOptions::new().driver(Arc::new(driver)))
        .await
        .unwrap();
    assert_eq!(
        conn.getinfo(info::DATA_SOURCE_NAME).await.unwrap(),
        Value::from("main")
    );
    conn.close().await.unwrap();
}
