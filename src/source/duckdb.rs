//! Embedded DuckDB row source

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value as DuckValue};
use serde_json::{Number, Value};
use tracing::{debug, info};

use crate::document::Document;

use super::{RowSource, SourceError, SourceResult, TableDescriptor};

/// Days from 0001-01-01 (CE day 1) to 1970-01-01
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

const LIST_TABLES_SQL: &str = "SELECT table_schema, table_name \
     FROM information_schema.tables \
     WHERE table_type = 'BASE TABLE' \
       AND table_schema NOT IN ('information_schema', 'pg_catalog') \
     ORDER BY table_name, table_schema";

/// Row source over a DuckDB database
pub struct DuckDbSource {
    conn: Option<duckdb::Connection>,
    path: Option<PathBuf>,
}

impl DuckDbSource {
    /// Open a database file
    pub fn open(path: impl AsRef<Path>) -> SourceResult<Self> {
        let path = path.as_ref();
        let conn = duckdb::Connection::open(path)
            .map_err(|e| SourceError::unavailable(path.display().to_string(), e))?;
        info!(path = %path.display(), "Opened DuckDB source");
        Ok(Self {
            conn: Some(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an empty in-memory database
    pub fn memory() -> SourceResult<Self> {
        let conn = duckdb::Connection::open_in_memory()
            .map_err(|e| SourceError::unavailable(":memory:", e))?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: duckdb::Connection) -> Self {
        Self {
            conn: Some(conn),
            path: None,
        }
    }

    fn conn(&self) -> SourceResult<&duckdb::Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| SourceError::unavailable(self.target(), "connection is closed"))
    }
}

/// Run a query and convert every row to a record
fn query_records(conn: &duckdb::Connection, sql: &str) -> Result<Vec<Document>, duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;

    let column_count = rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
    let column_names: Vec<String> = (0..column_count)
        .map(|i| {
            rows.as_ref()
                .and_then(|r| r.column_name(i).ok())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("col{i}"))
        })
        .collect();

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Document::new();
        for (i, name) in column_names.iter().enumerate() {
            let value: DuckValue = row.get(i)?;
            record.insert(name.clone(), to_json(value));
        }
        records.push(record);
    }
    Ok(records)
}

impl RowSource for DuckDbSource {
    fn target(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }

    fn list_tables(&self) -> SourceResult<Vec<TableDescriptor>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(LIST_TABLES_SQL)
            .map_err(|e| SourceError::unavailable(self.target(), e))?;
        let tables = stmt
            .query_map([], |row| {
                Ok(TableDescriptor::in_schema(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| SourceError::unavailable(self.target(), e))?;
        debug!(tables = tables.len(), "Listed DuckDB tables");
        Ok(tables)
    }

    fn extract(&self, table: &TableDescriptor) -> SourceResult<Vec<Document>> {
        let conn = self.conn()?;
        let sql = format!("SELECT * FROM {}", table.quoted());
        query_records(conn, &sql)
            .map_err(|e| SourceError::extraction(&table.name, e))
    }

    fn close(&mut self) -> SourceResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.close()
            .map_err(|(_, e)| SourceError::unavailable(self.target(), e))?;
        debug!(target_db = %self.target(), "Closed DuckDB source");
        Ok(())
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// Convert a DuckDB value to its JSON form
///
/// Timestamps become ISO-8601 strings without offset, dates `YYYY-MM-DD`,
/// decimals floats. Types with no natural JSON form fall back to their debug
/// rendering.
pub fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(n) => Value::from(n),
        DuckValue::SmallInt(n) => Value::from(n),
        DuckValue::Int(n) => Value::from(n),
        DuckValue::BigInt(n) => Value::from(n),
        DuckValue::HugeInt(n) => i64::try_from(n)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(n.to_string())),
        DuckValue::UTinyInt(n) => Value::from(n),
        DuckValue::USmallInt(n) => Value::from(n),
        DuckValue::UInt(n) => Value::from(n),
        DuckValue::UBigInt(n) => Value::from(n),
        DuckValue::Float(f) => float(f as f64),
        DuckValue::Double(f) => float(f),
        DuckValue::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(float)
            .unwrap_or_else(|_| Value::String(d.to_string())),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Timestamp(unit, v) => DateTime::from_timestamp_micros(to_micros(unit, v))
            .map(|dt| Value::String(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_CE_DAYS)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Time64(unit, v) => {
            let micros = to_micros(unit, v);
            let secs = u32::try_from(micros.div_euclid(1_000_000)).unwrap_or(0);
            let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).unwrap_or(0);
            NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))
                .unwrap_or(Value::Null)
        }
        DuckValue::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            Value::String(format!("\\x{hex}"))
        }
        DuckValue::List(items) => Value::Array(items.into_iter().map(to_json).collect()),
        other => Value::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> DuckDbSource {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE film (film_id INTEGER, title VARCHAR, length SMALLINT, rental_rate DECIMAL(4,2), last_update TIMESTAMP, release DATE);
             INSERT INTO film VALUES (1, 'ACADEMY DINOSAUR', 86, 0.99, TIMESTAMP '2013-05-26 14:50:58.951', DATE '2006-01-01');
             INSERT INTO film VALUES (2, 'ACE GOLDFINGER', 48, 4.99, NULL, NULL);
             CREATE TABLE actor (actor_id INTEGER, first_name VARCHAR);
             INSERT INTO actor VALUES (1, 'PENELOPE');
             CREATE VIEW short_films AS SELECT * FROM film WHERE length < 60;",
        )
        .unwrap();
        DuckDbSource::from_connection(conn)
    }

    #[test]
    fn test_list_tables_excludes_views() {
        let source = seeded();
        let names: Vec<String> = source
            .list_tables()
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["actor".to_string(), "film".to_string()]);
    }

    #[test]
    fn test_extract_converts_types() {
        let source = seeded();
        let rows = source
            .extract(&TableDescriptor::in_schema("main", "film"))
            .unwrap();
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first["film_id"], json!(1));
        assert_eq!(first["title"], json!("ACADEMY DINOSAUR"));
        assert_eq!(first["length"], json!(86));
        assert_eq!(first["rental_rate"], json!(0.99));
        assert_eq!(first["last_update"], json!("2013-05-26T14:50:58.951"));
        assert_eq!(first["release"], json!("2006-01-01"));
        assert_eq!(rows[1]["last_update"], Value::Null);
    }

    #[test]
    fn test_extract_unknown_table_is_per_table_error() {
        let source = seeded();
        let err = source
            .extract(&TableDescriptor::in_schema("main", "nope"))
            .unwrap_err();
        assert!(matches!(err, SourceError::Extraction { ref table, .. } if table == "nope"));
    }

    #[test]
    fn test_tables_in_other_schemas_load_separately() {
        let source = seeded();
        source
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE SCHEMA archive;
                 CREATE TABLE archive.film (film_id INTEGER);
                 INSERT INTO archive.film VALUES (99);",
            )
            .unwrap();

        let batches = crate::source::extract_all(&source).unwrap().into_batches();
        let mut names: Vec<&str> = batches.iter().map(|b| b.collection.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["actor", "archive.film", "film"]);

        let archived = batches
            .iter()
            .find(|b| b.collection == "archive.film")
            .unwrap();
        assert_eq!(archived.records, vec![json!({"film_id": 99})]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut source = seeded();
        source.close().unwrap();
        source.close().unwrap();
        assert!(matches!(
            source.list_tables(),
            Err(SourceError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.duckdb");
        {
            let conn = duckdb::Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (7);")
                .unwrap();
        }
        let source = DuckDbSource::open(&path).unwrap();
        assert_eq!(source.target(), path.display().to_string());
        let rows = source.extract(&TableDescriptor::in_schema("main", "t")).unwrap();
        assert_eq!(rows[0]["id"], json!(7));
    }

    #[test]
    fn test_to_json_fallbacks() {
        assert_eq!(to_json(DuckValue::HugeInt(5)), json!(5));
        assert_eq!(
            to_json(DuckValue::HugeInt(i128::MAX)),
            json!(i128::MAX.to_string())
        );
        assert_eq!(to_json(DuckValue::Double(f64::NAN)), Value::Null);
        assert_eq!(to_json(DuckValue::Blob(vec![0xde, 0xad])), json!("\\xdead"));
        assert_eq!(
            to_json(DuckValue::List(vec![DuckValue::Int(1), DuckValue::Null])),
            json!([1, null])
        );
    }
}
