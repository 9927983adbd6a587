//! SQLite storage backend for FinPortal.

use std::sync::{Arc, Mutex};

use finportal_core::{
    BusinessUnit, Connector, Credentials, FinancialSubmission, StorageBackend, StorageError,
};
use rusqlite::{params, Connection, ErrorCode};
use time::OffsetDateTime;

const SELECT_COLUMNS: &str = "SELECT submission_id, business_unit, submission_date, revenue, expenses,
        profit_margin, submitted_by, created_at
     FROM financial_submissions";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

type RawRow = (String, String, i64, f64, f64, f64, String, i64);

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS financial_submissions (
                submission_id TEXT PRIMARY KEY,
                business_unit TEXT NOT NULL,
                submission_date TIMESTAMP NOT NULL,
                revenue DOUBLE NOT NULL,
                expenses DOUBLE NOT NULL,
                profit_margin DOUBLE NOT NULL,
                submitted_by TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_submissions_date
                ON financial_submissions(submission_date);
            ",
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn query_rows(&self, sql: &str, limit: Option<i64>) -> Result<Vec<FinancialSubmission>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql).map_err(map_sqlite_err)?;

        let row_mapper = |row: &rusqlite::Row| -> rusqlite::Result<RawRow> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        };

        let rows: Vec<RawRow> = match limit {
            Some(limit) => stmt.query_map(params![limit], row_mapper),
            None => stmt.query_map([], row_mapper),
        }
        .map_err(map_sqlite_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_sqlite_err)?;

        rows.into_iter().map(raw_to_submission).collect()
    }
}

fn map_sqlite_err(e: rusqlite::Error) -> StorageError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StorageError::DuplicateKey(e.to_string()),
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) | Some(ErrorCode::SystemIoFailure) => {
            StorageError::Disconnected(e.to_string())
        }
        _ => StorageError::Other(e.to_string()),
    }
}

fn to_micros(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000) as i64
}

fn from_micros(micros: i64) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
        .map_err(|e| StorageError::Other(format!("Invalid timestamp: {}", e)))
}

fn raw_to_submission(raw: RawRow) -> Result<FinancialSubmission, StorageError> {
    let (id, unit, date, revenue, expenses, margin, by, created) = raw;
    Ok(FinancialSubmission {
        submission_id: Arc::from(id.as_str()),
        business_unit: unit
            .parse::<BusinessUnit>()
            .map_err(|e| StorageError::Other(e.to_string()))?,
        submission_date: from_micros(date)?,
        revenue,
        expenses,
        profit_margin: margin,
        submitted_by: Arc::from(by.as_str()),
        created_at: from_micros(created)?,
    })
}

impl StorageBackend for SqliteStorage {
    fn insert_submission(&self, record: &FinancialSubmission) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO financial_submissions
                (submission_id, business_unit, submission_date, revenue, expenses,
                 profit_margin, submitted_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.submission_id.as_ref(),
                record.business_unit.as_str(),
                to_micros(record.submission_date),
                record.revenue,
                record.expenses,
                record.profit_margin,
                record.submitted_by.as_ref(),
                to_micros(record.created_at),
            ],
        )
        .map_err(map_sqlite_err)?;
        tracing::debug!(submission_id = %record.submission_id, "SQLite row inserted");
        Ok(())
    }

    fn recent_submissions(&self, limit: usize) -> Result<Vec<FinancialSubmission>, StorageError> {
        let sql = format!("{} ORDER BY submission_date DESC, rowid DESC LIMIT ?1", SELECT_COLUMNS);
        self.query_rows(&sql, Some(limit as i64))
    }

    fn all_submissions(&self) -> Result<Vec<FinancialSubmission>, StorageError> {
        let sql = format!("{} ORDER BY rowid", SELECT_COLUMNS);
        self.query_rows(&sql, None)
    }

    fn ping(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(map_sqlite_err)?;
        Ok(())
    }
}

/// Opens a database file named by `http_path`; host and token are unused.
#[derive(Debug, Default)]
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let path = if credentials.http_path.is_empty() {
            ":memory:"
        } else {
            credentials.http_path.as_str()
        };
        let storage = SqliteStorage::new(path)?;
        tracing::info!(path, "SQLite connection established");
        Ok(Arc::new(storage))
    }
}
