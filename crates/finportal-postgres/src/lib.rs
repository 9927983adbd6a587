//! PostgreSQL storage backend for FinPortal.

use std::sync::{Arc, Mutex};

use finportal_core::{
    BusinessUnit, Connector, Credentials, FinancialSubmission, StorageBackend, StorageError,
};
use postgres::{error::SqlState, Client, Config, NoTls, Row};
use time::OffsetDateTime;

const SELECT_COLUMNS: &str = "SELECT submission_id, business_unit, submission_date, revenue, expenses,
        profit_margin, submitted_by, created_at
     FROM financial_submissions";

const DEFAULT_USER: &str = "postgres";

pub struct PostgresStorage {
    client: Mutex<Client>,
}

impl PostgresStorage {
    pub fn from_config(config: &Config) -> Result<Self, StorageError> {
        let client = config
            .connect(NoTls)
            .map_err(|e| StorageError::Connection(format!("PostgreSQL connection failed: {}", e)))?;

        let storage = Self {
            client: Mutex::new(client),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let mut client = self.client.lock().unwrap();
        client
            .batch_execute(
                "
            CREATE TABLE IF NOT EXISTS financial_submissions (
                submission_id TEXT PRIMARY KEY,
                business_unit TEXT NOT NULL,
                submission_date TIMESTAMP WITH TIME ZONE NOT NULL,
                revenue DOUBLE PRECISION NOT NULL,
                expenses DOUBLE PRECISION NOT NULL,
                profit_margin DOUBLE PRECISION NOT NULL,
                submitted_by TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pg_submissions_date
                ON financial_submissions(submission_date);
            ",
            )
            .map_err(map_pg_err)?;
        Ok(())
    }
}

fn map_pg_err(e: postgres::Error) -> StorageError {
    if e.is_closed() {
        return StorageError::Disconnected(e.to_string());
    }
    match e.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => StorageError::DuplicateKey(e.to_string()),
        Some(code) if *code == SqlState::ADMIN_SHUTDOWN || *code == SqlState::CONNECTION_FAILURE => {
            StorageError::Disconnected(e.to_string())
        }
        _ => StorageError::Other(e.to_string()),
    }
}

fn row_to_submission(row: &Row) -> Result<FinancialSubmission, StorageError> {
    let unit: String = row.try_get(1).map_err(map_pg_err)?;
    let id: String = row.try_get(0).map_err(map_pg_err)?;
    let by: String = row.try_get(6).map_err(map_pg_err)?;
    Ok(FinancialSubmission {
        submission_id: Arc::from(id.as_str()),
        business_unit: unit
            .parse::<BusinessUnit>()
            .map_err(|e| StorageError::Other(e.to_string()))?,
        submission_date: row.try_get::<_, OffsetDateTime>(2).map_err(map_pg_err)?,
        revenue: row.try_get(3).map_err(map_pg_err)?,
        expenses: row.try_get(4).map_err(map_pg_err)?,
        profit_margin: row.try_get(5).map_err(map_pg_err)?,
        submitted_by: Arc::from(by.as_str()),
        created_at: row.try_get::<_, OffsetDateTime>(7).map_err(map_pg_err)?,
    })
}

impl StorageBackend for PostgresStorage {
    fn insert_submission(&self, record: &FinancialSubmission) -> Result<(), StorageError> {
        let mut client = self.client.lock().unwrap();
        client
            .execute(
                "INSERT INTO financial_submissions
                    (submission_id, business_unit, submission_date, revenue, expenses,
                     profit_margin, submitted_by, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &record.submission_id.as_ref(),
                    &record.business_unit.as_str(),
                    &record.submission_date,
                    &record.revenue,
                    &record.expenses,
                    &record.profit_margin,
                    &record.submitted_by.as_ref(),
                    &record.created_at,
                ],
            )
            .map_err(map_pg_err)?;
        tracing::debug!(submission_id = %record.submission_id, "PostgreSQL row inserted");
        Ok(())
    }

    fn recent_submissions(&self, limit: usize) -> Result<Vec<FinancialSubmission>, StorageError> {
        let mut client = self.client.lock().unwrap();
        let sql = format!("{} ORDER BY submission_date DESC LIMIT $1", SELECT_COLUMNS);
        let rows = client.query(sql.as_str(), &[&(limit as i64)]).map_err(map_pg_err)?;
        rows.iter().map(row_to_submission).collect()
    }

    fn all_submissions(&self) -> Result<Vec<FinancialSubmission>, StorageError> {
        let mut client = self.client.lock().unwrap();
        let rows = client.query(SELECT_COLUMNS, &[]).map_err(map_pg_err)?;
        rows.iter().map(row_to_submission).collect()
    }

    fn ping(&self) -> Result<(), StorageError> {
        let mut client = self.client.lock().unwrap();
        client.simple_query("SELECT 1").map_err(map_pg_err)?;
        Ok(())
    }
}

/// Builds a client config from credentials: `host` is the server, `http_path`
/// is `dbname` or `user/dbname`, and the token is the password.
#[derive(Debug, Default)]
pub struct PostgresConnector;

impl PostgresConnector {
    pub fn config(credentials: &Credentials) -> Config {
        let path = credentials.http_path.trim_start_matches('/');
        let (user, dbname) = match path.split_once('/') {
            Some((user, dbname)) => (user, dbname),
            None => (DEFAULT_USER, path),
        };

        let mut config = Config::new();
        config.host(&credentials.host).user(user).dbname(dbname);
        if !credentials.access_token.is_empty() {
            config.password(&credentials.access_token);
        }
        config
    }
}

impl Connector for PostgresConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let storage = PostgresStorage::from_config(&Self::config(credentials))?;
        tracing::info!(host = %credentials.host, "PostgreSQL connection established");
        Ok(Arc::new(storage))
    }
}
