//! PostgreSQL lock store via SeaORM
//!
//! Every mutation runs in one transaction that first locks the target row
//! with `SELECT ... FOR UPDATE`. Concurrent callers on the same name queue on
//! that row lock; the lock is released when the transaction ends.

mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pglock_core::{
    ExclusiveClaim, LockError, LockRow, LockStore, Result, RowUpdate, SharedLockEntry,
};
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend, FromQueryResult,
    Statement, TransactionTrait, Value,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::options::LockClientOptions;
use schema::LockQueries;

/// Lock row as selected from the table
#[derive(Debug, FromQueryResult)]
struct LockRecord {
    xlock_id: Option<String>,
    x_expires_at: Option<DateTime<Utc>>,
    shared_locks: Option<serde_json::Value>,
    max_shared_locks: Option<i32>,
}

impl LockRecord {
    fn into_row(self, name: &str) -> Result<LockRow> {
        // A holder without an expiry never counts as a claim
        let exclusive = match (self.xlock_id, self.x_expires_at) {
            (Some(lock_id), Some(expires_at)) => Some(ExclusiveClaim::new(lock_id, expires_at)),
            _ => None,
        };
        Ok(LockRow {
            name: name.to_string(),
            exclusive,
            shared: SharedLockEntry::decode_all(name, self.shared_locks.as_ref())?,
            max_shared_locks: self
                .max_shared_locks
                .unwrap_or(pglock_core::UNLIMITED_SHARED_LOCKS),
        })
    }
}

fn exclusive_values(row: &LockRow) -> (Value, Value) {
    match &row.exclusive {
        Some(claim) => (
            Some(claim.lock_id.clone()).into(),
            Some(claim.expires_at).into(),
        ),
        None => (None::<String>.into(), None::<DateTime<Utc>>.into()),
    }
}

/// `LockStore` backed by a PostgreSQL table
pub struct SqlLockStore {
    options: LockClientOptions,
    queries: LockQueries,
    db: OnceCell<DatabaseConnection>,
}

impl SqlLockStore {
    /// Create an unconnected store. Fails if the options are invalid.
    pub fn new(options: LockClientOptions) -> Result<Self> {
        let options = options.normalized();
        options.validate()?;
        let queries = LockQueries::new(&options.lock_table_name)?;
        Ok(Self {
            options,
            queries,
            db: OnceCell::new(),
        })
    }

    /// Wrap an existing connection, skipping `connect()`
    pub fn with_connection(db: DatabaseConnection, table: &str) -> Result<Self> {
        let queries = LockQueries::new(table)?;
        Ok(Self {
            options: LockClientOptions::default().with_table_name(table),
            queries,
            db: OnceCell::new_with(Some(db)),
        })
    }

    pub fn options(&self) -> &LockClientOptions {
        &self.options
    }

    pub fn table_name(&self) -> &str {
        &self.options.lock_table_name
    }

    pub fn is_connected(&self) -> bool {
        self.db.initialized()
    }

    /// Open the connection pool. Calling it again reuses the existing pool.
    pub async fn connect(&self) -> Result<&DatabaseConnection> {
        self.db
            .get_or_try_init(|| async {
                info!(
                    max_connections = self.options.max_open_connections,
                    min_connections = self.options.max_idle_connections,
                    connect_timeout = self.options.connect_timeout.as_secs(),
                    sqlx_logging = self.options.sqlx_logging,
                    "Database connection pool configured"
                );
                Database::connect(self.options.connect_options())
                    .await
                    .map_err(LockError::store)
            })
            .await
    }

    /// Create the lock table and its index if they do not exist
    pub async fn setup_tables(&self) -> Result<()> {
        let db = self.connection()?;
        db.execute_unprepared(&self.queries.create_table)
            .await
            .map_err(LockError::store)?;
        db.execute_unprepared(&self.queries.create_index)
            .await
            .map_err(LockError::store)?;
        info!(table = %self.table_name(), "Lock table ready");
        Ok(())
    }

    /// `connect()` followed by `setup_tables()`
    pub async fn initialize(&self) -> Result<()> {
        self.connect().await?;
        self.setup_tables().await
    }

    /// The open connection, or `NotConnected` before `connect()`
    pub fn connection(&self) -> Result<&DatabaseConnection> {
        self.db.get().ok_or(LockError::NotConnected)
    }

    fn statement(&self, sql: &str, values: impl IntoIterator<Item = Value>) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
    }

    async fn rollback(txn: DatabaseTransaction, name: &str) {
        if let Err(e) = txn.rollback().await {
            warn!(name = %name, error = %e, "Failed to roll back lock transaction");
        }
    }
}

#[async_trait]
impl LockStore for SqlLockStore {
    async fn insert_if_absent(&self, row: &LockRow) -> Result<bool> {
        let db = self.connection()?;
        let (xlock_id, x_expires_at) = exclusive_values(row);
        let shared_locks = SharedLockEntry::encode_all(&row.shared)?;

        let stmt = self.statement(
            &self.queries.insert_if_absent,
            [
                row.name.clone().into(),
                xlock_id,
                x_expires_at,
                shared_locks.into(),
                row.max_shared_locks.into(),
            ],
        );
        let result = db.execute(stmt).await.map_err(LockError::store)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_locked(&self, name: &str, apply: RowUpdate<'_>) -> Result<Option<bool>> {
        let db = self.connection()?;
        let txn = db.begin().await.map_err(LockError::store)?;

        let record = LockRecord::find_by_statement(
            self.statement(&self.queries.select_for_update, [name.into()]),
        )
        .one(&txn)
        .await;
        let record = match record {
            Ok(Some(record)) => record,
            Ok(None) => {
                Self::rollback(txn, name).await;
                return Ok(None);
            }
            Err(e) => {
                Self::rollback(txn, name).await;
                return Err(LockError::store(e));
            }
        };

        let mut row = match record.into_row(name) {
            Ok(row) => row,
            Err(e) => {
                Self::rollback(txn, name).await;
                return Err(e);
            }
        };

        if !apply(&mut row) {
            Self::rollback(txn, name).await;
            return Ok(Some(false));
        }

        let shared_locks = match SharedLockEntry::encode_all(&row.shared) {
            Ok(value) => value,
            Err(e) => {
                Self::rollback(txn, name).await;
                return Err(e);
            }
        };
        let (xlock_id, x_expires_at) = exclusive_values(&row);
        let stmt = self.statement(
            &self.queries.update,
            [xlock_id, x_expires_at, shared_locks.into(), name.into()],
        );
        if let Err(e) = txn.execute(stmt).await {
            Self::rollback(txn, name).await;
            return Err(LockError::store(e));
        }

        txn.commit().await.map_err(LockError::store)?;
        debug!(name = %name, "Lock row updated");
        Ok(Some(true))
    }

    async fn load(&self, name: &str) -> Result<Option<LockRow>> {
        let db = self.connection()?;
        let statement = self.statement(&self.queries.select, [name.into()]);
        let record = LockRecord::find_by_statement(statement)
            .one(db)
            .await
            .map_err(LockError::store)?;
        record.map(|record| record.into_row(name)).transpose()
    }
}
