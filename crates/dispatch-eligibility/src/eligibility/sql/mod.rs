//! SQL persistence for records, facts and compiled eligibility queries.
//!
//! Everything here goes through the sqlx `Any` driver: production runs on
//! Postgres, local runs and tests on SQLite. The statements the compiler
//! renders are executed as-is on either backend.

mod query;
mod records;
mod store;

pub use query::SqlEligibleWorkerQuery;
pub use records::SqlDispatchRecords;
pub use store::SqlFactStore;

use sqlx::any::{Any, AnyArguments, AnyPoolOptions};
use sqlx::AnyPool;
use sqlx::query::Query;
use tracing::info;

use super::compiler::render::SqlParam;
use super::records::WORKER_TABLE;
use super::store::FACT_TABLE;

pub(crate) const JOB_TABLE: &str = "dispatch_jobs";
pub(crate) const BAN_TABLE: &str = "worker_bans";
pub(crate) const DO_NOT_CALL_TABLE: &str = "worker_do_not_call";
pub(crate) const HOLD_TABLE: &str = "employer_holds";

/// Open a pool for `url` (`postgres://...`, `sqlite://...` or `sqlite::memory:`).
///
/// An in-memory SQLite database lives and dies with its connection, so the
/// pool is pinned to one connection that never expires.
pub async fn connect(url: &str, max_connections: u32) -> Result<AnyPool, sqlx::Error> {
    sqlx::any::install_default_drivers();

    let options = if is_memory_url(url) {
        AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        AnyPoolOptions::new().max_connections(max_connections.max(1))
    };

    options.connect(url).await
}

fn is_memory_url(url: &str) -> bool {
    url.starts_with("sqlite::memory:") || url.contains("mode=memory")
}

/// Create the record and fact tables when they are missing.
///
/// Dates are stored as ISO-8601 text and job eligibility settings as JSON
/// text, so the same DDL is valid on Postgres and SQLite. Readers cast to
/// text, so upstream tables using `DATE`/`JSONB` columns work as well.
pub async fn ensure_schema(pool: &AnyPool) -> Result<(), sqlx::Error> {
    let statements = [
        format!(
            "CREATE TABLE IF NOT EXISTS {table} ({id} TEXT PRIMARY KEY, {name} TEXT NOT NULL, {status} TEXT NOT NULL)",
            table = WORKER_TABLE.table,
            id = WORKER_TABLE.id_column,
            name = WORKER_TABLE.display_name_column,
            status = WORKER_TABLE.work_status_column,
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {JOB_TABLE} (id TEXT PRIMARY KEY, employer_id TEXT NOT NULL, title TEXT NOT NULL, eligibility TEXT NOT NULL DEFAULT '{{}}')"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {BAN_TABLE} (id TEXT PRIMARY KEY, worker_id TEXT NOT NULL, ban_type TEXT NOT NULL, start_date TEXT NOT NULL, end_date TEXT)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{BAN_TABLE}_worker ON {BAN_TABLE} (worker_id)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {DO_NOT_CALL_TABLE} (id TEXT PRIMARY KEY, worker_id TEXT NOT NULL, employer_id TEXT NOT NULL, start_date TEXT NOT NULL, end_date TEXT)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{DO_NOT_CALL_TABLE}_worker ON {DO_NOT_CALL_TABLE} (worker_id)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {HOLD_TABLE} (id TEXT PRIMARY KEY, worker_id TEXT NOT NULL, employer_id TEXT NOT NULL, start_date TEXT NOT NULL, end_date TEXT)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{HOLD_TABLE}_worker ON {HOLD_TABLE} (worker_id)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {table} ({worker} TEXT NOT NULL, {category} TEXT NOT NULL, {value} TEXT NOT NULL, PRIMARY KEY ({worker}, {category}, {value}))",
            table = FACT_TABLE.table,
            worker = FACT_TABLE.worker_column,
            category = FACT_TABLE.category_column,
            value = FACT_TABLE.value_column,
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_category ON {table} ({category}, {value})",
            table = FACT_TABLE.table,
            category = FACT_TABLE.category_column,
            value = FACT_TABLE.value_column,
        ),
    ];

    for statement in &statements {
        sqlx::query(statement).execute(pool).await?;
    }

    info!(tables = 6, "eligibility schema ensured");
    Ok(())
}

/// Attach rendered parameters in placeholder order (`$1`, `$2`, ...).
pub fn bind_params<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[SqlParam],
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(value) => query.bind(value.clone()),
            SqlParam::Integer(value) => query.bind(*value),
        };
    }
    query
}
