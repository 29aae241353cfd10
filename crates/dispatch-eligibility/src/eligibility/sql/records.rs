use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::any::AnyRow;
use sqlx::AnyPool;
use sqlx::Row;

use super::{BAN_TABLE, DO_NOT_CALL_TABLE, HOLD_TABLE, JOB_TABLE};
use crate::eligibility::domain::{EmployerId, JobId, WorkerId};
use crate::eligibility::records::{
    BanType, DispatchJob, DispatchRecords, DoNotCall, EmployerHold, JobEligibilityConfig,
    RecordsError, Worker, WorkerBan, WORKER_TABLE,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Upstream record tables read through a shared pool.
///
/// The write helpers exist for seeding and tests; in production the owning
/// services write these tables and publish events afterwards.
#[derive(Debug, Clone)]
pub struct SqlDispatchRecords {
    pool: AnyPool,
}

impl SqlDispatchRecords {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_worker(&self, worker: &Worker) -> Result<(), RecordsError> {
        let sql = format!(
            "INSERT INTO {table} ({id}, {name}, {status}) VALUES ($1, $2, $3) \
             ON CONFLICT ({id}) DO UPDATE SET {name} = excluded.{name}, {status} = excluded.{status}",
            table = WORKER_TABLE.table,
            id = WORKER_TABLE.id_column,
            name = WORKER_TABLE.display_name_column,
            status = WORKER_TABLE.work_status_column,
        );
        sqlx::query(&sql)
            .bind(worker.id.as_str().to_string())
            .bind(worker.display_name.clone())
            .bind(worker.work_status.clone())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_job(&self, job: &DispatchJob) -> Result<(), RecordsError> {
        let eligibility =
            serde_json::to_string(&job.eligibility).map_err(|err| RecordsError::Corrupt {
                table: JOB_TABLE,
                id: job.id.to_string(),
                reason: err.to_string(),
            })?;
        let sql = format!(
            "INSERT INTO {JOB_TABLE} (id, employer_id, title, eligibility) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET employer_id = excluded.employer_id, title = excluded.title, eligibility = excluded.eligibility"
        );
        sqlx::query(&sql)
            .bind(job.id.as_str().to_string())
            .bind(job.employer_id.as_str().to_string())
            .bind(job.title.clone())
            .bind(eligibility)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn save_ban(&self, ban: &WorkerBan) -> Result<(), RecordsError> {
        let sql = format!(
            "INSERT INTO {BAN_TABLE} (id, worker_id, ban_type, start_date, end_date) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET worker_id = excluded.worker_id, ban_type = excluded.ban_type, \
             start_date = excluded.start_date, end_date = excluded.end_date"
        );
        sqlx::query(&sql)
            .bind(ban.id.clone())
            .bind(ban.worker_id.as_str().to_string())
            .bind(ban_type_label(ban.ban_type).to_string())
            .bind(format_date(ban.start_date))
            .bind(ban.end_date.map(format_date))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_ban(&self, id: &str) -> Result<bool, RecordsError> {
        self.delete_from(BAN_TABLE, id).await
    }

    pub async fn save_do_not_call(&self, record: &DoNotCall) -> Result<(), RecordsError> {
        self.save_employer_scoped(
            DO_NOT_CALL_TABLE,
            &record.id,
            &record.worker_id,
            &record.employer_id,
            record.start_date,
            record.end_date,
        )
        .await
    }

    pub async fn delete_do_not_call(&self, id: &str) -> Result<bool, RecordsError> {
        self.delete_from(DO_NOT_CALL_TABLE, id).await
    }

    pub async fn save_hold(&self, hold: &EmployerHold) -> Result<(), RecordsError> {
        self.save_employer_scoped(
            HOLD_TABLE,
            &hold.id,
            &hold.worker_id,
            &hold.employer_id,
            hold.start_date,
            hold.end_date,
        )
        .await
    }

    pub async fn delete_hold(&self, id: &str) -> Result<bool, RecordsError> {
        self.delete_from(HOLD_TABLE, id).await
    }

    async fn save_employer_scoped(
        &self,
        table: &'static str,
        id: &str,
        worker_id: &WorkerId,
        employer_id: &EmployerId,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> Result<(), RecordsError> {
        let sql = format!(
            "INSERT INTO {table} (id, worker_id, employer_id, start_date, end_date) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET worker_id = excluded.worker_id, employer_id = excluded.employer_id, \
             start_date = excluded.start_date, end_date = excluded.end_date"
        );
        sqlx::query(&sql)
            .bind(id.to_string())
            .bind(worker_id.as_str().to_string())
            .bind(employer_id.as_str().to_string())
            .bind(format_date(start_date))
            .bind(end_date.map(format_date))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_from(&self, table: &'static str, id: &str) -> Result<bool, RecordsError> {
        let sql = format!("DELETE FROM {table} WHERE id = $1");
        let result = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_rows(
        &self,
        sql: &str,
        worker_id: Option<&WorkerId>,
    ) -> Result<Vec<AnyRow>, RecordsError> {
        let query = sqlx::query(sql);
        let query = match worker_id {
            Some(id) => query.bind(id.as_str().to_string()),
            None => query,
        };
        Ok(query.fetch_all(&self.pool).await?)
    }

    fn ban_sql(filtered: bool) -> String {
        format!(
            "SELECT id, worker_id, ban_type, CAST(start_date AS TEXT) AS start_date, CAST(end_date AS TEXT) AS end_date \
             FROM {BAN_TABLE}{} ORDER BY id",
            if filtered { " WHERE worker_id = $1" } else { "" }
        )
    }

    fn employer_scoped_sql(table: &'static str, filtered: bool) -> String {
        format!(
            "SELECT id, worker_id, employer_id, CAST(start_date AS TEXT) AS start_date, CAST(end_date AS TEXT) AS end_date \
             FROM {table}{} ORDER BY id",
            if filtered { " WHERE worker_id = $1" } else { "" }
        )
    }

    fn worker_sql(filtered: bool) -> String {
        format!(
            "SELECT {id}, {name}, {status} FROM {table}{filter} ORDER BY {id}",
            table = WORKER_TABLE.table,
            id = WORKER_TABLE.id_column,
            name = WORKER_TABLE.display_name_column,
            status = WORKER_TABLE.work_status_column,
            filter = if filtered {
                format!(" WHERE {} = $1", WORKER_TABLE.id_column)
            } else {
                String::new()
            },
        )
    }
}

fn ban_type_label(ban_type: BanType) -> &'static str {
    match ban_type {
        BanType::Dispatch => "dispatch",
        BanType::Benefits => "benefits",
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(table: &'static str, id: &str, raw: &str) -> Result<NaiveDate, RecordsError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|err| RecordsError::Corrupt {
        table,
        id: id.to_string(),
        reason: format!("bad date '{raw}': {err}"),
    })
}

fn worker_from_row(row: &AnyRow) -> Result<Worker, RecordsError> {
    Ok(Worker {
        id: WorkerId::new(row.try_get::<String, _>(0)?),
        display_name: row.try_get(1)?,
        work_status: row.try_get(2)?,
    })
}

fn window_from_row(
    table: &'static str,
    id: &str,
    row: &AnyRow,
) -> Result<(NaiveDate, Option<NaiveDate>), RecordsError> {
    let start: String = row.try_get("start_date")?;
    let end: Option<String> = row.try_get("end_date")?;
    let start_date = parse_date(table, id, &start)?;
    let end_date = end
        .as_deref()
        .map(|raw| parse_date(table, id, raw))
        .transpose()?;
    Ok((start_date, end_date))
}

fn ban_from_row(row: &AnyRow) -> Result<WorkerBan, RecordsError> {
    let id: String = row.try_get("id")?;
    let raw_type: String = row.try_get("ban_type")?;
    let ban_type = match raw_type.as_str() {
        "dispatch" => BanType::Dispatch,
        "benefits" => BanType::Benefits,
        other => {
            return Err(RecordsError::Corrupt {
                table: BAN_TABLE,
                id,
                reason: format!("unknown ban type '{other}'"),
            })
        }
    };
    let (start_date, end_date) = window_from_row(BAN_TABLE, &id, row)?;
    Ok(WorkerBan {
        worker_id: WorkerId::new(row.try_get::<String, _>("worker_id")?),
        id,
        ban_type,
        start_date,
        end_date,
    })
}

fn do_not_call_from_row(row: &AnyRow) -> Result<DoNotCall, RecordsError> {
    let id: String = row.try_get("id")?;
    let (start_date, end_date) = window_from_row(DO_NOT_CALL_TABLE, &id, row)?;
    Ok(DoNotCall {
        worker_id: WorkerId::new(row.try_get::<String, _>("worker_id")?),
        employer_id: EmployerId::new(row.try_get::<String, _>("employer_id")?),
        id,
        start_date,
        end_date,
    })
}

fn hold_from_row(row: &AnyRow) -> Result<EmployerHold, RecordsError> {
    let id: String = row.try_get("id")?;
    let (start_date, end_date) = window_from_row(HOLD_TABLE, &id, row)?;
    Ok(EmployerHold {
        worker_id: WorkerId::new(row.try_get::<String, _>("worker_id")?),
        employer_id: EmployerId::new(row.try_get::<String, _>("employer_id")?),
        id,
        start_date,
        end_date,
    })
}

fn job_from_row(row: &AnyRow) -> Result<DispatchJob, RecordsError> {
    let id: String = row.try_get("id")?;
    let raw: String = row.try_get("eligibility")?;
    let eligibility: JobEligibilityConfig =
        serde_json::from_str(&raw).map_err(|err| RecordsError::Corrupt {
            table: JOB_TABLE,
            id: id.clone(),
            reason: format!("eligibility settings are not valid JSON: {err}"),
        })?;
    Ok(DispatchJob {
        id: JobId::new(id),
        employer_id: EmployerId::new(row.try_get::<String, _>("employer_id")?),
        title: row.try_get("title")?,
        eligibility,
    })
}

fn collect<T>(
    rows: Vec<AnyRow>,
    map: fn(&AnyRow) -> Result<T, RecordsError>,
) -> Result<Vec<T>, RecordsError> {
    rows.iter().map(map).collect()
}

#[async_trait]
impl DispatchRecords for SqlDispatchRecords {
    async fn worker(&self, id: &WorkerId) -> Result<Option<Worker>, RecordsError> {
        let rows = self.fetch_rows(&Self::worker_sql(true), Some(id)).await?;
        rows.first().map(worker_from_row).transpose()
    }

    async fn workers(&self) -> Result<Vec<Worker>, RecordsError> {
        let rows = self.fetch_rows(&Self::worker_sql(false), None).await?;
        collect(rows, worker_from_row)
    }

    async fn job(&self, id: &JobId) -> Result<Option<DispatchJob>, RecordsError> {
        let sql = format!(
            "SELECT id, employer_id, title, CAST(eligibility AS TEXT) AS eligibility FROM {JOB_TABLE} WHERE id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_str().to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn bans_for_worker(&self, id: &WorkerId) -> Result<Vec<WorkerBan>, RecordsError> {
        let rows = self.fetch_rows(&Self::ban_sql(true), Some(id)).await?;
        collect(rows, ban_from_row)
    }

    async fn bans(&self) -> Result<Vec<WorkerBan>, RecordsError> {
        let rows = self.fetch_rows(&Self::ban_sql(false), None).await?;
        collect(rows, ban_from_row)
    }

    async fn do_not_call_for_worker(&self, id: &WorkerId) -> Result<Vec<DoNotCall>, RecordsError> {
        let sql = Self::employer_scoped_sql(DO_NOT_CALL_TABLE, true);
        let rows = self.fetch_rows(&sql, Some(id)).await?;
        collect(rows, do_not_call_from_row)
    }

    async fn do_not_call(&self) -> Result<Vec<DoNotCall>, RecordsError> {
        let sql = Self::employer_scoped_sql(DO_NOT_CALL_TABLE, false);
        let rows = self.fetch_rows(&sql, None).await?;
        collect(rows, do_not_call_from_row)
    }

    async fn holds_for_worker(&self, id: &WorkerId) -> Result<Vec<EmployerHold>, RecordsError> {
        let sql = Self::employer_scoped_sql(HOLD_TABLE, true);
        let rows = self.fetch_rows(&sql, Some(id)).await?;
        collect(rows, hold_from_row)
    }

    async fn holds(&self) -> Result<Vec<EmployerHold>, RecordsError> {
        let sql = Self::employer_scoped_sql(HOLD_TABLE, false);
        let rows = self.fetch_rows(&sql, None).await?;
        collect(rows, hold_from_row)
    }
}
