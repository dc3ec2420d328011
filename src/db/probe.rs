//! Read-only queries against the monitored database.
//!
//! The health checks never talk to sqlx directly; they consume the
//! [`TimestampSource`] and [`ProcedureSource`] traits, which [`PgProbe`]
//! implements against a Postgres pool.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::types::{BigDecimal, Uuid};
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::{debug, warn};

use crate::server::config::{ProcedureSpec, ProcedureTarget, TimestampTarget};

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// The latest activity value exactly as the database handed it back.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    Utc(DateTime<Utc>),
    Naive(NaiveDateTime),
    Date(NaiveDate),
    Text(String),
    Null,
}

/// First result row of a procedure: column names and rendered values in
/// the order the database returned them.
pub type ResultRow = Vec<(String, String)>;

/// Outcome of running a single procedure. `Err` carries the failure message
/// so one broken procedure does not abort the batch.
pub type ProcedureRun = Result<Option<ResultRow>, String>;

#[async_trait]
pub trait TimestampSource: Send + Sync {
    /// Returns `None` when the table has no rows.
    async fn fetch_latest_timestamp(&self) -> Result<Option<RawTimestamp>, ProbeError>;
}

#[async_trait]
pub trait ProcedureSource: Send + Sync {
    /// Runs every procedure in order, returning one [`ProcedureRun`] per spec.
    async fn run_procedures(&self, procedures: &[ProcedureSpec]) -> Result<Vec<ProcedureRun>, ProbeError>;
}

pub struct PgProbe {
    pool: PgPool,
    timestamp: Option<TimestampTarget>,
    call_template: String,
}

impl PgProbe {
    pub fn new(pool: PgPool, timestamp: Option<TimestampTarget>, procedure: Option<&ProcedureTarget>) -> Self {
        Self {
            pool,
            timestamp,
            call_template: procedure
                .map(|p| p.call_template.clone())
                .unwrap_or_else(|| "SELECT * FROM {procedure}()".to_string()),
        }
    }

    fn latest_timestamp_query(target: &TimestampTarget) -> String {
        format!(
            "SELECT {column} FROM {table} ORDER BY {column} DESC LIMIT 1",
            column = target.column,
            table = target.table
        )
    }

    fn procedure_query(&self, procedure: &str) -> String {
        self.call_template.replace("{procedure}", procedure)
    }
}

#[async_trait]
impl TimestampSource for PgProbe {
    async fn fetch_latest_timestamp(&self) -> Result<Option<RawTimestamp>, ProbeError> {
        let Some(target) = &self.timestamp else {
            return Err(ProbeError::DatabaseError(sqlx::Error::Configuration(
                "no activity table configured".into(),
            )));
        };

        let sql = Self::latest_timestamp_query(target);
        debug!(query = %sql, "Fetching latest activity timestamp.");
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| decode_timestamp(&r)))
    }
}

/// Executes one statement and returns its first row, rendered.
#[async_trait]
trait StatementRunner: Send {
    async fn first_row(&mut self, sql: &str) -> Result<Option<ResultRow>, sqlx::Error>;
}

#[async_trait]
impl StatementRunner for PoolConnection<Postgres> {
    async fn first_row(&mut self, sql: &str) -> Result<Option<ResultRow>, sqlx::Error> {
        let row = sqlx::query(sql).fetch_optional(&mut **self).await?;
        Ok(row.as_ref().map(render_row))
    }
}

impl PgProbe {
    async fn run_batch<R: StatementRunner>(&self, runner: &mut R, procedures: &[ProcedureSpec]) -> Vec<ProcedureRun> {
        let mut runs = Vec::with_capacity(procedures.len());

        for spec in procedures {
            let sql = self.procedure_query(&spec.procedure);
            debug!(procedure = %spec.procedure, query = %sql, "Executing stored procedure.");
            match runner.first_row(&sql).await {
                Ok(row) => runs.push(Ok(row)),
                Err(e) => {
                    warn!(procedure = %spec.procedure, error = %e, "Stored procedure failed.");
                    runs.push(Err(e.to_string()));
                }
            }
        }

        runs
    }
}

#[async_trait]
impl ProcedureSource for PgProbe {
    async fn run_procedures(&self, procedures: &[ProcedureSpec]) -> Result<Vec<ProcedureRun>, ProbeError> {
        // One connection for the whole batch; it goes back to the pool when dropped.
        let mut conn = self.pool.acquire().await?;
        Ok(self.run_batch(&mut conn, procedures).await)
    }
}

fn decode_timestamp(row: &PgRow) -> RawTimestamp {
    match row.try_get_raw(0) {
        Ok(value) if value.is_null() => return RawTimestamp::Null,
        Err(_) => return RawTimestamp::Null,
        Ok(_) => {}
    }
    if let Ok(ts) = row.try_get::<DateTime<Utc>, _>(0) {
        return RawTimestamp::Utc(ts);
    }
    if let Ok(ts) = row.try_get::<NaiveDateTime, _>(0) {
        return RawTimestamp::Naive(ts);
    }
    if let Ok(date) = row.try_get::<NaiveDate, _>(0) {
        return RawTimestamp::Date(date);
    }
    match row.try_get::<String, _>(0) {
        Ok(text) => RawTimestamp::Text(text),
        Err(_) => RawTimestamp::Null,
    }
}

fn render_row(row: &PgRow) -> ResultRow {
    row.columns()
        .iter()
        .map(|column| (column.name().to_string(), render_cell(row, column.ordinal(), column.type_info().name())))
        .collect()
}

/// How a result cell is decoded before it is compared against the OK value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Text,
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Json,
    /// Enums, domains and anything else: read the wire bytes as text.
    Other,
}

impl CellKind {
    fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => CellKind::Text,
            "BOOL" => CellKind::Bool,
            "INT2" => CellKind::Int2,
            "INT4" => CellKind::Int4,
            "INT8" => CellKind::Int8,
            "FLOAT4" => CellKind::Float4,
            "FLOAT8" => CellKind::Float8,
            "NUMERIC" => CellKind::Numeric,
            "UUID" => CellKind::Uuid,
            "TIMESTAMPTZ" => CellKind::TimestampTz,
            "TIMESTAMP" => CellKind::Timestamp,
            "DATE" => CellKind::Date,
            "JSON" | "JSONB" => CellKind::Json,
            _ => CellKind::Other,
        }
    }
}

fn render_cell(row: &PgRow, index: usize, type_name: &str) -> String {
    match row.try_get_raw(index) {
        Ok(value) if value.is_null() => return "NULL".to_string(),
        Err(e) => return format!("<unreadable: {e}>"),
        Ok(_) => {}
    }

    let rendered = match CellKind::from_type_name(type_name) {
        CellKind::Text => row.try_get::<String, _>(index).ok(),
        CellKind::Bool => row.try_get::<bool, _>(index).ok().map(|v| v.to_string()),
        CellKind::Int2 => row.try_get::<i16, _>(index).ok().map(|v| v.to_string()),
        CellKind::Int4 => row.try_get::<i32, _>(index).ok().map(|v| v.to_string()),
        CellKind::Int8 => row.try_get::<i64, _>(index).ok().map(|v| v.to_string()),
        CellKind::Float4 => row.try_get::<f32, _>(index).ok().map(|v| v.to_string()),
        CellKind::Float8 => row.try_get::<f64, _>(index).ok().map(|v| v.to_string()),
        CellKind::Numeric => row.try_get::<BigDecimal, _>(index).ok().map(|v| v.to_string()),
        CellKind::Uuid => row.try_get::<Uuid, _>(index).ok().map(|v| v.to_string()),
        CellKind::TimestampTz => row.try_get::<DateTime<Utc>, _>(index).ok().map(|v| v.to_rfc3339()),
        CellKind::Timestamp => row.try_get::<NaiveDateTime, _>(index).ok().map(|v| v.to_string()),
        CellKind::Date => row.try_get::<NaiveDate, _>(index).ok().map(|v| v.to_string()),
        CellKind::Json => row.try_get::<serde_json::Value, _>(index).ok().map(|v| v.to_string()),
        CellKind::Other => row.try_get_unchecked::<String, _>(index).ok().and_then(printable),
    };

    rendered.unwrap_or_else(|| format!("<unsupported {type_name}>"))
}

/// Keeps text that is safe to show; binary encodings of unknown types usually are not.
fn printable(text: String) -> Option<String> {
    if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        None
    } else {
        Some(text)
    }
}
