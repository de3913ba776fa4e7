// src/db/mod.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::models::ReportRow;

const PARTITION_COLUMN: &str = "report_date";

// --- Sink contract ---

/// Idempotent write path for report rows.
///
/// `replace_partition` removes every row of `table` whose `report_date`
/// equals `report_date` and inserts `rows`, atomically. Calling it again with
/// the same input leaves the table unchanged.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn replace_partition(
        &self,
        table: &str,
        report_date: NaiveDate,
        rows: &[ReportRow],
    ) -> Result<PartitionWrite, SinkError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionWrite {
    pub deleted: u64,
    pub inserted: u64,
}

// --- PostgreSQL ---

pub async fn init_db_pool(database_url: &str, max_connections: u32) -> Result<PgPool, SinkError> {
    info!("Attempting to connect to PostgreSQL...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    info!("Successfully connected to PostgreSQL!");

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations executed successfully.");

    Ok(pool)
}

#[derive(Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportSink for PgSink {
    async fn replace_partition(
        &self,
        table: &str,
        report_date: NaiveDate,
        rows: &[ReportRow],
    ) -> Result<PartitionWrite, SinkError> {
        let table = quote_identifier(table)?;
        let columns = insert_columns(rows)?;

        // Dropping `tx` without commit rolls both statements back.
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(&format!(
            "DELETE FROM {table} WHERE {PARTITION_COLUMN} = $1"
        ))
        .bind(report_date)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let inserted = if rows.is_empty() {
            0
        } else {
            let payload = Value::Array(rows.iter().cloned().map(Value::Object).collect());
            sqlx::query(&format!(
                "INSERT INTO {table} ({columns}) SELECT {columns} FROM jsonb_populate_recordset(NULL::{table}, $1)"
            ))
            .bind(payload)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        };

        tx.commit().await?;
        debug!(%table, %report_date, deleted, inserted, "partition replaced");

        Ok(PartitionWrite { deleted, inserted })
    }
}

// --- Identifiers ---

/// Plain SQL identifier, optionally schema-qualified (`schema.table`).
pub fn is_valid_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|part| is_valid_name(part))
}

fn is_valid_name(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    part.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn quote_identifier(name: &str) -> Result<String, SinkError> {
    if !is_valid_identifier(name) {
        return Err(SinkError::InvalidIdentifier(name.to_string()));
    }
    Ok(name
        .split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join("."))
}

/// Quoted, comma-joined union of every key present in `rows`.
fn insert_columns(rows: &[ReportRow]) -> Result<String, SinkError> {
    let names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    let mut quoted = Vec::with_capacity(names.len());
    for name in names {
        if !is_valid_name(name) {
            return Err(SinkError::InvalidIdentifier(name.to_string()));
        }
        quoted.push(format!("\"{name}\""));
    }
    Ok(quoted.join(", "))
}
