//! MySQL persistence for per-call leg timelines.
//!
//! One table, one statement: `call_leg_timelines` (name configurable) is
//! upserted keyed by `call_id`, with a duplicate key updating every non-key
//! column to the new values. The layer is intentionally thin — it reports
//! through `anyhow` and the engine decides what a failure means for the run.

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;

/// Column values for one leg of a call
#[derive(Debug, Clone, Default)]
pub struct LegColumns {
    pub status: Option<String>,
    pub number: Option<String>,
    pub channel: Option<String>,
    pub paired_channel: Option<String>,
    pub peer: Option<String>,
    pub caller: Option<String>,
    pub dial_string: Option<String>,
    pub answered_by: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub answer: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

/// One row of the summary table
#[derive(Debug, Clone)]
pub struct CallLegRow {
    pub call_id: String,
    pub recording_path: Option<String>,
    pub leg_a: LegColumns,
    pub leg_b: LegColumns,
}

/// Async database manager over a MySQL connection pool
#[derive(Clone)]
pub struct DatabaseManager {
    pool: MySqlPool,
    table: String,
}

impl DatabaseManager {
    /// Connect and make sure the summary table exists.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url())
            .await
            .map_err(|e| anyhow!("failed to connect to MySQL at {}: {e}", config.host))?;

        let manager = Self { pool, table: config.table.clone() };
        manager.ensure_schema().await?;
        info!(table = %config.table, "🗄 Summary persistence initialised");
        Ok(manager)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS `{table}` (\
                 call_id VARCHAR(64) PRIMARY KEY,\
                 recording_path TEXT NULL,\
                 {leg_a},\
                 {leg_b},\
                 created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP\
             )",
            table = self.table,
            leg_a = leg_ddl("leg_a"),
            leg_b = leg_ddl("leg_b"),
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("failed to ensure table {}: {e}", self.table))?;
        Ok(())
    }

    /// Insert or update both legs of a call.
    pub async fn upsert_call_legs(&self, row: &CallLegRow) -> Result<()> {
        let columns: Vec<String> = std::iter::once("call_id".to_string())
            .chain(std::iter::once("recording_path".to_string()))
            .chain(LEG_FIELDS.iter().map(|f| format!("leg_a_{f}")))
            .chain(LEG_FIELDS.iter().map(|f| format!("leg_b_{f}")))
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let updates = columns
            .iter()
            .skip(1) // every non-key column
            .map(|c| format!("{c} = VALUES({c})"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO `{table}` ({cols}) VALUES ({placeholders}) \
             ON DUPLICATE KEY UPDATE {updates}",
            table = self.table,
            cols = columns.join(", "),
        );

        let mut query = sqlx::query(&sql)
            .bind(&row.call_id)
            .bind(&row.recording_path);
        query = bind_leg(query, &row.leg_a);
        query = bind_leg(query, &row.leg_b);
        query
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("upsert for call {} failed: {e}", row.call_id))?;
        debug!(call_id = %row.call_id, "Upserted call leg timelines");
        Ok(())
    }
}

const LEG_FIELDS: &[&str] = &[
    "status",
    "number",
    "channel",
    "paired_channel",
    "peer",
    "caller",
    "dial_string",
    "answered_by",
    "start",
    "answer",
    "end",
];

fn leg_ddl(prefix: &str) -> String {
    format!(
        "{p}_status VARCHAR(255) NULL,\
         {p}_number VARCHAR(255) NULL,\
         {p}_channel VARCHAR(255) NULL,\
         {p}_paired_channel VARCHAR(255) NULL,\
         {p}_peer VARCHAR(255) NULL,\
         {p}_caller VARCHAR(255) NULL,\
         {p}_dial_string VARCHAR(255) NULL,\
         {p}_answered_by VARCHAR(255) NULL,\
         {p}_start DATETIME NULL,\
         {p}_answer DATETIME NULL,\
         {p}_end DATETIME NULL",
        p = prefix
    )
}

fn bind_leg<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    leg: &'q LegColumns,
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    query
        .bind(&leg.status)
        .bind(&leg.number)
        .bind(&leg.channel)
        .bind(&leg.paired_channel)
        .bind(&leg.peer)
        .bind(&leg.caller)
        .bind(&leg.dial_string)
        .bind(&leg.answered_by)
        .bind(leg.start)
        .bind(leg.answer)
        .bind(leg.end)
}
