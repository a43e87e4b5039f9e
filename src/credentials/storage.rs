//! Integration record storage using SQLite.
//!
//! Rows are never hard-deleted: disconnecting flips `is_active` and a fresh
//! code exchange overwrites the row in place.

use super::{IntegrationRecord, NewIntegration, SealedToken};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SELECT_COLUMNS: &str = r#"
    SELECT agent_id, service,
           external_location_id, external_company_id,
           access_token, refresh_token, token_expires_at,
           location_name, company_name, is_active,
           created_at, updated_at
    FROM integrations
"#;

/// Integration records backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE integrations (
///     id INTEGER PRIMARY KEY,
///     agent_id INTEGER NOT NULL,
///     service TEXT NOT NULL,
///     external_location_id TEXT,
///     external_company_id TEXT,
///     access_token TEXT NOT NULL,       -- sealed
///     refresh_token TEXT NOT NULL,      -- sealed
///     token_expires_at TEXT NOT NULL,   -- RFC 3339
///     location_name TEXT,
///     company_name TEXT,
///     is_active INTEGER NOT NULL,
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(agent_id, service)
/// );
/// ```
///
/// The store does not check ownership. Callers verify that the agent belongs
/// to the requesting user before touching its record.
pub struct IntegrationStore {
    conn: Mutex<Connection>,
}

impl IntegrationStore {
    /// Creates or opens the store at `db_path` (`":memory:"` for tests).
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS integrations (
                id INTEGER PRIMARY KEY,
                agent_id INTEGER NOT NULL,
                service TEXT NOT NULL,
                external_location_id TEXT,
                external_company_id TEXT,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                token_expires_at TEXT NOT NULL,
                location_name TEXT,
                company_name TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(agent_id, service)
            );
            CREATE INDEX IF NOT EXISTS idx_integrations_agent ON integrations(agent_id, service);
            "#,
        )
        .context("Failed to create integrations table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Integration store lock poisoned"))
    }

    /// Returns the record for `agent_id`/`service` only if it is active.
    pub fn get_active(&self, agent_id: i64, service: &str) -> Result<Option<IntegrationRecord>> {
        Ok(self.get(agent_id, service)?.filter(|r| r.is_active))
    }

    /// Returns the record for `agent_id`/`service` whether active or not.
    pub fn get(&self, agent_id: i64, service: &str) -> Result<Option<IntegrationRecord>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE agent_id = ?1 AND service = ?2", SELECT_COLUMNS);

        let raw = conn
            .query_row(&sql, params![agent_id, service], RawRecord::from_row)
            .optional()
            .context("Failed to query integration")?;

        raw.map(RawRecord::into_record).transpose()
    }

    /// Inserts a record, or overwrites every mutable field of the existing one
    /// and marks it active again.
    pub fn upsert(&self, agent_id: i64, service: &str, new: &NewIntegration) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO integrations (
                    agent_id, service,
                    external_location_id, external_company_id,
                    access_token, refresh_token, token_expires_at,
                    location_name, company_name, is_active,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10)
                ON CONFLICT(agent_id, service) DO UPDATE SET
                    external_location_id = excluded.external_location_id,
                    external_company_id = excluded.external_company_id,
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    token_expires_at = excluded.token_expires_at,
                    location_name = excluded.location_name,
                    company_name = excluded.company_name,
                    is_active = 1,
                    updated_at = excluded.updated_at
                "#,
                params![
                    agent_id,
                    service,
                    new.external_location_id,
                    new.external_company_id,
                    new.access_token.as_str(),
                    new.refresh_token.as_str(),
                    new.token_expires_at.to_rfc3339(),
                    new.location_name,
                    new.company_name,
                    now,
                ],
            )
            .context("Failed to upsert integration")?;

        Ok(())
    }

    /// Replaces the token pair and expiry. `is_active` is left untouched.
    ///
    /// Returns `false` when no record exists.
    pub fn update_tokens(
        &self,
        agent_id: i64,
        service: &str,
        access_token: &SealedToken,
        refresh_token: &SealedToken,
        token_expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE integrations
                SET access_token = ?3, refresh_token = ?4, token_expires_at = ?5, updated_at = ?6
                WHERE agent_id = ?1 AND service = ?2
                "#,
                params![
                    agent_id,
                    service,
                    access_token.as_str(),
                    refresh_token.as_str(),
                    token_expires_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to update integration tokens")?;

        Ok(rows > 0)
    }

    /// Marks the record inactive.
    ///
    /// Returns `true` if an active record was switched off.
    pub fn deactivate(&self, agent_id: i64, service: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE integrations
                SET is_active = 0, updated_at = ?3
                WHERE agent_id = ?1 AND service = ?2 AND is_active = 1
                "#,
                params![agent_id, service, Utc::now().to_rfc3339()],
            )
            .context("Failed to deactivate integration")?;

        Ok(rows > 0)
    }
}

/// Row as read from SQLite, before timestamps are parsed.
struct RawRecord {
    agent_id: i64,
    service: String,
    external_location_id: Option<String>,
    external_company_id: Option<String>,
    access_token: String,
    refresh_token: String,
    token_expires_at: String,
    location_name: Option<String>,
    company_name: Option<String>,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            agent_id: row.get(0)?,
            service: row.get(1)?,
            external_location_id: row.get(2)?,
            external_company_id: row.get(3)?,
            access_token: row.get(4)?,
            refresh_token: row.get(5)?,
            token_expires_at: row.get(6)?,
            location_name: row.get(7)?,
            company_name: row.get(8)?,
            is_active: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<IntegrationRecord> {
        Ok(IntegrationRecord {
            agent_id: self.agent_id,
            service: self.service,
            external_location_id: self.external_location_id,
            external_company_id: self.external_company_id,
            access_token: SealedToken::from_stored(self.access_token),
            refresh_token: SealedToken::from_stored(self.refresh_token),
            token_expires_at: parse_timestamp(&self.token_expires_at, "token_expires_at")?,
            location_name: self.location_name,
            company_name: self.company_name,
            is_active: self.is_active,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse {} timestamp", column))
}
