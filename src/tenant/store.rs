//! Session and agent persistence using SQLite.
//!
//! Rows are written by the dashboard's account flows. This service loads them
//! at startup, looks up rows created later, and writes back agent settings.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};

use super::{Agent, AgentSettings};

/// Persists sessions and agents in SQLite.
pub struct TenantStore {
    conn: Mutex<Connection>,
}

impl TenantStore {
    /// Opens (or creates) the SQLite database and ensures the tables exist.
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open tenant DB at {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Tenant store lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    token   TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS agents (
                    id       INTEGER PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    settings TEXT NOT NULL
                );",
            )
            .context("Failed to create tenant tables")?;
        Ok(())
    }

    /// Inserts or replaces a session.
    pub fn save_session(&self, token: &str, user_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO sessions (token, user_id) VALUES (?1, ?2)",
                params![token, user_id],
            )
            .context("Failed to save session")?;
        Ok(())
    }

    /// Inserts an agent or overwrites its owner and settings.
    pub fn save_agent(&self, agent: &Agent) -> Result<()> {
        let settings =
            serde_json::to_string(&agent.settings).context("Failed to serialize settings")?;
        self.conn()?
            .execute(
                "INSERT INTO agents (id, owner_id, settings) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET owner_id = excluded.owner_id, settings = excluded.settings",
                params![agent.id, agent.owner_id, settings],
            )
            .context("Failed to save agent")?;
        Ok(())
    }

    /// Returns all `(token, user_id)` pairs.
    pub fn load_sessions(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT token, user_id FROM sessions")
            .context("Failed to prepare load_sessions query")?;
        let sessions = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("Failed to query sessions")?
            .collect::<Result<Vec<(String, String)>, _>>()
            .context("Failed to read sessions")?;
        Ok(sessions)
    }

    /// Returns the user owning `token`, if the session exists.
    pub fn find_session(&self, token: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT user_id FROM sessions WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query session")
    }

    /// Returns all persisted agents ordered by id.
    pub fn load_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, owner_id, settings FROM agents ORDER BY id ASC")
            .context("Failed to prepare load_agents query")?;
        let rows = stmt
            .query_map([], agent_row)
            .context("Failed to query agents")?;

        let mut agents = Vec::new();
        for row in rows {
            agents.push(parse_agent(row.context("Failed to read agent row")?)?);
        }
        Ok(agents)
    }

    /// Returns one agent by id.
    pub fn find_agent(&self, agent_id: i64) -> Result<Option<Agent>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT id, owner_id, settings FROM agents WHERE id = ?1",
                params![agent_id],
                agent_row,
            )
            .optional()
            .context("Failed to query agent")?;
        row.map(parse_agent).transpose()
    }
}

type AgentRow = (i64, String, String);

fn agent_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn parse_agent((id, owner_id, settings): AgentRow) -> Result<Agent> {
    let settings: AgentSettings = serde_json::from_str(&settings)
        .with_context(|| format!("Failed to parse settings for agent {}", id))?;
    Ok(Agent {
        id,
        owner_id,
        settings,
    })
}
