use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{CanteenError, Result};

/// Published weekly menu snapshot.
pub const MENU_KEY: &str = "weeklyMenu";
const ORDERS_PREFIX: &str = "employeeOrders:";
const DECISIONS_PREFIX: &str = "mealDecisions:";

pub fn orders_key(employee: &str) -> String {
    format!("{ORDERS_PREFIX}{employee}")
}

pub fn decisions_key(employee: &str) -> String {
    format!("{DECISIONS_PREFIX}{employee}")
}

pub struct Database {
    pub conn: Mutex<Connection>,
    changes: broadcast::Sender<String>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                CanteenError::InvalidInput(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        let conn = Connection::open(db_path)?;
        info!(path = %db_path.display(), "Opened canteen database");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        let (changes, _) = broadcast::channel(64);
        Database {
            conn: Mutex::new(conn),
            changes,
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CanteenError::LockPoisoned)
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            -- Items the chef serves, per weekday and meal slot
            CREATE TABLE IF NOT EXISTS menu_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                day TEXT NOT NULL,
                slot TEXT NOT NULL,
                name TEXT NOT NULL,
                price REAL NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME
            );

            -- Browser-style key/value store: choice lists, decisions, menu snapshot
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME
            );
            ",
        )?;

        Self::migrate_conn(&conn)?;

        Ok(())
    }

    /// Files created before `updated_at` existed get the column added.
    fn migrate_conn(conn: &Connection) -> Result<()> {
        let columns = |table: &str| -> Result<Vec<String>> {
            let names = conn
                .prepare(&format!("PRAGMA table_info({table})"))?
                .query_map([], |row| row.get::<_, String>(1))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(names)
        };

        let menu_columns = columns("menu_items")?;
        if !menu_columns.contains(&"updated_at".to_string()) {
            conn.execute("ALTER TABLE menu_items ADD COLUMN updated_at DATETIME", [])?;
        }

        let kv_columns = columns("kv_store")?;
        if !kv_columns.contains(&"updated_at".to_string()) {
            conn.execute("ALTER TABLE kv_store ADD COLUMN updated_at DATETIME", [])?;
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        debug!(key, found = value.is_some(), "Read value");
        Ok(value)
    }

    /// Write a value and tell subscribers which key changed.
    pub fn put_value(&self, key: &str, value: &str) -> Result<()> {
        self.put_values(&[(key, value)])
    }

    /// Write several values in one transaction. Either all land or none do, and
    /// subscribers only hear about them once committed.
    pub fn put_values(&self, entries: &[(&str, &str)]) -> Result<()> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            for &(key, value) in entries {
                tx.execute(
                    "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    [key, value],
                )?;
            }
            tx.commit()?;
        }
        for &(key, value) in entries {
            debug!(key, bytes = value.len(), "Wrote value");
            // Nobody listening is fine
            let _ = self.changes.send(key.to_string());
        }
        Ok(())
    }

    /// Every (key, value) whose key starts with `prefix`.
    pub fn values_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv_store
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;
        let rows = stmt
            .query_map([prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persisted choice lists for every employee, keyed by employee id.
    pub fn all_employee_orders(&self) -> Result<Vec<(String, String)>> {
        let rows = self.values_with_prefix(ORDERS_PREFIX)?;
        Ok(rows
            .into_iter()
            .map(|(key, value)| (key[ORDERS_PREFIX.len()..].to_string(), value))
            .collect())
    }

    pub fn change_feed(&self) -> broadcast::Sender<String> {
        self.changes.clone()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}
