//! SQLite persistence for daemon-local state.
//!
//! `state.db` holds what must survive a restart: UI settings, session pins,
//! pane display overrides, and the stable session order. Pane runtime
//! state is deliberately *not* persisted — it is derived and rebuilt from
//! live evidence on boot.
//!
//! Migrations are forward-only and recorded in `schema_migrations`. A
//! store that fails to open or migrate is treated as corrupt and is fatal
//! at daemon boot.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Result, params};

/// Key under which the stable-order allocator counter lives in
/// `ui_settings`.
const STABLE_ORDER_NEXT_KEY: &str = "session_stable_order_next";

/// Ordered list of forward-only migrations. The index + 1 is the schema
/// version recorded in `schema_migrations`.
const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    "CREATE TABLE IF NOT EXISTS ui_settings (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS pins (
        target       TEXT NOT NULL,
        session_name TEXT NOT NULL,
        pinned_at    TEXT NOT NULL,
        PRIMARY KEY (target, session_name)
    );
    CREATE TABLE IF NOT EXISTS pane_display_overrides (
        target  TEXT NOT NULL,
        pane_id TEXT NOT NULL,
        label   TEXT NOT NULL,
        PRIMARY KEY (target, pane_id)
    );
    CREATE TABLE IF NOT EXISTS session_stable_order (
        target       TEXT NOT NULL,
        session_name TEXT NOT NULL,
        position     INTEGER NOT NULL,
        PRIMARY KEY (target, session_name)
    );",
];

/// SQLite-backed persistence store.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let current: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (idx, sql) in MIGRATIONS.iter().enumerate() {
            let version = (idx + 1) as i64;
            if version <= current {
                continue;
            }
            self.conn.execute_batch(sql)?;
            self.conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, Utc::now().to_rfc3339()],
            )?;
        }
        Ok(())
    }

    /// Highest applied migration version.
    pub fn schema_version(&self) -> Result<i64> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
    }

    // ── UI settings ─────────────────────────────────────────────

    pub fn set_ui(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO ui_settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_ui(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM ui_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
    }

    // ── Pins ────────────────────────────────────────────────────

    pub fn pin_session(&self, target: &str, session_name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO pins (target, session_name, pinned_at) VALUES (?1, ?2, ?3)",
            params![target, session_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Returns `true` when a pin was removed.
    pub fn unpin_session(&self, target: &str, session_name: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM pins WHERE target = ?1 AND session_name = ?2",
            params![target, session_name],
        )?;
        Ok(n > 0)
    }

    pub fn is_pinned(&self, target: &str, session_name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pins WHERE target = ?1 AND session_name = ?2",
            params![target, session_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All pins as `(target, session_name)`, in pin order.
    pub fn list_pins(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT target, session_name FROM pins ORDER BY pinned_at, session_name")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }

    // ── Pane display overrides ──────────────────────────────────

    pub fn set_display_override(&self, target: &str, pane_id: &str, label: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO pane_display_overrides (target, pane_id, label)
             VALUES (?1, ?2, ?3)",
            params![target, pane_id, label],
        )?;
        Ok(())
    }

    pub fn clear_display_override(&self, target: &str, pane_id: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM pane_display_overrides WHERE target = ?1 AND pane_id = ?2",
            params![target, pane_id],
        )?;
        Ok(n > 0)
    }

    pub fn display_override(&self, target: &str, pane_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT label FROM pane_display_overrides WHERE target = ?1 AND pane_id = ?2",
                params![target, pane_id],
                |row| row.get(0),
            )
            .optional()
    }

    // ── Stable session order ────────────────────────────────────

    /// Position of a session in the stable order, if assigned.
    pub fn stable_order_position(&self, target: &str, session_name: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT position FROM session_stable_order
                 WHERE target = ?1 AND session_name = ?2",
                params![target, session_name],
                |row| row.get(0),
            )
            .optional()
    }

    /// Position of a session, allocating the next slot for sessions seen
    /// for the first time. The allocator counter survives restarts.
    pub fn ensure_stable_order(&self, target: &str, session_name: &str) -> Result<i64> {
        if let Some(pos) = self.stable_order_position(target, session_name)? {
            return Ok(pos);
        }

        let next: i64 = self
            .get_ui(STABLE_ORDER_NEXT_KEY)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        self.conn.execute(
            "INSERT INTO session_stable_order (target, session_name, position)
             VALUES (?1, ?2, ?3)",
            params![target, session_name, next],
        )?;
        self.set_ui(STABLE_ORDER_NEXT_KEY, &(next + 1).to_string())?;
        Ok(next)
    }

    /// Drop the stable-order row for a removed session.
    pub fn forget_stable_order(&self, target: &str, session_name: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM session_stable_order WHERE target = ?1 AND session_name = ?2",
            params![target, session_name],
        )?;
        Ok(n > 0)
    }

    /// Remove every row referencing a target (pins, overrides, order).
    pub fn forget_target(&self, target: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM pins WHERE target = ?1", params![target])?;
        self.conn.execute(
            "DELETE FROM pane_display_overrides WHERE target = ?1",
            params![target],
        )?;
        self.conn.execute(
            "DELETE FROM session_stable_order WHERE target = ?1",
            params![target],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_records_version() {
        let store = Store::open_in_memory().expect("open");
        assert_eq!(store.schema_version().expect("version"), MIGRATIONS.len() as i64);
    }

    #[test]
    fn migrate_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.db");
        {
            let store = Store::open(&path).expect("first open");
            store.set_ui("theme", "dark").expect("set");
        }
        // Re-open runs migrate again; data and version must survive.
        let store = Store::open(&path).expect("second open");
        assert_eq!(store.schema_version().expect("version"), MIGRATIONS.len() as i64);
        assert_eq!(store.get_ui("theme").expect("get"), Some("dark".into()));
    }

    #[test]
    fn ui_settings_roundtrip() {
        let store = Store::open_in_memory().expect("open");
        assert_eq!(store.get_ui("missing").expect("get"), None);

        store.set_ui("ui.sort_mode", "recent_activity").expect("set");
        assert_eq!(
            store.get_ui("ui.sort_mode").expect("get"),
            Some("recent_activity".into())
        );

        store.set_ui("ui.sort_mode", "name").expect("overwrite");
        assert_eq!(store.get_ui("ui.sort_mode").expect("get"), Some("name".into()));
    }

    #[test]
    fn pin_unpin_roundtrip() {
        let store = Store::open_in_memory().expect("open");
        assert!(!store.is_pinned("local", "main").expect("check"));

        store.pin_session("local", "main").expect("pin");
        assert!(store.is_pinned("local", "main").expect("check"));

        assert!(store.unpin_session("local", "main").expect("unpin"));
        assert!(!store.is_pinned("local", "main").expect("check"));
        assert!(!store.unpin_session("local", "main").expect("unpin again"));
    }

    #[test]
    fn pins_are_scoped_by_target() {
        let store = Store::open_in_memory().expect("open");
        store.pin_session("local", "main").expect("pin");
        assert!(!store.is_pinned("devbox", "main").expect("check"));
    }

    #[test]
    fn list_pins_returns_all() {
        let store = Store::open_in_memory().expect("open");
        store.pin_session("local", "main").expect("pin");
        store.pin_session("devbox", "work").expect("pin");

        let pins = store.list_pins().expect("list");
        assert_eq!(pins.len(), 2);
        assert!(pins.contains(&("local".into(), "main".into())));
        assert!(pins.contains(&("devbox".into(), "work".into())));
    }

    #[test]
    fn display_override_roundtrip() {
        let store = Store::open_in_memory().expect("open");
        assert_eq!(store.display_override("local", "%1").expect("get"), None);

        store
            .set_display_override("local", "%1", "review agent")
            .expect("set");
        assert_eq!(
            store.display_override("local", "%1").expect("get"),
            Some("review agent".into())
        );

        assert!(store.clear_display_override("local", "%1").expect("clear"));
        assert_eq!(store.display_override("local", "%1").expect("get"), None);
    }

    #[test]
    fn stable_order_allocates_monotonically() {
        let store = Store::open_in_memory().expect("open");
        let a = store.ensure_stable_order("local", "alpha").expect("alloc");
        let b = store.ensure_stable_order("local", "beta").expect("alloc");
        let c = store.ensure_stable_order("devbox", "gamma").expect("alloc");
        assert_eq!((a, b, c), (0, 1, 2));

        // Re-asking does not reallocate.
        assert_eq!(store.ensure_stable_order("local", "alpha").expect("again"), 0);
    }

    #[test]
    fn stable_order_counter_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.db");
        {
            let store = Store::open(&path).expect("open");
            store.ensure_stable_order("local", "alpha").expect("alloc");
            store.ensure_stable_order("local", "beta").expect("alloc");
        }
        let store = Store::open(&path).expect("reopen");
        // Forget beta, then a new session must NOT reuse its slot.
        assert!(store.forget_stable_order("local", "beta").expect("forget"));
        let pos = store.ensure_stable_order("local", "gamma").expect("alloc");
        assert_eq!(pos, 2, "allocator never reuses freed positions");
    }

    #[test]
    fn forget_target_cascades() {
        let store = Store::open_in_memory().expect("open");
        store.pin_session("devbox", "main").expect("pin");
        store
            .set_display_override("devbox", "%1", "x")
            .expect("override");
        store.ensure_stable_order("devbox", "main").expect("alloc");

        store.forget_target("devbox").expect("forget");
        assert!(!store.is_pinned("devbox", "main").expect("check"));
        assert_eq!(store.display_override("devbox", "%1").expect("get"), None);
        assert_eq!(
            store.stable_order_position("devbox", "main").expect("get"),
            None
        );
    }
}
