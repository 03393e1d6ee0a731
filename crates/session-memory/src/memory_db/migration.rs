//! Database migration system

use rusqlite::{Connection, Result};
use tracing::{error, info};

/// Manages database schema migrations
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    /// Create a new migration manager
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Bring the database up to the current schema
    pub fn initialize_database(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current memory schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    /// Apply all pending migrations, each in its own transaction
    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }

        Ok(())
    }

    /// Get current schema version
    pub fn get_current_version(&self) -> Result<i32> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
    }
}

/// Get all migration SQL scripts
fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![(1, include_str!("migrations/001_initial.sql"))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        {
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database().unwrap();
            assert_eq!(migrator.get_current_version().unwrap(), 1);
        }

        // Re-running is a no-op
        {
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database().unwrap();
            assert_eq!(migrator.get_current_version().unwrap(), 1);
        }
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn initial_schema_has_expected_columns() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::new(&mut conn).initialize_database().unwrap();

        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('entries')").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        for expected in ["id", "session_id", "timestamp", "entry_type", "content", "metadata", "embedding", "importance"] {
            assert!(columns.iter().any(|c| c == expected), "missing column {}", expected);
        }
    }
}
