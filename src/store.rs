use std::path::Path;

use rusqlite::{Connection, params};

use crate::error::Result;

/// Relation queue row state. One-way: a resolved relation never goes back
/// to pending except through an explicit project cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationStatus {
    Pending,
    Resolved,
}

impl RelationStatus {
    fn from_db(value: i64) -> Self {
        if value == 0 {
            Self::Pending
        } else {
            Self::Resolved
        }
    }
}

/// A cross-project relation waiting for both endpoints to exist on the
/// target. Endpoints are natural issue keys so any later run can resolve
/// them through the accumulated issue cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRelation {
    pub id: String,
    pub source_key: String,
    pub target_key: String,
    pub link_type: String,
    pub status: RelationStatus,
}

/// The only state surviving across runs: project/issue key caches and the
/// deferred relation queue. Sequential reruns only; no locking.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS project_link (
                id TEXT PRIMARY KEY,
                code TEXT,
                destination_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS issue_link (
                id TEXT PRIMARY KEY,
                project_id TEXT,
                key TEXT,
                destination_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS issue_relation (
                id TEXT PRIMARY KEY,
                source_id TEXT,
                target_id TEXT,
                link_type TEXT,
                status INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_issue_link_key ON issue_link(key);
            CREATE INDEX IF NOT EXISTS idx_issue_relation_status ON issue_relation(status);",
        )?;
        Ok(())
    }

    /// Record a migrated project; updates in place on re-migration.
    pub fn upsert_project_link(&self, id: &str, code: &str, destination_id: u64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO project_link (id, code, destination_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET code = ?2, destination_id = ?3",
            params![id, code, destination_id],
        )?;
        Ok(())
    }

    /// Record a migrated issue; updates in place on re-migration.
    pub fn upsert_issue_link(
        &self,
        id: &str,
        project_id: &str,
        key: &str,
        destination_id: u64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO issue_link (id, project_id, key, destination_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET project_id = ?2, key = ?3, destination_id = ?4",
            params![id, project_id, key, destination_id],
        )?;
        Ok(())
    }

    /// Destination id for a natural issue key, across all runs so far.
    pub fn issue_destination(&self, key: &str) -> Result<Option<u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT destination_id FROM issue_link WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Queue a relation whose endpoints cannot both be resolved yet.
    /// Re-queuing the same source relation id updates it in place.
    pub fn enqueue_relation(
        &self,
        id: &str,
        source_key: &str,
        target_key: &str,
        link_type: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO issue_relation (id, source_id, target_id, link_type, status)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT(id) DO UPDATE SET source_id = ?2, target_id = ?3, link_type = ?4, status = 0",
            params![id, source_key, target_key, link_type],
        )?;
        Ok(())
    }

    /// Every relation still pending, oldest insertion order first.
    /// Resolved rows are excluded by the status filter, which is what makes
    /// re-draining idempotent.
    pub fn pending_relations(&self) -> Result<Vec<PendingRelation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_id, target_id, link_type, status
             FROM issue_relation WHERE status = 0 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingRelation {
                id: row.get(0)?,
                source_key: row.get(1)?,
                target_key: row.get(2)?,
                link_type: row.get(3)?,
                status: RelationStatus::from_db(row.get(4)?),
            })
        })?;
        let mut relations = Vec::new();
        for row in rows {
            relations.push(row?);
        }
        Ok(relations)
    }

    pub fn pending_count(&self) -> Result<u64> {
        let count: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM issue_relation WHERE status = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Transition a relation to resolved. Terminal.
    pub fn mark_resolved(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE issue_relation SET status = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Forget a project so it can be re-migrated: drop its issue and
    /// project rows, drop relations originating from it, and flip
    /// relations targeting it back to pending.
    pub fn cleanup_project(&self, code: &str) -> Result<()> {
        let code = code.to_lowercase();
        self.conn.execute(
            "DELETE FROM issue_relation WHERE source_id IN (
                SELECT il.key FROM issue_link il
                JOIN project_link pl ON il.project_id = pl.id
                WHERE pl.code = ?1
            )",
            params![code],
        )?;
        self.conn.execute(
            "UPDATE issue_relation SET status = 0 WHERE target_id IN (
                SELECT il.key FROM issue_link il
                JOIN project_link pl ON il.project_id = pl.id
                WHERE pl.code = ?1
            )",
            params![code],
        )?;
        self.conn.execute(
            "DELETE FROM issue_link WHERE project_id IN (
                SELECT id FROM project_link WHERE code = ?1
            )",
            params![code],
        )?;
        self.conn
            .execute("DELETE FROM project_link WHERE code = ?1", params![code])?;
        Ok(())
    }
}
