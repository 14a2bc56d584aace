use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};

use crate::error::{LeaseError, Result};
use crate::model::{EventKind, Lease, LeaseEvent, LeaseMode};
use crate::store::{Change, LeaseStore, ProjectSection};

fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

/// `SQLITE_BUSY` means another process holds the write lock past `busy_timeout`.
fn map_busy(project_id: &str) -> impl Fn(rusqlite::Error) -> LeaseError + '_ {
    move |e| match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            LeaseError::Timeout(project_id.to_string())
        }
        other => LeaseError::Db(other),
    }
}

const LEASE_COLUMNS: &str =
    "l.id, l.project_id, l.holder, l.mode, l.reason, l.created_at_us, l.expires_at_us, p.pattern";

/// Rows arrive ordered by lease then pattern position; fold them into leases.
fn collect_leases(rows: Vec<(Lease, String)>) -> Vec<Lease> {
    let mut out: Vec<Lease> = Vec::new();
    for (lease, pattern) in rows {
        match out.last_mut() {
            Some(last) if last.id == lease.id => last.patterns.push(pattern),
            _ => {
                let mut lease = lease;
                lease.patterns.push(pattern);
                out.push(lease);
            }
        }
    }
    out
}

fn lease_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Lease, String)> {
    let mode: String = row.get(3)?;
    // an unreadable mode is treated as the stricter one
    Ok((
        Lease {
            id: row.get(0)?,
            project_id: row.get(1)?,
            holder: row.get(2)?,
            patterns: Vec::new(),
            mode: mode.parse().unwrap_or(LeaseMode::Exclusive),
            reason: row.get(4)?,
            created_at: from_micros(row.get(5)?),
            expires_at: from_micros(row.get(6)?),
        },
        row.get(7)?,
    ))
}

fn event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LeaseEvent> {
    let kind: String = row.get(3)?;
    let kind = kind.parse::<EventKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, format!("event kind: {e}").into())
    })?;
    Ok(LeaseEvent {
        seq: row.get(0)?,
        project_id: row.get(1)?,
        lease_id: row.get(2)?,
        kind,
        actor: row.get(4)?,
        holder: row.get(5)?,
        detail: row.get(6)?,
        at: from_micros(row.get(7)?),
    })
}

fn load_project(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<Lease>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LEASE_COLUMNS}
         FROM leases l JOIN lease_patterns p ON p.lease_id = l.id
         WHERE l.project_id = ?1
         ORDER BY l.created_at_us, l.id, p.position"
    ))?;
    let rows = stmt
        .query_map(params![project_id], lease_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(collect_leases(rows))
}

fn apply_change(conn: &Connection, project_id: &str, change: &Change) -> rusqlite::Result<()> {
    match change {
        Change::Insert(lease) => {
            conn.execute(
                "INSERT INTO leases (project_id, id, holder, mode, reason, created_at_us, expires_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    project_id,
                    lease.id,
                    lease.holder,
                    lease.mode.to_string(),
                    lease.reason,
                    to_micros(lease.created_at),
                    to_micros(lease.expires_at),
                ],
            )?;
            for (position, pattern) in lease.patterns.iter().enumerate() {
                conn.execute(
                    "INSERT INTO lease_patterns (lease_id, position, pattern) VALUES (?1, ?2, ?3)",
                    params![lease.id, position as i64, pattern],
                )?;
            }
        }
        Change::UpdateExpiry {
            lease_id,
            expires_at,
        } => {
            conn.execute(
                "UPDATE leases SET expires_at_us = ?1 WHERE project_id = ?2 AND id = ?3",
                params![to_micros(*expires_at), project_id, lease_id],
            )?;
        }
        Change::Delete(lease_id) => {
            conn.execute(
                "DELETE FROM leases WHERE project_id = ?1 AND id = ?2",
                params![project_id, lease_id],
            )?;
        }
    }
    Ok(())
}

fn insert_event(conn: &Connection, event: &LeaseEvent) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO lease_events (project_id, lease_id, kind, actor, holder, detail, at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.project_id,
            event.lease_id,
            event.kind.to_string(),
            event.actor,
            event.holder,
            event.detail,
            to_micros(event.at),
        ],
    )?;
    Ok(())
}

/// Idle reader connections kept for reuse; more are opened under load.
const MAX_IDLE_READERS: usize = 8;

/// Extra connections for reads on a file database. WAL lets them run
/// alongside each other and alongside the writer.
struct ReaderPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn checkout(&self, lock_timeout: Duration) -> rusqlite::Result<Connection> {
        if let Some(conn) = self.idle.lock().pop() {
            return Ok(conn);
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout={};\
             PRAGMA query_only=ON;",
            lock_timeout.as_millis()
        ))?;
        Ok(conn)
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
    }
}

/// Durable store shared by every process pointed at the same file.
///
/// A project section is one `BEGIN IMMEDIATE` transaction on the writer
/// connection, which takes the database write lock up front so concurrent
/// writers serialize instead of failing at commit time. Plain reads go
/// through pooled reader connections when the database is a file.
pub struct SqliteLeaseStore {
    conn: Mutex<Connection>,
    readers: Option<ReaderPool>,
    lock_timeout: Duration,
}

impl SqliteLeaseStore {
    /// Open (or create) the lease database at the given file path.
    pub fn open(path: &Path, lock_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout={};\
             PRAGMA journal_mode=WAL;\
             PRAGMA foreign_keys=ON;",
            lock_timeout.as_millis()
        ))?;
        let store = Self {
            conn: Mutex::new(conn),
            readers: Some(ReaderPool {
                path: path.to_path_buf(),
                idle: Mutex::new(Vec::new()),
            }),
            lock_timeout,
        };
        store.create_tables()?;
        Ok(store)
    }

    /// Open an in-memory database (for tests). Reads share the writer.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
            readers: None,
            lock_timeout: Duration::from_secs(5),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS leases (
                project_id TEXT NOT NULL,
                id TEXT NOT NULL UNIQUE,
                holder TEXT NOT NULL,
                mode TEXT NOT NULL,
                reason TEXT,
                created_at_us INTEGER NOT NULL,
                expires_at_us INTEGER NOT NULL,
                PRIMARY KEY (project_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_leases_project_holder
                ON leases(project_id, holder);
            CREATE INDEX IF NOT EXISTS idx_leases_expires
                ON leases(expires_at_us);

            CREATE TABLE IF NOT EXISTS lease_patterns (
                lease_id TEXT NOT NULL REFERENCES leases(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                pattern TEXT NOT NULL,
                PRIMARY KEY (lease_id, position)
            );

            CREATE TABLE IF NOT EXISTS lease_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                lease_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                actor TEXT NOT NULL,
                holder TEXT NOT NULL,
                detail TEXT,
                at_us INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_lease_events_project
                ON lease_events(project_id, seq);
            ",
        )?;
        Ok(())
    }

    fn conn(&self, what: &str) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| LeaseError::Timeout(what.to_string()))
    }

    /// Run a read-only query on a pooled reader, or on the writer for an
    /// in-memory database.
    fn read<T>(&self, what: &str, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let Some(pool) = &self.readers else {
            let conn = self.conn(what)?;
            return f(&*conn).map_err(map_busy(what));
        };
        let conn = pool.checkout(self.lock_timeout).map_err(map_busy(what))?;
        let out = f(&conn).map_err(map_busy(what));
        pool.checkin(conn);
        out
    }
}

impl LeaseStore for SqliteLeaseStore {
    fn with_project<T, F>(&self, project_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectSection) -> Result<T>,
    {
        let mut conn = self.conn(project_id)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_busy(project_id))?;

        let leases = load_project(&tx, project_id)?;
        let mut section = ProjectSection::new(project_id, leases);
        // Dropping `tx` on the error path rolls back.
        let out = f(&mut section)?;
        if !section.is_dirty() {
            return Ok(out);
        }

        let (_, changes, events) = section.into_parts();
        for change in &changes {
            apply_change(&tx, project_id, change)?;
        }
        for event in &events {
            insert_event(&tx, event)?;
        }
        tx.commit().map_err(map_busy(project_id))?;
        Ok(out)
    }

    fn project_of(&self, lease_id: &str) -> Result<Option<String>> {
        self.read(lease_id, |conn| {
            conn.query_row(
                "SELECT project_id FROM leases WHERE id = ?1",
                params![lease_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn get(&self, lease_id: &str) -> Result<Option<Lease>> {
        self.read(lease_id, |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEASE_COLUMNS}
                 FROM leases l JOIN lease_patterns p ON p.lease_id = l.id
                 WHERE l.id = ?1
                 ORDER BY p.position"
            ))?;
            let rows = stmt
                .query_map(params![lease_id], lease_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(collect_leases(rows).into_iter().next())
        })
    }

    fn list_project(&self, project_id: &str) -> Result<Vec<Lease>> {
        self.read(project_id, |conn| load_project(conn, project_id))
    }

    fn project_ids(&self) -> Result<Vec<String>> {
        self.read("*", |conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT project_id FROM leases ORDER BY project_id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    fn events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<LeaseEvent>> {
        self.read(project_id.unwrap_or("*"), |conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, project_id, lease_id, kind, actor, holder, detail, at_us
                 FROM lease_events
                 WHERE ?1 IS NULL OR project_id = ?1
                 ORDER BY seq DESC
                 LIMIT ?2",
            )?;
            let events = stmt
                .query_map(params![project_id, limit as i64], event_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn lease(project: &str, holder: &str, patterns: &[&str]) -> Lease {
        let now = Utc::now();
        Lease {
            id: Lease::new_id(),
            project_id: project.into(),
            holder: holder.into(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            mode: LeaseMode::Shared,
            reason: Some("editing".into()),
            created_at: now,
            expires_at: now + ChronoDuration::seconds(60),
        }
    }

    #[test]
    fn open_memory_creates_tables() {
        let store = SqliteLeaseStore::open_memory().unwrap();
        let conn = store.conn.lock();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        assert!(tables.contains(&"leases".to_string()));
        assert!(tables.contains(&"lease_patterns".to_string()));
        assert!(tables.contains(&"lease_events".to_string()));
    }

    #[test]
    fn insert_preserves_pattern_order_and_fields() {
        let store = SqliteLeaseStore::open_memory().unwrap();
        let l = lease("p1", "alice", &["src/**", "docs/a.md", "Cargo.toml"]);
        store
            .with_project("p1", |s| {
                s.insert(l.clone());
                Ok(())
            })
            .unwrap();
        let got = store.get(&l.id).unwrap().unwrap();
        assert_eq!(got.patterns, l.patterns);
        assert_eq!(got.mode, LeaseMode::Shared);
        assert_eq!(got.reason.as_deref(), Some("editing"));
        assert_eq!(to_micros(got.expires_at), to_micros(l.expires_at));
        assert_eq!(store.project_of(&l.id).unwrap().as_deref(), Some("p1"));
    }

    #[test]
    fn failed_section_rolls_back() {
        let store = SqliteLeaseStore::open_memory().unwrap();
        let l = lease("p1", "alice", &["a.rs"]);
        let res: Result<()> = store.with_project("p1", |s| {
            s.insert(l.clone());
            Err(LeaseError::Validation("boom".into()))
        });
        assert!(res.is_err());
        assert!(store.list_project("p1").unwrap().is_empty());
        assert!(store.project_ids().unwrap().is_empty());
    }

    #[test]
    fn update_and_delete_cascade_patterns() {
        let store = SqliteLeaseStore::open_memory().unwrap();
        let l = lease("p1", "alice", &["a.rs", "b.rs"]);
        let later = l.expires_at + ChronoDuration::seconds(30);
        store
            .with_project("p1", |s| {
                s.insert(l.clone());
                Ok(())
            })
            .unwrap();
        store
            .with_project("p1", |s| {
                assert!(s.update_expiry(&l.id, later));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            to_micros(store.get(&l.id).unwrap().unwrap().expires_at),
            to_micros(later)
        );
        store
            .with_project("p1", |s| {
                s.delete(&l.id);
                Ok(())
            })
            .unwrap();
        assert!(store.get(&l.id).unwrap().is_none());
        let orphans: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM lease_patterns", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn projects_are_isolated() {
        let store = SqliteLeaseStore::open_memory().unwrap();
        let a = lease("p1", "alice", &["x.rs"]);
        let b = lease("p2", "bob", &["x.rs"]);
        store
                .with_project("p1", |s| {
                    s.insert(a.clone());
                    Ok(())
                })
                .unwrap();
        store
                .with_project("p2", |s| {
                    s.insert(b.clone());
                    Ok(())
                })
                .unwrap();
        assert_eq!(store.list_project("p1").unwrap().len(), 1);
        assert_eq!(store.list_project("p2").unwrap()[0].holder, "bob");
        assert_eq!(store.project_ids().unwrap(), vec!["p1", "p2"]);
    }

    #[test]
    fn events_are_sequenced_newest_first() {
        let store = SqliteLeaseStore::open_memory().unwrap();
        let l = lease("p1", "alice", &["x.rs"]);
        store
            .with_project("p1", |s| {
                s.insert(l.clone());
                s.record(LeaseEvent::for_lease(&l, EventKind::Reserved, "alice", None, Utc::now()));
                s.record(LeaseEvent::for_lease(
                    &l,
                    EventKind::Renewed,
                    "alice",
                    Some("ttl 60s".into()),
                    Utc::now(),
                ));
                Ok(())
            })
            .unwrap();
        let events = store.events(Some("p1"), 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Renewed);
        assert!(events[0].seq > events[1].seq);
        assert!(store.events(Some("p2"), 10).unwrap().is_empty());
        assert_eq!(store.events(None, 1).unwrap().len(), 1);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("leases.db");
        let l = lease("p1", "alice", &["src/**"]);
        {
            let store = SqliteLeaseStore::open(&path, Duration::from_secs(1)).unwrap();
            store
                .with_project("p1", |s| {
                    s.insert(l.clone());
                    Ok(())
                })
                .unwrap();
        }
        let store = SqliteLeaseStore::open(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(store.get(&l.id).unwrap().unwrap().patterns, vec!["src/**"]);
    }

    #[test]
    fn unknown_event_kind_is_a_db_error() {
        let store = SqliteLeaseStore::open_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO lease_events (project_id, lease_id, kind, actor, holder, detail, at_us)
                 VALUES ('p1', 'l1', 'stolen', 'alice', 'alice', NULL, 0)",
                [],
            )
            .unwrap();
        let err = store.events(Some("p1"), 10).unwrap_err();
        assert_eq!(err.code(), "db_error");
        assert!(err.to_string().contains("stolen"), "{err}");
    }

    #[test]
    fn reads_proceed_while_a_section_is_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.db");
        let store = std::sync::Arc::new(SqliteLeaseStore::open(&path, Duration::from_millis(100)).unwrap());
        let l = lease("p1", "alice", &["src/**"]);
        store
            .with_project("p1", |s| {
                s.insert(l.clone());
                Ok(())
            })
            .unwrap();

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let writer = {
            let store = std::sync::Arc::clone(&store);
            std::thread::spawn(move || {
                store
                    .with_project("p1", |s| {
                        let id = s.leases()[0].id.clone();
                        s.delete(&id);
                        entered_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(())
                    })
                    .unwrap();
            })
        };
        entered_rx.recv().unwrap();

        // the uncommitted delete is invisible and the writer lock is not needed
        assert_eq!(store.list_project("p1").unwrap().len(), 1);
        assert_eq!(store.get(&l.id).unwrap().unwrap().holder, "alice");
        assert_eq!(store.project_ids().unwrap(), vec!["p1"]);

        release_tx.send(()).unwrap();
        writer.join().unwrap();
        assert!(store.get(&l.id).unwrap().is_none());
    }
}
