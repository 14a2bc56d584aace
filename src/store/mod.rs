pub mod memory;
pub mod sqlite;

pub use memory::MemoryLeaseStore;
pub use sqlite::SqliteLeaseStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{EventKind, Lease, LeaseEvent};

/// Actor recorded on events written by expiry sweeps.
pub const REAPER_ACTOR: &str = "reaper";

/// A mutation staged inside a project section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Insert(Lease),
    UpdateExpiry {
        lease_id: String,
        expires_at: DateTime<Utc>,
    },
    Delete(String),
}

/// Every lease of one project, as seen from inside its critical section.
///
/// Reads reflect staged changes immediately. Nothing reaches the backing
/// store unless the closure passed to [`LeaseStore::with_project`] returns
/// `Ok`, so a failed operation leaves no partial state behind.
#[derive(Debug)]
pub struct ProjectSection {
    project_id: String,
    leases: Vec<Lease>,
    changes: Vec<Change>,
    events: Vec<LeaseEvent>,
}

impl ProjectSection {
    pub fn new(project_id: &str, leases: Vec<Lease>) -> Self {
        Self {
            project_id: project_id.to_string(),
            leases,
            changes: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// All rows, including expired ones the reaper has not removed yet.
    pub fn leases(&self) -> &[Lease] {
        &self.leases
    }

    pub fn get(&self, lease_id: &str) -> Option<&Lease> {
        self.leases.iter().find(|l| l.id == lease_id)
    }

    pub fn insert(&mut self, lease: Lease) {
        self.changes.push(Change::Insert(lease.clone()));
        self.leases.push(lease);
    }

    /// Returns false when the lease is not present.
    pub fn update_expiry(&mut self, lease_id: &str, expires_at: DateTime<Utc>) -> bool {
        let Some(lease) = self.leases.iter_mut().find(|l| l.id == lease_id) else {
            return false;
        };
        lease.expires_at = expires_at;
        self.changes.push(Change::UpdateExpiry {
            lease_id: lease_id.to_string(),
            expires_at,
        });
        true
    }

    pub fn delete(&mut self, lease_id: &str) -> Option<Lease> {
        let pos = self.leases.iter().position(|l| l.id == lease_id)?;
        let removed = self.leases.remove(pos);
        self.changes.push(Change::Delete(lease_id.to_string()));
        Some(removed)
    }

    pub fn record(&mut self, event: LeaseEvent) {
        self.events.push(event);
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty() || !self.events.is_empty()
    }

    /// Split into the final rows, the staged changes, and the pending events.
    pub fn into_parts(self) -> (Vec<Lease>, Vec<Change>, Vec<LeaseEvent>) {
        (self.leases, self.changes, self.events)
    }
}

/// Backing storage for leases.
///
/// `with_project` is the only way to mutate: it runs `f` while holding the
/// project's exclusive section and commits the staged changes atomically
/// when `f` succeeds. Sections of different projects never block each other.
pub trait LeaseStore: Send + Sync {
    fn with_project<T, F>(&self, project_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectSection) -> Result<T>;

    /// Project that owns `lease_id`, if the row still exists.
    fn project_of(&self, lease_id: &str) -> Result<Option<String>>;

    fn get(&self, lease_id: &str) -> Result<Option<Lease>>;

    /// Every row of a project, oldest first, expired ones included.
    fn list_project(&self, project_id: &str) -> Result<Vec<Lease>>;

    /// Projects that currently have at least one row.
    fn project_ids(&self) -> Result<Vec<String>>;

    /// Most recent events first, optionally narrowed to one project.
    fn events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<LeaseEvent>>;

    /// Delete every lease with `expires_at <= now`, one project section at
    /// a time, recording a `reaped` event for each. Returns what was removed.
    fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lease>> {
        let mut reaped = Vec::new();
        for project_id in self.project_ids()? {
            let mut batch = self.with_project(&project_id, |section| {
                let expired: Vec<String> = section
                    .leases()
                    .iter()
                    .filter(|l| !l.is_active(now))
                    .map(|l| l.id.clone())
                    .collect();
                let mut removed = Vec::with_capacity(expired.len());
                for id in expired {
                    if let Some(lease) = section.delete(&id) {
                        section.record(LeaseEvent::for_lease(
                            &lease,
                            EventKind::Reaped,
                            REAPER_ACTOR,
                            None,
                            now,
                        ));
                        removed.push(lease);
                    }
                }
                Ok(removed)
            })?;
            reaped.append(&mut batch);
        }
        Ok(reaped)
    }
}

/// Either backend, chosen at startup.
pub enum Backend {
    Memory(MemoryLeaseStore),
    Sqlite(SqliteLeaseStore),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

impl LeaseStore for Backend {
    fn with_project<T, F>(&self, project_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectSection) -> Result<T>,
    {
        match self {
            Self::Memory(s) => s.with_project(project_id, f),
            Self::Sqlite(s) => s.with_project(project_id, f),
        }
    }

    fn project_of(&self, lease_id: &str) -> Result<Option<String>> {
        match self {
            Self::Memory(s) => s.project_of(lease_id),
            Self::Sqlite(s) => s.project_of(lease_id),
        }
    }

    fn get(&self, lease_id: &str) -> Result<Option<Lease>> {
        match self {
            Self::Memory(s) => s.get(lease_id),
            Self::Sqlite(s) => s.get(lease_id),
        }
    }

    fn list_project(&self, project_id: &str) -> Result<Vec<Lease>> {
        match self {
            Self::Memory(s) => s.list_project(project_id),
            Self::Sqlite(s) => s.list_project(project_id),
        }
    }

    fn project_ids(&self) -> Result<Vec<String>> {
        match self {
            Self::Memory(s) => s.project_ids(),
            Self::Sqlite(s) => s.project_ids(),
        }
    }

    fn events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<LeaseEvent>> {
        match self {
            Self::Memory(s) => s.events(project_id, limit),
            Self::Sqlite(s) => s.events(project_id, limit),
        }
    }
}
