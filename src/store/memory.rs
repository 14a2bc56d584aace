use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::{LeaseError, Result};
use crate::model::{Lease, LeaseEvent};
use crate::store::{Change, LeaseStore, ProjectSection};

/// Oldest events are dropped past this many.
const MAX_EVENTS: usize = 10_000;

type Shard = Arc<Mutex<Vec<Lease>>>;

/// Process-local store: one mutex per project plus an id index.
///
/// Lock order is always shard, then index, then events. The shard map is
/// never held while waiting for a shard.
pub struct MemoryLeaseStore {
    shards: RwLock<HashMap<String, Shard>>,
    index: RwLock<HashMap<String, String>>,
    events: Mutex<EventLog>,
    lock_timeout: Duration,
}

#[derive(Default)]
struct EventLog {
    next_seq: i64,
    entries: VecDeque<LeaseEvent>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            events: Mutex::new(EventLog::default()),
            lock_timeout,
        }
    }

    fn shard(&self, project_id: &str) -> Shard {
        if let Some(shard) = self.shards.read().get(project_id) {
            return shard.clone();
        }
        self.shards
            .write()
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    fn existing_shard(&self, project_id: &str) -> Option<Shard> {
        self.shards.read().get(project_id).cloned()
    }

    fn run_section<T, F>(&self, project_id: &str, rows: &mut Vec<Lease>, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectSection) -> Result<T>,
    {
        let mut section = ProjectSection::new(project_id, rows.clone());
        let out = f(&mut section)?;
        if !section.is_dirty() {
            return Ok(out);
        }

        let (leases, changes, events) = section.into_parts();
        *rows = leases;
        {
            let mut index = self.index.write();
            for change in &changes {
                match change {
                    Change::Insert(lease) => {
                        index.insert(lease.id.clone(), project_id.to_string());
                    }
                    Change::Delete(id) => {
                        index.remove(id);
                    }
                    Change::UpdateExpiry { .. } => {}
                }
            }
        }
        if !events.is_empty() {
            let mut log = self.events.lock();
            for mut event in events {
                log.next_seq += 1;
                event.seq = log.next_seq;
                log.entries.push_back(event);
            }
            while log.entries.len() > MAX_EVENTS {
                log.entries.pop_front();
            }
        }
        Ok(out)
    }

    /// Drop an empty shard while its lock is still held. Only the map and
    /// the caller may reference it; any other clone belongs to a thread
    /// about to lock it, so it stays.
    fn forget_shard(&self, project_id: &str, shard: &Shard) {
        let mut shards = self.shards.write();
        if Arc::strong_count(shard) == 2
            && shards.get(project_id).is_some_and(|s| Arc::ptr_eq(s, shard))
        {
            shards.remove(project_id);
        }
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn with_project<T, F>(&self, project_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectSection) -> Result<T>,
    {
        let shard = self.shard(project_id);
        let mut rows = shard
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| LeaseError::Timeout(project_id.to_string()))?;

        let out = self.run_section(project_id, &mut rows, f);
        if rows.is_empty() {
            self.forget_shard(project_id, &shard);
        }
        out
    }

    fn project_of(&self, lease_id: &str) -> Result<Option<String>> {
        Ok(self.index.read().get(lease_id).cloned())
    }

    fn get(&self, lease_id: &str) -> Result<Option<Lease>> {
        let Some(project_id) = self.project_of(lease_id)? else {
            return Ok(None);
        };
        Ok(self
            .list_project(&project_id)?
            .into_iter()
            .find(|l| l.id == lease_id))
    }

    fn list_project(&self, project_id: &str) -> Result<Vec<Lease>> {
        let Some(shard) = self.existing_shard(project_id) else {
            return Ok(Vec::new());
        };
        let rows = shard
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| LeaseError::Timeout(project_id.to_string()))?;
        Ok(rows.clone())
    }

    fn project_ids(&self) -> Result<Vec<String>> {
        let ids: BTreeSet<String> = self.index.read().values().cloned().collect();
        Ok(ids.into_iter().collect())
    }

    fn events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<LeaseEvent>> {
        let log = self.events.lock();
        Ok(log
            .entries
            .iter()
            .rev()
            .filter(|e| project_id.is_none_or(|p| e.project_id == p))
            .take(limit)
            .cloned()
            .collect())
    }
}
