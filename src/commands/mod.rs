pub mod admin;
pub mod check;
pub mod lease;
pub mod serve;

use std::path::{Path, PathBuf};

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::output::Format;
use crate::service::LeaseService;
use crate::store::{Backend, MemoryLeaseStore, SqliteLeaseStore};

/// Everything a subcommand needs, resolved once in `main`.
pub struct Ctx {
    pub root: PathBuf,
    pub config: ServiceConfig,
    pub format: Format,
    pub memory: bool,
}

impl Ctx {
    pub fn new(root: &Path, config_path: Option<&Path>, format: Format, memory: bool) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            config: ServiceConfig::resolve(root, config_path)?,
            format,
            memory,
        })
    }

    pub fn open_store(&self) -> Result<Backend> {
        if self.memory {
            return Ok(Backend::Memory(MemoryLeaseStore::with_lock_timeout(
                self.config.lock_timeout(),
            )));
        }
        let path = self.config.database_path(&self.root);
        tracing::debug!(db = %path.display(), "opening lease database");
        Ok(Backend::Sqlite(SqliteLeaseStore::open(
            &path,
            self.config.lock_timeout(),
        )?))
    }

    pub fn service(&self) -> Result<LeaseService<Backend>> {
        Ok(LeaseService::new(self.open_store()?, self.config.clone()))
    }
}
