use std::sync::Arc;

use crate::commands::Ctx;
use crate::error::{LeaseError, Result};
use crate::server;

/// Run the lease server until Ctrl-C.
pub fn run(mut ctx: Ctx, listen: Option<String>) -> Result<()> {
    if let Some(listen) = listen {
        ctx.config.listen = listen;
    }
    let store = ctx.open_store()?;
    tracing::info!(
        backend = store.name(),
        reaper_interval_secs = ctx.config.reaper_interval_secs,
        "starting lease server"
    );
    let service = Arc::new(crate::service::LeaseService::new(store, ctx.config.clone()));

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| LeaseError::Config(format!("failed to create tokio runtime: {e}")))?;
    runtime.block_on(server::run(service))
}
