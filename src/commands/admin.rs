use crate::agent::resolve_project;
use crate::commands::Ctx;
use crate::error::Result;
use crate::output;

pub fn sweep(ctx: &Ctx) -> Result<()> {
    let reaped = ctx.service()?.sweep()?;
    output::print_count("reaped", reaped, ctx.format)
}

/// Audit log, newest first. `all` ignores the project scope.
pub fn events(ctx: &Ctx, project: Option<String>, all: bool, limit: usize) -> Result<()> {
    let project = (!all).then(|| resolve_project(project, &ctx.root));
    let events = ctx.service()?.events(project.as_deref(), limit)?;
    output::print_events(&events, ctx.format)
}
