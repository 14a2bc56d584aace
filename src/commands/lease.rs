use crate::agent::{resolve_holder, resolve_project};
use crate::commands::Ctx;
use crate::error::Result;
use crate::model::{LeaseMode, ListFilter};
use crate::output;
use crate::service::ReserveRequest;

pub struct ReserveArgs {
    pub patterns: Vec<String>,
    pub holder: Option<String>,
    pub project: Option<String>,
    pub mode: LeaseMode,
    pub ttl: Option<u64>,
    pub reason: Option<String>,
}

pub fn reserve(ctx: &Ctx, args: ReserveArgs) -> Result<()> {
    let request = ReserveRequest {
        project_id: resolve_project(args.project, &ctx.root),
        holder: resolve_holder(args.holder)?,
        patterns: args.patterns,
        mode: args.mode,
        ttl_secs: args.ttl,
        reason: args.reason,
    };
    let grant = ctx.service()?.reserve(&request)?;
    output::print_grant(&grant, ctx.format)
}

pub fn renew(ctx: &Ctx, lease_id: &str, holder: Option<String>, ttl: Option<u64>) -> Result<()> {
    let holder = resolve_holder(holder)?;
    let outcome = ctx.service()?.renew(lease_id, &holder, ttl)?;
    output::print_renewal(&outcome, ctx.format)
}

pub fn release(ctx: &Ctx, lease_id: &str, holder: Option<String>) -> Result<()> {
    let holder = resolve_holder(holder)?;
    let outcome = ctx.service()?.release(lease_id, &holder)?;
    output::print_released(&outcome.lease_id, ctx.format)
}

pub fn release_all(
    ctx: &Ctx,
    patterns: Vec<String>,
    holder: Option<String>,
    project: Option<String>,
) -> Result<()> {
    let holder = resolve_holder(holder)?;
    let project = resolve_project(project, &ctx.root);
    let released = ctx.service()?.release_all(&project, &holder, &patterns)?;
    output::print_released_count(released, ctx.format)
}

pub fn force_release(
    ctx: &Ctx,
    lease_id: &str,
    admin: Option<String>,
    reason: Option<String>,
) -> Result<()> {
    let admin = resolve_holder(admin)?;
    let outcome = ctx
        .service()?
        .force_release(lease_id, &admin, reason.as_deref())?;
    output::print_force_released(&outcome, ctx.format)
}

pub fn list(
    ctx: &Ctx,
    project: Option<String>,
    holder: Option<String>,
    prefix: Option<String>,
) -> Result<()> {
    let project = resolve_project(project, &ctx.root);
    let service = ctx.service()?;
    let filter = ListFilter {
        holder,
        pattern_prefix: prefix,
    };
    let leases = service.list_active(&project, &filter)?;
    output::print_leases(&leases, service.now(), ctx.format)
}
