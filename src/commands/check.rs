use crate::agent::{resolve_holder, resolve_project};
use crate::commands::Ctx;
use crate::error::{LeaseError, Result};
use crate::git;
use crate::guard;
use crate::output::{self, Format};

/// Report which of `paths` are leased by someone else. Never fails on hits.
pub fn check(
    ctx: &Ctx,
    paths: Vec<String>,
    holder: Option<String>,
    project: Option<String>,
    strict: bool,
) -> Result<()> {
    let holder = resolve_holder(holder)?;
    let project = resolve_project(project, &ctx.root);
    let violations = ctx.service()?.check_paths(&project, &holder, &paths, strict)?;
    output::print_violations(&violations, ctx.format)
}

/// Pre-commit entry point: any violation or error blocks the commit.
pub fn guard(
    ctx: &Ctx,
    holder: Option<String>,
    project: Option<String>,
    strict: bool,
) -> Result<()> {
    let holder = resolve_holder(holder)?;
    let workdir = git::workdir(&ctx.root)?;
    let project = resolve_project(project, &ctx.root);
    let report = guard::check_staged(&ctx.service()?, &workdir, &project, &holder, strict)?;
    output::print_guard_report(&report, ctx.format)?;
    if report.is_clean() {
        Ok(())
    } else {
        Err(LeaseError::GuardBlocked(report.violations.len()))
    }
}

pub fn install_guard(ctx: &Ctx, force: bool) -> Result<()> {
    let binary = std::env::current_exe()?;
    let path = guard::install_hook(&ctx.root, &binary.display().to_string(), force)?;
    match ctx.format {
        Format::Json => println!(
            "{}",
            serde_json::json!({"installed": true, "path": path.display().to_string()})
        ),
        Format::Pretty | Format::Minimal => println!("installed {}", path.display()),
    }
    Ok(())
}

pub fn uninstall_guard(ctx: &Ctx) -> Result<()> {
    let removed = guard::uninstall_hook(&ctx.root)?;
    match ctx.format {
        Format::Json => println!(
            "{}",
            serde_json::json!({
                "removed": removed.is_some(),
                "path": removed.as_ref().map(|p| p.display().to_string()),
            })
        ),
        Format::Pretty | Format::Minimal => match removed {
            Some(path) => println!("removed {}", path.display()),
            None => println!("no pre-commit hook installed"),
        },
    }
    Ok(())
}
