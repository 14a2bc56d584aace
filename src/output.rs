use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;

use crate::error::Result;
use crate::guard::GuardReport;
use crate::model::{
    ForceReleaseOutcome, GuardViolation, LeaseEvent, LeaseMode, LeaseSummary, RenewOutcome,
    ReserveGrant,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        let truncated: String = text.chars().take(max_len - 3).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn colored_mode(mode: LeaseMode) -> colored::ColoredString {
    match mode {
        LeaseMode::Exclusive => mode.to_string().red().bold(),
        LeaseMode::Shared => mode.to_string().yellow(),
    }
}

fn remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (expires_at - now).num_seconds().max(0);
    match secs {
        s if s >= 3600 => format!("{}h{:02}m", s / 3600, (s % 3600) / 60),
        s if s >= 60 => format!("{}m{:02}s", s / 60, s % 60),
        s => format!("{s}s"),
    }
}

pub fn print_grant(grant: &ReserveGrant, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(grant)?),
        Format::Pretty => {
            println!(
                "Reserved {} ({}) for '{}':",
                grant.lease_id.bold(),
                colored_mode(grant.mode),
                grant.holder.cyan().bold()
            );
            for p in &grant.patterns {
                println!("  {}", p.green());
            }
            println!("  {} {}", "expires:".dimmed(), grant.expires_at.to_rfc3339());
            for w in &grant.warnings {
                println!("  {} {}", "warning:".yellow().bold(), w);
            }
        }
        Format::Minimal => println!("{}", grant.lease_id),
    }
    Ok(())
}

pub fn print_renewal(outcome: &RenewOutcome, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(outcome)?),
        Format::Pretty => println!(
            "Renewed {} until {}",
            outcome.lease_id.bold(),
            outcome.expires_at.to_rfc3339().green()
        ),
        Format::Minimal => println!("{}", outcome.expires_at.to_rfc3339()),
    }
    Ok(())
}

pub fn print_released(lease_id: &str, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::json!({"ok": true, "lease_id": lease_id})),
        Format::Pretty => println!("{} {}", "Released".green(), lease_id),
        Format::Minimal => println!("ok"),
    }
    Ok(())
}

pub fn print_released_count(released: usize, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::json!({"released": released})),
        Format::Pretty => println!("{} {} lease(s)", "Released".green(), released),
        Format::Minimal => println!("{released}"),
    }
    Ok(())
}

pub fn print_force_released(outcome: &ForceReleaseOutcome, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(outcome)?),
        Format::Pretty => println!(
            "{} {} (was held by '{}')",
            "Force-released".red().bold(),
            outcome.lease_id,
            outcome.previous_holder.cyan()
        ),
        Format::Minimal => println!("{}", outcome.previous_holder),
    }
    Ok(())
}

pub fn print_leases(leases: &[LeaseSummary], now: DateTime<Utc>, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(leases)?),
        Format::Pretty => {
            if leases.is_empty() {
                println!("{}", "No active leases.".dimmed());
            }
            for lease in leases {
                println!(
                    "{} {} {} ({} left)",
                    short_id(&lease.id).bold(),
                    lease.holder.cyan(),
                    colored_mode(lease.mode),
                    remaining(lease.expires_at, now)
                );
                for p in &lease.patterns {
                    println!("  {}", p.green());
                }
                if let Some(ref r) = lease.reason {
                    println!("  {} {}", "reason:".dimmed(), r);
                }
            }
        }
        Format::Minimal => {
            println!("{:8} {:12} {:9} {:>8} PATTERNS", "ID", "HOLDER", "MODE", "LEFT");
            println!("{}", "-".repeat(60));
            for lease in leases {
                println!(
                    "{:8} {:12} {:9} {:>8} {}",
                    short_id(&lease.id),
                    truncate(&lease.holder, 12),
                    lease.mode,
                    remaining(lease.expires_at, now),
                    lease.patterns.join(",")
                );
            }
        }
    }
    Ok(())
}

fn print_violation_lines(violations: &[GuardViolation]) {
    for v in violations {
        println!(
            "  {} {} {} '{}' ({}, lease {})",
            v.path.red(),
            "held by".dimmed(),
            v.holder.cyan(),
            v.pattern,
            v.mode,
            short_id(&v.lease_id)
        );
    }
}

pub fn print_violations(violations: &[GuardViolation], format: Format) -> Result<()> {
    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({"clean": violations.is_empty(), "violations": violations})
        ),
        Format::Pretty => {
            if violations.is_empty() {
                println!("{}", "No conflicts.".green());
            } else {
                println!("{}", "Paths held by other agents:".red().bold());
                print_violation_lines(violations);
            }
        }
        Format::Minimal => {
            for v in violations {
                println!("{}\t{}", v.path, v.holder);
            }
        }
    }
    Ok(())
}

pub fn print_guard_report(report: &GuardReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            if report.is_clean() {
                println!(
                    "{} {} staged path(s) clear",
                    "ok:".green().bold(),
                    report.staged.len()
                );
            } else {
                println!("{}", "Commit blocked; these staged paths are leased:".red().bold());
                print_violation_lines(&report.violations);
            }
        }
        Format::Minimal => {
            for v in &report.violations {
                println!("pathlease: {} is held by {} ({})", v.path, v.holder, v.pattern);
            }
        }
    }
    Ok(())
}

pub fn print_events(events: &[LeaseEvent], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(events)?),
        Format::Pretty => {
            for e in events {
                let kind = e.kind.to_string();
                let kind = match e.kind {
                    crate::model::EventKind::ForceReleased => kind.red().bold(),
                    crate::model::EventKind::Reaped => kind.dimmed(),
                    _ => kind.normal(),
                };
                println!(
                    "#{} {} {} {} by {}{}",
                    e.seq,
                    e.at.format("%Y-%m-%d %H:%M:%S"),
                    kind,
                    short_id(&e.lease_id).bold(),
                    e.actor.cyan(),
                    e.detail
                        .as_deref()
                        .map(|d| format!(" ({d})"))
                        .unwrap_or_default()
                );
            }
        }
        Format::Minimal => {
            for e in events {
                println!("{}\t{}\t{}\t{}", e.seq, e.kind, e.lease_id, e.actor);
            }
        }
    }
    Ok(())
}

pub fn print_count(key: &str, count: usize, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::json!({ key: count })),
        Format::Pretty => println!("{}: {}", key.bold(), count),
        Format::Minimal => println!("{count}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("alice", 12), "alice");
        assert_eq!(truncate("a-very-long-agent-name", 12), "a-very-lo...");
    }

    #[test]
    fn remaining_is_humanized() {
        let now = Utc::now();
        assert_eq!(remaining(now + Duration::seconds(42), now), "42s");
        assert_eq!(remaining(now + Duration::seconds(125), now), "2m05s");
        assert_eq!(remaining(now + Duration::seconds(3 * 3600 + 60), now), "3h01m");
        assert_eq!(remaining(now - Duration::seconds(5), now), "0s");
    }

    #[test]
    fn short_id_handles_short_input() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789"), "01234567");
    }
}
