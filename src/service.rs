use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::engine::{self, Decision};
use crate::error::{LeaseError, Result};
use crate::model::{
    EventKind, ForceReleaseOutcome, GuardViolation, Lease, LeaseEvent, LeaseMode, LeaseSummary,
    ListFilter, ReleaseOutcome, RenewOutcome, ReserveGrant,
};
use crate::notify::{ForceReleaseNotice, Notifier, TracingNotifier};
use crate::pattern::{Pattern, suspicious_pattern};
use crate::store::{LeaseStore, ProjectSection, REAPER_ACTOR};

/// Parameters of a reservation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReserveRequest {
    pub project_id: String,
    pub holder: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub mode: LeaseMode,
    /// Falls back to `default_ttl_secs` when absent.
    #[serde(default, alias = "ttl_seconds", skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReserveRequest {
    pub fn new(project_id: &str, holder: &str, patterns: &[&str], mode: LeaseMode) -> Self {
        Self {
            project_id: project_id.to_string(),
            holder: holder.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            mode,
            ttl_secs: None,
            reason: None,
        }
    }

    pub fn ttl(mut self, secs: u64) -> Self {
        self.ttl_secs = Some(secs);
        self
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// The lease manager: validation, admission control and lifecycle over a store.
pub struct LeaseService<S: LeaseStore> {
    store: S,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: ServiceConfig,
}

fn require_name(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LeaseError::Validation(format!("{field} cannot be empty")));
    }
    Ok(value.to_string())
}

fn clean_reason(reason: Option<&str>) -> Option<String> {
    reason.map(str::trim).filter(|r| !r.is_empty()).map(String::from)
}

/// Normalize request patterns, dropping duplicates while keeping order.
fn parse_patterns(raw: &[String]) -> Result<Vec<Pattern>> {
    if raw.is_empty() {
        return Err(LeaseError::Validation("at least one pattern is required".into()));
    }
    let mut out: Vec<Pattern> = Vec::with_capacity(raw.len());
    for input in raw {
        let pattern = Pattern::parse(input)
            .map_err(|e| LeaseError::Validation(format!("pattern '{input}': {e}")))?;
        if !out.iter().any(|p| p.as_str() == pattern.as_str()) {
            out.push(pattern);
        }
    }
    Ok(out)
}

/// The live lease `lease_id` inside `section`; expired rows count as gone.
fn live_lease<'a>(section: &'a ProjectSection, lease_id: &str, now: DateTime<Utc>) -> Result<&'a Lease> {
    section
        .get(lease_id)
        .filter(|l| l.is_active(now))
        .ok_or_else(|| LeaseError::NotFound(lease_id.to_string()))
}

impl<S: LeaseStore> LeaseService<S> {
    pub fn new(store: S, config: ServiceConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(TracingNotifier),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn ttl(&self, requested: Option<u64>) -> Result<Duration> {
        let secs = requested.unwrap_or(self.config.default_ttl_secs);
        let (min, max) = (self.config.min_ttl_secs, self.config.max_ttl_secs);
        if secs == 0 || secs < min || secs > max {
            return Err(LeaseError::Validation(format!(
                "ttl must be between {min} and {max} seconds, got {secs}"
            )));
        }
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| LeaseError::Validation(format!("ttl {secs}s is out of range")))
    }

    fn lease_project(&self, lease_id: &str) -> Result<String> {
        self.store
            .project_of(lease_id)?
            .ok_or_else(|| LeaseError::NotFound(lease_id.to_string()))
    }

    /// Grant a new lease, or report every lease standing in the way.
    ///
    /// Expired rows of the project are pruned in the same section first.
    /// On conflict nothing is written.
    pub fn reserve(&self, request: &ReserveRequest) -> Result<ReserveGrant> {
        let project_id = require_name("project_id", &request.project_id)?;
        let holder = require_name("holder", &request.holder)?;
        let patterns = parse_patterns(&request.patterns)?;
        let ttl = self.ttl(request.ttl_secs)?;
        let reason = clean_reason(request.reason.as_deref());
        let mode = request.mode;
        let warnings: Vec<String> = patterns.iter().filter_map(suspicious_pattern).collect();

        let outcome = self.store.with_project(&project_id, |section| {
            let now = self.clock.now();
            prune_expired(section, now);

            if let Decision::Conflict(blocking) =
                engine::evaluate(&holder, &patterns, mode, section.leases(), now)
            {
                return Err(LeaseError::Conflict { blocking });
            }

            let expires_at = now
                .checked_add_signed(ttl)
                .ok_or_else(|| LeaseError::Validation("ttl overflows the clock".into()))?;
            let lease = Lease {
                id: Lease::new_id(),
                project_id: project_id.clone(),
                holder: holder.clone(),
                patterns: patterns.iter().map(|p| p.as_str().to_string()).collect(),
                mode,
                reason: reason.clone(),
                created_at: now,
                expires_at,
            };
            section.record(LeaseEvent::for_lease(
                &lease,
                EventKind::Reserved,
                &holder,
                Some(format!("{mode} for {}s", ttl.num_seconds())),
                now,
            ));
            section.insert(lease.clone());
            Ok(lease)
        });

        let lease = match outcome {
            Ok(lease) => lease,
            Err(LeaseError::Conflict { blocking }) => {
                tracing::warn!(
                    project = %project_id,
                    holder = %holder,
                    blockers = blocking.len(),
                    "reservation conflict"
                );
                return Err(LeaseError::Conflict { blocking });
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            project = %project_id,
            holder = %holder,
            lease_id = %lease.id,
            mode = %mode,
            patterns = ?lease.patterns,
            "lease granted"
        );
        Ok(ReserveGrant {
            lease_id: lease.id,
            project_id,
            holder,
            patterns: lease.patterns,
            mode,
            expires_at: lease.expires_at,
            warnings,
        })
    }

    /// Extend a live lease. Expiry never moves backwards and conflicts are
    /// not re-evaluated.
    pub fn renew(&self, lease_id: &str, holder: &str, ttl_secs: Option<u64>) -> Result<RenewOutcome> {
        let holder = require_name("holder", holder)?;
        let ttl = self.ttl(ttl_secs)?;
        let project_id = self.lease_project(lease_id)?;

        let outcome = self.store.with_project(&project_id, |section| {
            let now = self.clock.now();
            let lease = live_lease(section, lease_id, now)?;
            if lease.holder != holder {
                return Err(LeaseError::Forbidden {
                    lease_id: lease_id.to_string(),
                    holder: holder.clone(),
                    actual: lease.holder.clone(),
                });
            }
            let previous = lease.expires_at;
            let candidate = now
                .checked_add_signed(ttl)
                .ok_or_else(|| LeaseError::Validation("ttl overflows the clock".into()))?;
            let expires_at = previous.max(candidate);
            let event = LeaseEvent::for_lease(
                lease,
                EventKind::Renewed,
                &holder,
                Some(format!("ttl {}s", ttl.num_seconds())),
                now,
            );
            section.update_expiry(lease_id, expires_at);
            section.record(event);
            Ok(RenewOutcome {
                lease_id: lease_id.to_string(),
                previous_expires_at: previous,
                expires_at,
            })
        })?;

        tracing::info!(
            project = %project_id,
            holder = %holder,
            lease_id,
            expires_at = %outcome.expires_at,
            "lease renewed"
        );
        Ok(outcome)
    }

    /// Voluntary release by the holder.
    pub fn release(&self, lease_id: &str, holder: &str) -> Result<ReleaseOutcome> {
        let holder = require_name("holder", holder)?;
        let project_id = self.lease_project(lease_id)?;

        self.store.with_project(&project_id, |section| {
            let now = self.clock.now();
            let lease = live_lease(section, lease_id, now)?;
            if lease.holder != holder {
                return Err(LeaseError::Forbidden {
                    lease_id: lease_id.to_string(),
                    holder: holder.clone(),
                    actual: lease.holder.clone(),
                });
            }
            if let Some(lease) = section.delete(lease_id) {
                section.record(LeaseEvent::for_lease(&lease, EventKind::Released, &holder, None, now));
            }
            Ok(())
        })?;

        tracing::info!(project = %project_id, holder = %holder, lease_id, "lease released");
        Ok(ReleaseOutcome {
            ok: true,
            lease_id: lease_id.to_string(),
        })
    }

    /// Administrative takeover: deletes regardless of holder, audits, then
    /// notifies the previous holder outside the project section.
    pub fn force_release(
        &self,
        lease_id: &str,
        admin: &str,
        reason: Option<&str>,
    ) -> Result<ForceReleaseOutcome> {
        let admin = require_name("admin", admin)?;
        let reason = clean_reason(reason);
        let project_id = self.lease_project(lease_id)?;

        let (lease, at) = self.store.with_project(&project_id, |section| {
            let now = self.clock.now();
            live_lease(section, lease_id, now)?;
            let lease = section
                .delete(lease_id)
                .ok_or_else(|| LeaseError::NotFound(lease_id.to_string()))?;
            section.record(LeaseEvent::for_lease(
                &lease,
                EventKind::ForceReleased,
                &admin,
                reason.clone(),
                now,
            ));
            Ok((lease, now))
        })?;

        tracing::warn!(
            project = %project_id,
            holder = %lease.holder,
            lease_id,
            admin = %admin,
            "lease force-released"
        );
        self.notifier.force_released(&ForceReleaseNotice {
            project_id,
            lease_id: lease.id.clone(),
            previous_holder: lease.holder.clone(),
            admin,
            patterns: lease.patterns,
            reason,
            at,
        });
        Ok(ForceReleaseOutcome {
            ok: true,
            lease_id: lease.id,
            previous_holder: lease.holder,
        })
    }

    /// Active leases of a project, oldest first.
    pub fn list_active(&self, project_id: &str, filter: &ListFilter) -> Result<Vec<LeaseSummary>> {
        let project_id = require_name("project_id", project_id)?;
        let now = self.clock.now();
        Ok(self
            .store
            .list_project(&project_id)?
            .iter()
            .filter(|l| l.is_active(now) && filter.matches(l))
            .map(|l| l.summary(now))
            .collect())
    }

    /// Release the holder's active leases in the project. With `patterns`,
    /// only leases holding at least one of them (compared after
    /// normalization) are released; empty means all.
    pub fn release_all(&self, project_id: &str, holder: &str, patterns: &[String]) -> Result<usize> {
        let project_id = require_name("project_id", project_id)?;
        let holder = require_name("holder", holder)?;
        let only: Vec<String> = if patterns.is_empty() {
            Vec::new()
        } else {
            parse_patterns(patterns)?
                .iter()
                .map(|p| p.as_str().to_string())
                .collect()
        };

        let released = self.store.with_project(&project_id, |section| {
            let now = self.clock.now();
            let mine: Vec<String> = section
                .leases()
                .iter()
                .filter(|l| l.holder == holder && l.is_active(now))
                .filter(|l| only.is_empty() || l.patterns.iter().any(|p| only.contains(p)))
                .map(|l| l.id.clone())
                .collect();
            for id in &mine {
                if let Some(lease) = section.delete(id) {
                    section.record(LeaseEvent::for_lease(
                        &lease,
                        EventKind::Released,
                        &holder,
                        Some("release_all".into()),
                        now,
                    ));
                }
            }
            Ok(mine.len())
        })?;

        if released > 0 {
            tracing::info!(project = %project_id, holder = %holder, released, "released leases");
        }
        Ok(released)
    }

    /// Which of `paths` fall under another holder's active lease.
    ///
    /// Exclusive leases always count; shared leases only when `strict`.
    /// One violation per path and blocking lease.
    pub fn check_paths(
        &self,
        project_id: &str,
        holder: &str,
        paths: &[String],
        strict: bool,
    ) -> Result<Vec<GuardViolation>> {
        let project_id = require_name("project_id", project_id)?;
        let holder = require_name("holder", holder)?;
        let targets = paths
            .iter()
            .map(|p| {
                Pattern::parse(p)
                    .map(|parsed| (p.as_str(), parsed))
                    .map_err(|e| LeaseError::Validation(format!("path '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let now = self.clock.now();
        let leases: Vec<Lease> = self
            .store
            .list_project(&project_id)?
            .into_iter()
            .filter(|l| l.is_active(now) && l.holder != holder)
            .filter(|l| strict || l.mode == LeaseMode::Exclusive)
            .collect();

        let mut violations = Vec::new();
        for (raw, target) in &targets {
            for lease in &leases {
                let hit = lease.patterns.iter().find(|held| {
                    Pattern::parse(held).map_or(true, |held| held.overlaps(target))
                });
                if let Some(pattern) = hit {
                    violations.push(GuardViolation {
                        path: raw.to_string(),
                        lease_id: lease.id.clone(),
                        holder: lease.holder.clone(),
                        pattern: pattern.clone(),
                        mode: lease.mode,
                        expires_at: lease.expires_at,
                    });
                }
            }
        }
        Ok(violations)
    }

    /// Reap every expired lease now. Returns how many were removed.
    pub fn sweep(&self) -> Result<usize> {
        let now = self.clock.now();
        let reaped = self.store.delete_expired(now)?;
        for lease in &reaped {
            tracing::debug!(
                project = %lease.project_id,
                holder = %lease.holder,
                lease_id = %lease.id,
                "lease reaped"
            );
        }
        Ok(reaped.len())
    }

    pub fn events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<LeaseEvent>> {
        self.store.events(project_id, limit)
    }
}

/// Drop expired rows of the section, recording a `reaped` event for each.
fn prune_expired(section: &mut ProjectSection, now: DateTime<Utc>) {
    let expired: Vec<String> = section
        .leases()
        .iter()
        .filter(|l| !l.is_active(now))
        .map(|l| l.id.clone())
        .collect();
    for id in expired {
        if let Some(lease) = section.delete(&id) {
            section.record(LeaseEvent::for_lease(&lease, EventKind::Reaped, REAPER_ACTOR, None, now));
        }
    }
}
