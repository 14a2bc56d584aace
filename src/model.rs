use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum LeaseMode {
    #[default]
    Exclusive,
    Shared,
}

/// Derived from `(expires_at, now)` on every read; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Active,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Reserved,
    Renewed,
    Released,
    ForceReleased,
    Reaped,
}

impl std::fmt::Display for LeaseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exclusive => write!(f, "exclusive"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

impl std::str::FromStr for LeaseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exclusive" => Ok(Self::Exclusive),
            "shared" => Ok(Self::Shared),
            other => Err(format!("unknown lease mode '{other}'")),
        }
    }
}

impl std::fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reserved => write!(f, "reserved"),
            Self::Renewed => write!(f, "renewed"),
            Self::Released => write!(f, "released"),
            Self::ForceReleased => write!(f, "force_released"),
            Self::Reaped => write!(f, "reaped"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(Self::Reserved),
            "renewed" => Ok(Self::Renewed),
            "released" => Ok(Self::Released),
            "force_released" => Ok(Self::ForceReleased),
            "reaped" => Ok(Self::Reaped),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

/// A time-bounded claim by one holder over a set of path patterns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    pub id: String,
    pub project_id: String,
    pub holder: String,
    pub patterns: Vec<String>,
    pub mode: LeaseMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn status(&self, now: DateTime<Utc>) -> LeaseStatus {
        if now < self.expires_at {
            LeaseStatus::Active
        } else {
            LeaseStatus::Expired
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == LeaseStatus::Active
    }

    pub fn summary(&self, now: DateTime<Utc>) -> LeaseSummary {
        LeaseSummary {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            holder: self.holder.clone(),
            patterns: self.patterns.clone(),
            mode: self.mode,
            reason: self.reason.clone(),
            status: self.status(now),
            created_at: self.created_at,
            expires_at: self.expires_at,
            remaining_secs: (self.expires_at - now).num_seconds().max(0),
        }
    }
}

/// One lease standing in the way of a reservation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockingLease {
    pub lease_id: String,
    pub holder: String,
    pub patterns: Vec<String>,
    pub mode: LeaseMode,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&Lease> for BlockingLease {
    fn from(lease: &Lease) -> Self {
        Self {
            lease_id: lease.id.clone(),
            holder: lease.holder.clone(),
            patterns: lease.patterns.clone(),
            mode: lease.mode,
            expires_at: lease.expires_at,
            reason: lease.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseSummary {
    pub id: String,
    pub project_id: String,
    pub holder: String,
    pub patterns: Vec<String>,
    pub mode: LeaseMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: LeaseStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReserveGrant {
    pub lease_id: String,
    pub project_id: String,
    pub holder: String,
    pub patterns: Vec<String>,
    pub mode: LeaseMode,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenewOutcome {
    pub lease_id: String,
    pub previous_expires_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub ok: bool,
    pub lease_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForceReleaseOutcome {
    pub ok: bool,
    pub lease_id: String,
    pub previous_holder: String,
}

/// Optional narrowing for `list_active`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_prefix: Option<String>,
}

impl ListFilter {
    pub fn matches(&self, lease: &Lease) -> bool {
        if let Some(holder) = &self.holder
            && &lease.holder != holder
        {
            return false;
        }
        if let Some(prefix) = &self.pattern_prefix {
            let prefix = prefix.trim_start_matches("./");
            return lease.patterns.iter().any(|p| p.starts_with(prefix));
        }
        true
    }
}

/// A staged path that would collide with another holder's active lease.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardViolation {
    pub path: String,
    pub lease_id: String,
    pub holder: String,
    pub pattern: String,
    pub mode: LeaseMode,
    pub expires_at: DateTime<Utc>,
}

/// Audit record appended on every lease state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseEvent {
    pub seq: i64,
    pub project_id: String,
    pub lease_id: String,
    pub kind: EventKind,
    pub actor: String,
    pub holder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl LeaseEvent {
    /// Build an event for `lease`; `seq` is assigned by the store.
    pub fn for_lease(
        lease: &Lease,
        kind: EventKind,
        actor: &str,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            seq: 0,
            project_id: lease.project_id.clone(),
            lease_id: lease.id.clone(),
            kind,
            actor: actor.to_string(),
            holder: lease.holder.clone(),
            detail,
            at,
        }
    }
}
