use std::sync::mpsc::Sender;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sent to the dispossessed holder after a force-release commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForceReleaseNotice {
    pub project_id: String,
    pub lease_id: String,
    pub previous_holder: String,
    pub admin: String,
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Outbound channel to agents. Delivery is fire-and-forget: implementations
/// must not block for long and cannot fail the request that triggered them.
pub trait Notifier: Send + Sync {
    fn force_released(&self, notice: &ForceReleaseNotice);
}

/// Logs notices; the default when nothing else is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn force_released(&self, notice: &ForceReleaseNotice) {
        tracing::warn!(
            project = %notice.project_id,
            lease_id = %notice.lease_id,
            holder = %notice.previous_holder,
            admin = %notice.admin,
            reason = notice.reason.as_deref().unwrap_or(""),
            "lease force-released"
        );
    }
}

/// Forwards notices into an mpsc channel; a dropped receiver is ignored.
pub struct ChannelNotifier {
    tx: Sender<ForceReleaseNotice>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<ForceReleaseNotice>) -> Self {
        Self { tx }
    }
}

impl Notifier for ChannelNotifier {
    fn force_released(&self, notice: &ForceReleaseNotice) {
        if self.tx.send(notice.clone()).is_err() {
            tracing::debug!(lease_id = %notice.lease_id, "notice receiver gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> ForceReleaseNotice {
        ForceReleaseNotice {
            project_id: "p".into(),
            lease_id: "l1".into(),
            previous_holder: "alice".into(),
            admin: "ops".into(),
            patterns: vec!["src/**".into()],
            reason: Some("stuck".into()),
            at: Utc::now(),
        }
    }

    #[test]
    fn channel_notifier_forwards() {
        let (tx, rx) = std::sync::mpsc::channel();
        let n = ChannelNotifier::new(tx);
        n.force_released(&notice());
        assert_eq!(rx.recv().unwrap().previous_holder, "alice");
    }

    #[test]
    fn channel_notifier_tolerates_closed_receiver() {
        let (tx, rx) = std::sync::mpsc::channel();
        drop(rx);
        ChannelNotifier::new(tx).force_released(&notice());
    }
}
