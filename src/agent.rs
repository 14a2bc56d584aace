use std::path::Path;

use crate::error::{LeaseError, Result};

pub const ENV_AGENT: &str = "PATHLEASE_AGENT";
pub const ENV_PROJECT: &str = "PATHLEASE_PROJECT";

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Resolve the agent identity: explicit flag first, then `PATHLEASE_AGENT`.
pub fn resolve_holder(explicit: Option<String>) -> Result<String> {
    explicit
        .filter(|s| !s.trim().is_empty())
        .or_else(|| env_nonempty(ENV_AGENT))
        .ok_or_else(|| {
            LeaseError::Validation(format!("no agent identity: pass --holder or set {ENV_AGENT}"))
        })
}

/// Resolve the conflict scope: explicit flag, then `PATHLEASE_PROJECT`, then
/// the root directory path.
pub fn resolve_project(explicit: Option<String>, root: &Path) -> String {
    explicit
        .filter(|s| !s.trim().is_empty())
        .or_else(|| env_nonempty(ENV_PROJECT))
        .unwrap_or_else(|| {
            root.canonicalize()
                .unwrap_or_else(|_| root.to_path_buf())
                .display()
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env-var tests must not run concurrently.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn resolve_holder_env_behavior() {
        let _guard = ENV_LOCK.lock().unwrap();

        assert_eq!(resolve_holder(Some("cli".into())).unwrap(), "cli");

        unsafe { std::env::set_var(ENV_AGENT, "test-agent-42") };
        assert_eq!(resolve_holder(None).unwrap(), "test-agent-42");
        assert_eq!(resolve_holder(Some("  ".into())).unwrap(), "test-agent-42");

        unsafe { std::env::set_var(ENV_AGENT, "") };
        assert_eq!(resolve_holder(None).unwrap_err().code(), "validation_error");

        unsafe { std::env::remove_var(ENV_AGENT) };
        assert!(resolve_holder(None).is_err());
    }

    #[test]
    fn resolve_project_falls_back_to_root() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var(ENV_PROJECT) };

        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().canonicalize().unwrap().display().to_string();
        assert_eq!(resolve_project(None, dir.path()), expected);
        assert_eq!(resolve_project(Some("web".into()), dir.path()), "web");

        unsafe { std::env::set_var(ENV_PROJECT, "shared-proj") };
        assert_eq!(resolve_project(None, dir.path()), "shared-proj");
        unsafe { std::env::remove_var(ENV_PROJECT) };
    }
}
