//! Pre-commit guard: refuse commits touching paths another agent holds.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{LeaseError, Result};
use crate::git;
use crate::model::GuardViolation;
use crate::service::LeaseService;
use crate::store::LeaseStore;

const HOOK_MARKER: &str = "# installed by pathlease";

#[derive(Debug, Clone, Serialize)]
pub struct GuardReport {
    pub project_id: String,
    pub holder: String,
    pub staged: Vec<String>,
    pub violations: Vec<GuardViolation>,
}

impl GuardReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check the staged files of the repository at `repo_root` against the
/// project's active leases. Any error is returned to the caller, who must
/// treat it as a block.
pub fn check_staged<S: LeaseStore>(
    service: &LeaseService<S>,
    repo_root: &Path,
    project_id: &str,
    holder: &str,
    strict: bool,
) -> Result<GuardReport> {
    let staged = git::staged_paths(repo_root)?;
    let violations = if staged.is_empty() {
        Vec::new()
    } else {
        service.check_paths(project_id, holder, &staged, strict)?
    };
    if !violations.is_empty() {
        tracing::warn!(
            project = %project_id,
            holder = %holder,
            violations = violations.len(),
            "commit blocked by active leases"
        );
    }
    Ok(GuardReport {
        project_id: project_id.to_string(),
        holder: holder.to_string(),
        staged,
        violations,
    })
}

/// Body of the `pre-commit` hook that runs the guard.
pub fn hook_script(binary: &str) -> String {
    format!(
        "#!/bin/sh\n{HOOK_MARKER}\nexec \"{binary}\" --format minimal guard \"$@\"\n"
    )
}

/// Write `.git/hooks/pre-commit`. An existing hook not written by us is
/// only replaced with `force`.
pub fn install_hook(repo_root: &Path, binary: &str, force: bool) -> Result<PathBuf> {
    let repo = git2::Repository::discover(repo_root)?;
    let hooks = repo.path().join("hooks");
    fs::create_dir_all(&hooks)?;
    let path = hooks.join("pre-commit");

    if path.exists() && !force {
        let existing = fs::read_to_string(&path).unwrap_or_default();
        if !existing.contains(HOOK_MARKER) {
            return Err(LeaseError::Validation(format!(
                "{} already exists; pass --force to replace it",
                path.display()
            )));
        }
    }

    fs::write(&path, hook_script(binary))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    tracing::info!(path = %path.display(), "pre-commit hook installed");
    Ok(path)
}

/// Remove `.git/hooks/pre-commit` if we installed it. Returns the removed
/// path, or `None` when there was no hook. A foreign hook is left alone.
pub fn uninstall_hook(repo_root: &Path) -> Result<Option<PathBuf>> {
    let repo = git2::Repository::discover(repo_root)?;
    let path = repo.path().join("hooks").join("pre-commit");
    if !path.exists() {
        return Ok(None);
    }
    let existing = fs::read_to_string(&path)?;
    if !existing.contains(HOOK_MARKER) {
        return Err(LeaseError::Validation(format!(
            "{} was not installed by pathlease; remove it by hand",
            path.display()
        )));
    }
    fs::remove_file(&path)?;
    tracing::info!(path = %path.display(), "pre-commit hook removed");
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::model::LeaseMode;
    use crate::service::ReserveRequest;
    use crate::store::MemoryLeaseStore;
    use git2::Repository;
    use tempfile::tempdir;

    fn stage(repo: &Repository, rel: &str) {
        let path = repo.workdir().unwrap().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, rel).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(rel)).unwrap();
        index.write().unwrap();
    }

    #[test]
    fn blocks_staged_file_under_foreign_exclusive_lease() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        stage(&repo, "src/api/users.py");
        stage(&repo, "docs/notes.md");

        let svc = LeaseService::new(MemoryLeaseStore::new(), ServiceConfig::default());
        svc.reserve(&ReserveRequest::new("proj", "alice", &["src/api/*.py"], LeaseMode::Exclusive))
            .unwrap();

        let report = check_staged(&svc, dir.path(), "proj", "bob", false).unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].path, "src/api/users.py");
        assert_eq!(report.violations[0].holder, "alice");

        let own = check_staged(&svc, dir.path(), "proj", "alice", false).unwrap();
        assert!(own.is_clean());
        assert_eq!(own.staged.len(), 2);
    }

    #[test]
    fn install_refuses_to_clobber_foreign_hook() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let hook = repo.path().join("hooks").join("pre-commit");
        fs::create_dir_all(hook.parent().unwrap()).unwrap();
        fs::write(&hook, "#!/bin/sh\necho mine\n").unwrap();

        let err = install_hook(dir.path(), "pathlease", false).unwrap_err();
        assert_eq!(err.code(), "validation_error");

        install_hook(dir.path(), "pathlease", true).unwrap();
        assert!(fs::read_to_string(&hook).unwrap().contains(HOOK_MARKER));
        // reinstalling over our own hook needs no force
        install_hook(dir.path(), "/usr/local/bin/pathlease", false).unwrap();
    }

    #[test]
    fn uninstall_removes_only_our_hook() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let hook = repo.path().join("hooks").join("pre-commit");

        assert!(uninstall_hook(dir.path()).unwrap().is_none());

        install_hook(dir.path(), "pathlease", false).unwrap();
        assert!(uninstall_hook(dir.path()).unwrap().is_some());
        assert!(!hook.exists());

        fs::write(&hook, "#!/bin/sh\necho mine\n").unwrap();
        let err = uninstall_hook(dir.path()).unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert!(hook.exists());
    }
}
