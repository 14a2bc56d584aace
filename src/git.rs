use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use git2::{DiffOptions, ErrorCode, Repository};

use crate::error::{LeaseError, Result};

/// Working directory of the repository containing `start`.
pub fn workdir(start: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(start)?;
    repo.workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| LeaseError::Validation("bare repositories have no staged files".into()))
}

/// Repo-relative paths staged for the next commit, sorted and deduplicated.
///
/// Both sides of a rename are reported, and deletions count as touching
/// the deleted path. On an unborn branch everything in the index is staged.
pub fn staged_paths(start: &Path) -> Result<Vec<String>> {
    let repo = Repository::discover(start)?;
    let index = repo.index()?;
    let head_tree = match repo.head() {
        Ok(head) => Some(head.peel_to_tree()?),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
        Err(e) => return Err(e.into()),
    };

    let mut opts = DiffOptions::new();
    opts.include_typechange(true);
    let diff = repo.diff_tree_to_index(head_tree.as_ref(), Some(&index), Some(&mut opts))?;

    let mut paths = BTreeSet::new();
    for delta in diff.deltas() {
        for file in [delta.old_file(), delta.new_file()] {
            let Some(path) = file.path() else { continue };
            let text = path.to_str().ok_or_else(|| {
                LeaseError::Validation(format!("staged path is not UTF-8: {}", path.display()))
            })?;
            paths.insert(text.replace('\\', "/"));
        }
    }
    Ok(paths.into_iter().collect())
}
