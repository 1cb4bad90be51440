//! Git provenance for experiments: commit hashes of code directories and quick commits.
//!
//! Uses git2 (libgit2 bindings). A directory that is not inside a git working
//! tree yields [`CcmlError::NoGitHashAvailable`]; callers treat that as missing
//! optional metadata.

use crate::error::{CcmlError, Result};
use crate::factory::ObjectRegistry;
use chrono::{DateTime, Utc};
use git2::{Repository, Signature};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DEFAULT_MESSAGE: &str = "no message";

fn open_repo(path: &Path) -> Result<Repository> {
    Repository::discover(path).map_err(|_| CcmlError::no_git_hash(path))
}

/// Commit hash of `HEAD` for the repository containing `path`.
pub fn git_revision_hash(path: &Path) -> Result<String> {
    let repo = open_repo(path)?;
    let commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(|_| CcmlError::no_git_hash(path))?;
    debug!(path = %path.display(), commit = %commit.id(), "Resolved git revision");
    Ok(commit.id().to_string())
}

/// Source directory recorded for a registered module.
pub fn module_dir(registry: &ObjectRegistry, module: &str) -> Result<PathBuf> {
    registry
        .module_origin(module)?
        .map(Path::to_path_buf)
        .ok_or_else(|| CcmlError::config(format!("module {module} has no recorded source directory")))
}

/// Commit hash of the repository a registered module's source lives in.
pub fn git_revision_of_module(registry: &ObjectRegistry, module: &str) -> Result<String> {
    git_revision_hash(&module_dir(registry, module)?)
}

/// Absolute form of `path` with symlinks and `..` resolved. A file that does
/// not exist yet is resolved through its parent directory.
fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// Stage `files` (relative to `path`, or absolute inside its working tree)
/// and commit them on `HEAD`. Returns the new commit hash.
pub fn fast_commit(files: &[PathBuf], message: &str, path: &Path) -> Result<String> {
    let message = if message.is_empty() { DEFAULT_MESSAGE } else { message };
    let repo = open_repo(path)?;
    let workdir = resolve_path(
        repo.workdir()
            .ok_or_else(|| CcmlError::no_git_hash(path))?,
    );
    let base = resolve_path(path);

    let mut index = repo.index()?;
    for file in files {
        let absolute = if file.is_absolute() {
            resolve_path(file)
        } else {
            resolve_path(&base.join(file))
        };
        let relative = absolute.strip_prefix(&workdir).map_err(|_| {
            CcmlError::config(format!(
                "{} is outside the working tree {}",
                absolute.display(),
                workdir.display()
            ))
        })?;
        index.add_path(relative)?;
    }
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let signature = repo
        .signature()
        .or_else(|_| Signature::now("ccml", "ccml@localhost"))?;
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

    info!(commit = %oid, files = files.len(), "Committed experiment files");
    Ok(oid.to_string())
}

/// Code revision attached to experiment artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub commit: Option<String>,
    pub source: PathBuf,
    pub recorded_at: DateTime<Utc>,
}

impl ProvenanceRecord {
    /// Capture the revision of `path`. A missing repository leaves `commit` empty;
    /// other failures propagate.
    pub fn capture(path: &Path) -> Result<Self> {
        let commit = match git_revision_hash(path) {
            Ok(hash) => Some(hash),
            Err(CcmlError::NoGitHashAvailable { .. }) => None,
            Err(e) => return Err(e),
        };
        Ok(Self {
            commit,
            source: path.to_path_buf(),
            recorded_at: Utc::now(),
        })
    }
}
