//! Path provisioning for artifact writes.

use crate::error::Result;
use crate::identifiers::RunContext;
use std::path::PathBuf;
use tracing::debug;

/// Substitute run identifiers into `template` and create its parent directories.
///
/// Safe to call repeatedly for the same path.
pub fn provision_path(ctx: &RunContext, template: &str) -> Result<PathBuf> {
    let path = PathBuf::from(ctx.substitute_identifiers(template)?);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    debug!(template, path = %path.display(), "Provisioned path");
    Ok(path)
}

/// Like [`provision_path`], but the substituted path itself is created as a directory.
pub fn provision_dir(ctx: &RunContext, template: &str) -> Result<PathBuf> {
    let path = PathBuf::from(ctx.substitute_identifiers(template)?);
    std::fs::create_dir_all(&path)?;
    debug!(template, path = %path.display(), "Provisioned directory");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_creates_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new().with_run_id("r1").with_short_id("s1");
        let template = format!("{}/runs/$RUN_ID/$SHORT_ID/preds.yml", dir.path().display());

        let path = provision_path(&ctx, &template).unwrap();
        assert_eq!(path, dir.path().join("runs/r1/s1/preds.yml"));
        assert!(dir.path().join("runs/r1/s1").is_dir());
        assert!(!path.exists());

        // Second call on an existing tree is fine.
        assert_eq!(provision_path(&ctx, &template).unwrap(), path);
    }

    #[test]
    fn test_provision_bare_filename() {
        let ctx = RunContext::new();
        assert_eq!(
            provision_path(&ctx, "history.json").unwrap(),
            PathBuf::from("history.json")
        );
    }

    #[test]
    fn test_provision_unset_identifier_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new();
        let template = format!("{}/runs/$RUN_ID/out.csv", dir.path().display());
        assert!(provision_path(&ctx, &template).unwrap_err().is_configuration());
        assert!(!dir.path().join("runs").exists());
    }

    #[test]
    fn test_provision_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new().with_run_id("r9");
        let template = format!("{}/store/$RUN_ID", dir.path().display());
        let path = provision_dir(&ctx, &template).unwrap();
        assert!(path.is_dir());
        assert!(path.ends_with("store/r9"));
    }
}
