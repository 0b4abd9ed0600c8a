//! Staging roots and configuration tree operations.
//!
//! # Responsibilities
//! - Allocate staging roots for reinitialization
//! - Compare two configuration trees by names and contents
//! - Promote a staging root over the permanent root
//! - Write single records without exposing partial content
//!
//! # Design Decisions
//! - The previous permanent root is moved aside, not deleted, until the
//!   staged tree is in place; a failed move puts it back
//! - Rename first, copy when the staging root is on another filesystem
//! - Records are written to a hidden sibling and renamed over the target

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;

/// Mode of configuration directories.
pub const DIR_MODE: u32 = 0o755;

/// Mode of configuration records.
pub const FILE_MODE: u32 = 0o644;

/// Allocate a fresh staging root under `parent`.
pub fn create_staging_root(parent: &Path, prefix: &str) -> io::Result<TempDir> {
    let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
    std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(DIR_MODE))?;
    Ok(dir)
}

/// Mode of private keys.
pub const KEY_MODE: u32 = 0o600;

/// Write `contents` to `path` with [`FILE_MODE`], replacing it atomically.
pub async fn write_record(path: &Path, contents: &[u8]) -> io::Result<()> {
    write_record_with_mode(path, contents, FILE_MODE).await
}

/// Write `contents` to `path` with `mode`, replacing it atomically.
pub async fn write_record_with_mode(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let tmp = hidden_sibling(path, ".tmp");
    fs::write(&tmp, contents).await?;
    fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode)).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Read a file, mapping "not found" to `None`.
pub async fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a file, ignoring "not found". Returns whether it existed.
pub async fn remove_optional(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create a directory and its parents with [`DIR_MODE`].
pub async fn create_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await?;
    fs::set_permissions(path, std::fs::Permissions::from_mode(DIR_MODE)).await
}

#[derive(Debug, PartialEq, Eq)]
enum Entry {
    Dir,
    File(Vec<u8>),
}

/// Relative path → entry for every node below `root`.
/// A missing root yields `None`.
async fn snapshot(root: &Path) -> io::Result<Option<BTreeMap<PathBuf, Entry>>> {
    match fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(io::Error::other("not a directory")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut entries = BTreeMap::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(relative) = pending.pop() {
        let mut dir = fs::read_dir(root.join(&relative)).await?;
        while let Some(entry) = dir.next_entry().await? {
            let child = relative.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                entries.insert(child.clone(), Entry::Dir);
                pending.push(child);
            } else {
                let contents = fs::read(entry.path()).await?;
                entries.insert(child, Entry::File(contents));
            }
        }
    }
    Ok(Some(entries))
}

/// Whether two configuration trees differ in names or contents.
pub async fn trees_differ(left: &Path, right: &Path) -> io::Result<bool> {
    Ok(snapshot(left).await? != snapshot(right).await?)
}

/// Replace `permanent` with the contents of `staging`.
pub async fn promote(staging: TempDir, permanent: &Path) -> io::Result<()> {
    let staged = staging.keep();
    let previous = hidden_sibling(permanent, ".previous");

    if fs::metadata(&previous).await.is_ok() {
        fs::remove_dir_all(&previous).await?;
    }
    let had_previous = match fs::rename(permanent, &previous).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            let _ = fs::remove_dir_all(&staged).await;
            return Err(e);
        }
    };

    if let Err(e) = move_tree(&staged, permanent).await {
        tracing::error!(error = %e, "Promotion failed, restoring previous configuration");
        let _ = fs::remove_dir_all(permanent).await;
        if had_previous {
            fs::rename(&previous, permanent).await?;
        }
        let _ = fs::remove_dir_all(&staged).await;
        return Err(e);
    }

    fs::set_permissions(permanent, std::fs::Permissions::from_mode(DIR_MODE)).await?;
    if had_previous {
        fs::remove_dir_all(&previous).await?;
    }
    Ok(())
}

async fn move_tree(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::debug!(error = %e, "Rename failed, copying staging root instead");
            copy_tree(from, to).await?;
            fs::remove_dir_all(from).await
        }
    }
}

async fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        create_dir(&dst).await?;
        let mut dir = fs::read_dir(&src).await?;
        while let Some(entry) = dir.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

/// `dir/.name<suffix>` for `dir/name`.
fn hidden_sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identical_trees_do_not_differ() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        for root in [a.path(), b.path()] {
            create_dir(&root.join("certs")).await.unwrap();
            write_record(&root.join("p.pool"), b"\n# member 1.1.1.1:80\n").await.unwrap();
        }
        assert!(!trees_differ(a.path(), b.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_content_and_name_changes_differ() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write_record(&a.path().join("p.pool"), b"one").await.unwrap();
        write_record(&b.path().join("p.pool"), b"two").await.unwrap();
        assert!(trees_differ(a.path(), b.path()).await.unwrap());

        write_record(&b.path().join("p.pool"), b"one").await.unwrap();
        create_dir(&b.path().join("certs")).await.unwrap();
        assert!(trees_differ(a.path(), b.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_root_differs_from_empty_root() {
        let a = TempDir::new().unwrap();
        assert!(trees_differ(a.path(), &a.path().join("missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_promote_replaces_permanent_root() {
        let base = TempDir::new().unwrap();
        let permanent = base.path().join("ose_routing");
        create_dir(&permanent).await.unwrap();
        write_record(&permanent.join("old.pool"), b"").await.unwrap();

        let staging = create_staging_root(base.path(), "ose-routing-").unwrap();
        let staged_path = staging.path().to_path_buf();
        write_record(&staging.path().join("new.pool"), b"").await.unwrap();

        promote(staging, &permanent).await.unwrap();

        assert!(permanent.join("new.pool").exists());
        assert!(!permanent.join("old.pool").exists());
        assert!(!staged_path.exists());
        assert!(!base.path().join(".ose_routing.previous").exists());
        let mode = std::fs::metadata(&permanent).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, DIR_MODE);
    }

    #[tokio::test]
    async fn test_copy_tree_preserves_layout() {
        let base = TempDir::new().unwrap();
        let from = base.path().join("from");
        create_dir(&from.join("certs")).await.unwrap();
        write_record(&from.join("certs/a.crt"), b"cert").await.unwrap();
        write_record(&from.join("a.pool"), b"pool").await.unwrap();

        let to = base.path().join("to");
        copy_tree(&from, &to).await.unwrap();
        assert!(!trees_differ(&from, &to).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_record_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alias_a.conf");
        write_record(&path, b"x").await.unwrap();
        write_record(&path, b"y").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"y");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, FILE_MODE);
    }
}
