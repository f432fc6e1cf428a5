//! File-system helpers shared by the filesystem and sysctl collaborators.
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Ensure the parent directory of `path` exists, creating it (and any
/// ancestors) if necessary.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Sibling path used to stage an atomic write of `path`.
#[must_use]
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "file".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}.provision-tmp"))
}

/// Replace `path` with `bytes` atomically.
///
/// The content is written to a sibling temporary file, synced, and renamed
/// over the target, so readers see either the old or the new file and never
/// a partial one.  An existing target's permission bits carry over to the
/// replacement.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or the file
/// cannot be written or renamed.  The temporary file is removed on failure.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let tmp = staging_path(path);
    let result = write_staged(&tmp, path, bytes);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn write_staged(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(tmp)?;
    file.write_all(bytes)?;
    if let Ok(meta) = std::fs::metadata(path) {
        file.set_permissions(meta.permissions())?;
    }
    file.sync_all()?;
    std::fs::rename(tmp, path)
}

/// Set `key = value` in sysctl.d `content`, replacing an existing line for
/// the same key or appending one.
///
/// # Examples
///
/// ```
/// use provision_cli::resources::helpers::fs::upsert_sysctl_line;
///
/// let content = "vm.swappiness = 60\nnet.ipv4.ip_forward = 0\n";
/// assert_eq!(
///     upsert_sysctl_line(content, "vm.swappiness", "10"),
///     "vm.swappiness = 10\nnet.ipv4.ip_forward = 0\n"
/// );
/// assert_eq!(
///     upsert_sysctl_line("", "kernel.sysrq", "1"),
///     "kernel.sysrq = 1\n"
/// );
/// ```
#[must_use]
pub fn upsert_sysctl_line(content: &str, key: &str, value: &str) -> String {
    let line = format!("{key} = {value}");
    let mut out = String::with_capacity(content.len() + line.len() + 1);
    let mut replaced = false;
    for l in content.lines() {
        let is_key = !l.trim_start().starts_with('#')
            && l.split_once('=').is_some_and(|(k, _)| k.trim() == key);
        if is_key {
            if !replaced {
                out.push_str(&line);
                out.push('\n');
                replaced = true;
            }
            continue;
        }
        out.push_str(l);
        out.push('\n');
    }
    if !replaced {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt as _;

    #[test]
    fn ensure_parent_dir_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c/file.txt");
        ensure_parent_dir(&nested).unwrap();
        assert!(dir.path().join("a/b/c").is_dir());
    }

    #[test]
    fn ensure_parent_dir_existing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        ensure_parent_dir(&file).unwrap();
        assert!(dir.path().is_dir());
    }

    #[test]
    fn write_atomic_creates_file_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/motd");
        write_atomic(&path, b"hello\n").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello\n");
        assert!(!staging_path(&path).exists(), "staging file is renamed away");
    }

    #[test]
    fn write_atomic_preserves_existing_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn write_atomic_onto_directory_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("taken");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("child"), "x").unwrap();
        assert!(write_atomic(&target, b"data").is_err());
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn upsert_ignores_comments_and_drops_duplicates() {
        let content = "# vm.swappiness = 1\nvm.swappiness=60\nvm.swappiness = 70\n";
        assert_eq!(
            upsert_sysctl_line(content, "vm.swappiness", "10"),
            "# vm.swappiness = 1\nvm.swappiness = 10\n"
        );
    }
}
