//! Durable file primitives: timestamped backups, atomic replacement and the
//! advisory lock that serializes writers of a shared file.

use crate::errors::{OverkillError, Result};
use log::{debug, error, info};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Build the backup path for `path` at the given timestamp:
/// `<dir>/<stem>.<YYYYMMDD_HHMMSS>[.<n>].bak<.ext>`, where `n` is added for
/// every backup after the first within the same second.
pub fn backup_path_for(
    path: &Path,
    stamp: &chrono::DateTime<chrono::Local>,
    attempt: u32,
) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let counter = match attempt {
        0 => String::new(),
        n => format!(".{}", n),
    };
    let name = format!(
        "{}.{}{}.bak{}",
        stem,
        stamp.format("%Y%m%d_%H%M%S"),
        counter,
        ext
    );

    match path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Create the first free backup path for `stamp`; never reuses an existing one
fn create_backup(
    path: &Path,
    stamp: &chrono::DateTime<chrono::Local>,
) -> io::Result<(PathBuf, File)> {
    let mut attempt = 0;
    loop {
        let candidate = backup_path_for(path, stamp, attempt);
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Copy `path` next to itself with a timestamped name.
///
/// A file that does not exist cannot be backed up; that is reported as
/// [`OverkillError::BackupFailed`] like any other copy failure.
pub fn backup_file(path: &Path) -> Result<PathBuf> {
    let failed = |source: io::Error| {
        error!("Failed to backup {}: {}", path.display(), source);
        OverkillError::BackupFailed {
            path: path.to_path_buf(),
            source,
        }
    };

    let mut original = File::open(path).map_err(failed)?;
    let (backup, mut target) = create_backup(path, &chrono::Local::now()).map_err(failed)?;

    let copied = io::copy(&mut original, &mut target).and_then(|_| target.sync_all());
    if let Err(source) = copied {
        let _ = fs::remove_file(&backup);
        return Err(failed(source));
    }

    info!("Backed up {} to {}", path.display(), backup.display());
    Ok(backup)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn sync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

/// Replace `path` with `content` so that readers only ever observe the old or
/// the new file: write a sibling temp file, fsync it, rename it over the
/// original and fsync the directory. The original's permissions carry over.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = temp_path_for(path);
    let permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(content.as_bytes())?;
        if let Some(permissions) = permissions {
            file.set_permissions(permissions)?;
        }
        file.sync_all()
    });

    let result = written
        .and_then(|_| fs::rename(&temp_path, path))
        .and_then(|_| sync_parent(path));
    if let Err(source) = result {
        error!("Failed to write {}: {}", path.display(), source);
        let _ = fs::remove_file(&temp_path);
        return Err(OverkillError::WriteFailed {
            path: path.to_path_buf(),
            source,
        });
    }

    debug!("Successfully wrote {}", path.display());
    Ok(())
}

/// Exclusive advisory lock held for the lifetime of the value.
///
/// The lock lives on a sidecar file because [`atomic_write`] replaces the
/// protected file's inode on every write.
#[derive(Debug)]
pub struct WriterLock {
    _file: File,
}

impl WriterLock {
    /// Sidecar lock path for a protected file (`<file>.lock`)
    pub fn path_for(protected: &Path) -> PathBuf {
        let mut name = protected.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock without blocking; a held lock is reported as
    /// [`OverkillError::Locked`].
    pub fn acquire(protected: &Path) -> Result<Self> {
        let path = Self::path_for(protected);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        // SAFETY: the descriptor is owned by `file` and outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(OverkillError::Locked { path });
            }
            return Err(OverkillError::Io(err));
        }

        debug!("Acquired writer lock {}", path.display());
        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_name_keeps_extension_last() {
        let stamp = chrono::Local.with_ymd_and_hms(2026, 10, 19, 12, 0, 5).unwrap();
        let path = backup_path_for(Path::new("/boot/firmware/config.txt"), &stamp, 0);
        assert_eq!(
            path,
            PathBuf::from("/boot/firmware/config.20261019_120005.bak.txt")
        );

        let path = backup_path_for(Path::new("/boot/firmware/config.txt"), &stamp, 2);
        assert_eq!(
            path,
            PathBuf::from("/boot/firmware/config.20261019_120005.2.bak.txt")
        );

        let path = backup_path_for(Path::new("/etc/armbianEnv"), &stamp, 0);
        assert_eq!(path, PathBuf::from("/etc/armbianEnv.20261019_120005.bak"));
    }

    #[test]
    fn test_backup_copies_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        fs::write(&path, "arm_freq=2400\n").unwrap();

        let backup = backup_file(&path).unwrap();
        assert!(backup.starts_with(dir.path()));
        assert_eq!(fs::read_to_string(backup).unwrap(), "arm_freq=2400\n");
    }

    #[test]
    fn test_backups_in_the_same_second_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        let stamp = chrono::Local.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

        let (first, _) = create_backup(&path, &stamp).unwrap();
        let (second, _) = create_backup(&path, &stamp).unwrap();
        assert_eq!(first, dir.path().join("config.20261019_120000.bak.txt"));
        assert_eq!(second, dir.path().join("config.20261019_120000.1.bak.txt"));
    }

    #[test]
    fn test_back_to_back_backups_keep_every_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");

        fs::write(&path, "ORIGINAL=1\n").unwrap();
        let first = backup_file(&path).unwrap();
        fs::write(&path, "CHANGED=1\n").unwrap();
        let second = backup_file(&path).unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(first).unwrap(), "ORIGINAL=1\n");
        assert_eq!(fs::read_to_string(second).unwrap(), "CHANGED=1\n");
    }

    #[test]
    fn test_backup_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = backup_file(&dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, OverkillError::BackupFailed { .. }));
    }

    #[test]
    fn test_atomic_write_replaces_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        fs::write(&path, "old\n").unwrap();

        atomic_write(&path, "new\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_atomic_write_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        fs::write(&path, "old\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        atomic_write(&path, "new\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_atomic_write_failure_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("config.txt");

        let err = atomic_write(&path, "x").unwrap_err();
        assert!(matches!(err, OverkillError::WriteFailed { .. }));
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_second_writer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");

        let held = WriterLock::acquire(&path).unwrap();
        let err = WriterLock::acquire(&path).unwrap_err();
        assert!(matches!(err, OverkillError::Locked { .. }));

        drop(held);
        assert!(WriterLock::acquire(&path).is_ok());
    }
}
