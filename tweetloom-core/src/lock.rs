//! Advisory file locks guarding calendar documents.
//!
//! Lock strategy:
//! - Each target file `X` is guarded by a sibling lock file `X.lock`.
//! - The OS-level advisory lock (flock) on that file is authoritative; the
//!   file's contents (`{pid}:{unix_timestamp}`) are diagnostic only.
//! - Acquisition polls a non-blocking lock until a timeout elapses.
//! - [`FileLockGuard`] releases on drop and best-effort deletes the lock file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Suffix appended to a target path to form its lock file path.
pub const LOCK_SUFFIX: &str = ".lock";

/// Default interval between acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Returns the lock file path guarding `target`.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Exclusive advisory lock on a target file, released on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
    acquired_at: Instant,
}

impl FileLockGuard {
    /// Path of the lock file (not the guarded target).
    pub fn lock_path(&self) -> &Path {
        &self.path
    }

    /// How long the lock has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // Unlink while still locked so a waiter never locks a file about to vanish.
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
            }
        }
        if let Err(e) = unlock_file(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to unlock file");
        }
    }
}

/// Acquire an exclusive lock guarding `target`, polling every `poll_interval`
/// until `timeout` elapses.
///
/// Fails with [`Error::LockTimeout`] when the lock stays busy.
pub fn acquire(target: &Path, timeout: Duration, poll_interval: Duration) -> Result<FileLockGuard> {
    let path = lock_path_for(target);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let started = Instant::now();
    loop {
        if let Some(guard) = try_acquire(&path)? {
            tracing::trace!(
                path = %path.display(),
                waited_ms = started.elapsed().as_millis() as u64,
                "Acquired file lock"
            );
            return Ok(guard);
        }

        let waited = started.elapsed();
        if waited >= timeout {
            return Err(Error::LockTimeout {
                path: target.to_path_buf(),
                waited,
            });
        }
        std::thread::sleep(poll_interval.min(timeout - waited));
    }
}

/// Single non-blocking attempt. Returns `Ok(None)` when the lock is held elsewhere.
fn try_acquire(path: &Path) -> Result<Option<FileLockGuard>> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {}
        Err(e) if is_lock_busy(&e) => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    // A previous holder may have unlinked the file between our open and lock;
    // the lock would then guard an orphaned inode. Retry on the live file.
    if !is_same_file(&file, path) {
        let _ = unlock_file(&file);
        return Ok(None);
    }

    // Owner info for debugging.
    let _ = file.set_len(0);
    let _ = file.seek(SeekFrom::Start(0));
    let _ = writeln!(
        file,
        "{}:{}",
        std::process::id(),
        chrono::Utc::now().timestamp()
    );
    let _ = file.flush();

    Ok(Some(FileLockGuard {
        file,
        path: path.to_path_buf(),
        acquired_at: Instant::now(),
    }))
}

fn is_same_file(file: &File, path: &Path) -> bool {
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("tweetloom file locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(10);

    #[test]
    fn lock_path_appends_suffix() {
        let path = lock_path_for(Path::new("/tmp/cal/Mia_2025-03.json"));
        assert_eq!(path, PathBuf::from("/tmp/cal/Mia_2025-03.json.lock"));
    }

    #[test]
    fn acquire_writes_owner_and_release_removes_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("doc.json");

        let guard = acquire(&target, Duration::from_secs(1), POLL).unwrap();
        let contents = fs::read_to_string(guard.lock_path()).unwrap();
        let (pid, ts) = contents.trim().split_once(':').expect("pid:timestamp");
        assert_eq!(pid, std::process::id().to_string());
        assert!(ts.parse::<i64>().is_ok());

        let lock_file = guard.lock_path().to_path_buf();
        guard.release();
        assert!(!lock_file.exists());
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("doc.json");
        let _held = acquire(&target, Duration::from_secs(1), POLL).unwrap();

        let timeout = Duration::from_millis(100);
        let started = Instant::now();
        let result = acquire(&target, timeout, POLL);
        let elapsed = started.elapsed();

        match result {
            Err(Error::LockTimeout { path, waited }) => {
                assert_eq!(path, target);
                assert!(waited >= timeout);
            }
            other => panic!("expected lock timeout, got {other:?}"),
        }
        assert!(elapsed < timeout + POLL + Duration::from_millis(200));
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("doc.json");
        let held = acquire(&target, Duration::from_secs(1), POLL).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter_target = target.clone();
        let waiter = thread::spawn(move || {
            tx.send(()).unwrap();
            acquire(&waiter_target, Duration::from_secs(5), POLL).map(|g| g.held_for())
        });

        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        drop(held);

        let result = waiter.join().unwrap();
        assert!(result.is_ok(), "waiter should acquire after release");
    }

    #[test]
    fn stale_lock_file_does_not_block() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("doc.json");
        fs::write(lock_path_for(&target), "99999:0\n").unwrap();

        let guard = acquire(&target, Duration::from_millis(200), POLL);
        assert!(guard.is_ok());
    }
}
