//! Cooperative dotlock protocol for exclusive mailbox access.
//!
//! A mailbox `M` is locked by creating `M.lock` with `O_EXCL` and mode
//! 0444, holding the owner's PID as decimal ASCII. A lock whose owner no
//! longer exists is taken over; a live owner is waited out with one-second
//! retries up to a timeout. Every held lock is tracked in a process-global
//! registry so the fatal-signal path can release them all.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::error::{MboxckError, Result};
use crate::report::Reporter;

/// Seconds between lock acquisition attempts.
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Locks held by this process, with the pre-rendered C path the signal
/// handler needs for a raw `unlink`.
static HELD_LOCKS: Lazy<Mutex<Vec<(PathBuf, CString)>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Acquire the dotlock for `path`, waiting up to `timeout`.
pub fn lock(path: &Path, timeout: Duration, reporter: &mut Reporter) -> Result<()> {
    let lock_path = lock_path_for(path);
    let start = Instant::now();

    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o444)
            .open(&lock_path)
        {
            Ok(mut file) => {
                file.write_all(std::process::id().to_string().as_bytes())
                    .map_err(|e| MboxckError::io(&lock_path, e))?;
                register(&lock_path);
                debug!(lock = %lock_path.display(), "acquired mailbox lock");
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if start.elapsed() > timeout {
                    return Err(MboxckError::LockTimeout {
                        path: path.to_path_buf(),
                        seconds: timeout.as_secs(),
                    });
                }
                if let Some(pid) = read_owner(&lock_path) {
                    if kill(Pid::from_raw(pid), None).is_err() {
                        reporter.note(format!(
                            "Removing lock {} from defunct process {}",
                            lock_path.display(),
                            pid
                        ));
                        std::fs::remove_file(&lock_path)
                            .map_err(|e| MboxckError::io(&lock_path, e))?;
                        continue;
                    }
                }
                std::thread::sleep(RETRY_INTERVAL);
            }
            Err(e) => return Err(MboxckError::io(&lock_path, e)),
        }
    }
}

/// Release the dotlock for `path`, provided this process still owns it.
pub fn unlock(path: &Path) {
    let lock_path = lock_path_for(path);
    let our_pid = std::process::id() as i32;

    match read_owner(&lock_path) {
        None => warn!(lock = %lock_path.display(), "could not read lock file on unlock"),
        Some(pid) if pid != our_pid => {
            warn!(
                lock = %lock_path.display(),
                owner = pid,
                "someone stole the lock file, leaving it alone"
            );
        }
        Some(_) => {
            if let Err(e) = std::fs::remove_file(&lock_path) {
                warn!(lock = %lock_path.display(), error = %e, "could not remove lock file");
            }
        }
    }

    deregister(&lock_path);
}

/// Unlink every held lock. Called from the fatal-signal path, so only a
/// `try_lock` and raw `unlink` calls are used.
pub fn release_all_on_signal() {
    if let Ok(held) = HELD_LOCKS.try_lock() {
        for (_, cpath) in held.iter() {
            unsafe {
                libc::unlink(cpath.as_ptr());
            }
        }
    }
}

fn read_owner(lock_path: &Path) -> Option<i32> {
    let contents = std::fs::read_to_string(lock_path).ok()?;
    contents.trim().parse().ok().filter(|&pid| pid > 0)
}

fn register(lock_path: &Path) {
    let cpath = CString::new(lock_path.as_os_str().as_bytes()).expect("lock path without NUL");
    HELD_LOCKS
        .lock()
        .expect("lock registry poisoned")
        .push((lock_path.to_path_buf(), cpath));
}

fn deregister(lock_path: &Path) {
    let mut held = HELD_LOCKS.lock().expect("lock registry poisoned");
    if let Some(ix) = held.iter().position(|(p, _)| p == lock_path) {
        held.remove(ix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_creates_pidfile_and_unlock_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let mbox = dir.path().join("inbox");
        std::fs::write(&mbox, b"").unwrap();

        let mut rep = Reporter::silent();
        lock(&mbox, Duration::from_secs(1), &mut rep).unwrap();

        let lock_file = dir.path().join("inbox.lock");
        let pid: i32 = std::fs::read_to_string(&lock_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(pid, std::process::id() as i32);

        unlock(&mbox);
        assert!(!lock_file.exists());
    }

    #[test]
    fn test_contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mbox = dir.path().join("inbox");
        std::fs::write(&mbox, b"").unwrap();
        // A lock held by this very process never looks defunct.
        std::fs::write(
            dir.path().join("inbox.lock"),
            std::process::id().to_string(),
        )
        .unwrap();

        let mut rep = Reporter::silent();
        let err = lock(&mbox, Duration::from_millis(10), &mut rep).unwrap_err();
        assert!(matches!(err, MboxckError::LockTimeout { .. }));
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let mbox = dir.path().join("inbox");
        std::fs::write(&mbox, b"").unwrap();
        // PIDs near i32::MAX are comfortably beyond any real pid table.
        std::fs::write(dir.path().join("inbox.lock"), "2147483600").unwrap();

        let mut rep = Reporter::silent();
        lock(&mbox, Duration::from_secs(2), &mut rep).unwrap();
        unlock(&mbox);
    }
}
