use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2000);
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive advisory lock serializing every lifecycle operation.
///
/// Mutating methods elsewhere take `&LifecycleLock` as proof that the caller
/// holds it. The lock is released when the value is dropped, including on
/// early returns and panics; the OS drops it if the process dies.
pub struct LifecycleLock {
    lock_file: File,
}

impl LifecycleLock {
    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    /// Acquire the lock, retrying for at most `timeout`. A lock still held
    /// when the window closes yields [`CoreError::LockHeld`].
    pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<Self, CoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(lock_path)? {
                return Ok(lock);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!("lock {} still held after {timeout:?}", lock_path.display());
                return Err(CoreError::LockHeld);
            }
            std::thread::sleep(RETRY_INTERVAL.min(deadline - now));
        }
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for LifecycleLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Route Ctrl-C into a flag the installer polls before each step that
/// precedes the swap. A second Ctrl-C exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current step...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("state").join(".lock");
        {
            let _lock = LifecycleLock::acquire(&lock_path, DEFAULT_LOCK_TIMEOUT).unwrap();
            assert!(lock_path.exists());
        }
        assert!(LifecycleLock::try_acquire(&lock_path).unwrap().is_some());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".lock");
        let _lock = LifecycleLock::acquire(&lock_path, DEFAULT_LOCK_TIMEOUT).unwrap();
        assert!(LifecycleLock::try_acquire(&lock_path).unwrap().is_none());
    }

    #[test]
    fn acquire_times_out_with_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".lock");
        let _lock = LifecycleLock::acquire(&lock_path, DEFAULT_LOCK_TIMEOUT).unwrap();

        let start = Instant::now();
        let result = LifecycleLock::acquire(&lock_path, Duration::from_millis(150));
        assert!(matches!(result, Err(CoreError::LockHeld)));
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn acquire_succeeds_once_holder_releases() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".lock");
        let held = LifecycleLock::acquire(&lock_path, DEFAULT_LOCK_TIMEOUT).unwrap();

        let path = lock_path.clone();
        let waiter = std::thread::spawn(move || {
            LifecycleLock::acquire(&path, Duration::from_secs(5)).is_ok()
        });
        std::thread::sleep(Duration::from_millis(100));
        drop(held);
        assert!(waiter.join().unwrap());
    }
}
