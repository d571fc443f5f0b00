use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Returns true if `path` exists but cannot be opened for read-write
///
/// Spreadsheet applications hold an exclusive handle on open workbooks, so a
/// failed read-write open is treated as "open elsewhere". The file is neither
/// created nor truncated.
pub fn is_file_locked(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }

    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(_) => false,
        Err(e) => {
            debug!("Read-write open of {} failed: {}", path.display(), e);
            true
        }
    }
}

/// Strategy for waiting until the output file can be written
pub trait UnlockWait {
    /// Returns `Ok(true)` once `path` is writable, `Ok(false)` if the wait was abandoned.
    fn wait_for_unlock(&mut self, path: &Path) -> io::Result<bool>;
}

impl<T: UnlockWait + ?Sized> UnlockWait for Box<T> {
    fn wait_for_unlock(&mut self, path: &Path) -> io::Result<bool> {
        (**self).wait_for_unlock(path)
    }
}

type LockCheck = Box<dyn FnMut(&Path) -> bool + Send>;

/// Asks the operator to close the file until it is free or they `cancel`
///
/// Every answer other than `cancel` re-checks the lock, so an invalid answer
/// after the file was closed still lets the write go ahead.
pub struct PromptGuard<R, W> {
    input: R,
    output: W,
    lock_check: LockCheck,
}

impl PromptGuard<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> PromptGuard<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            lock_check: Box::new(is_file_locked),
        }
    }

    /// Replace the lock check, e.g. to simulate a file that is released later.
    pub fn with_lock_check(mut self, lock_check: impl FnMut(&Path) -> bool + Send + 'static) -> Self {
        self.lock_check = Box::new(lock_check);
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> UnlockWait for PromptGuard<R, W> {
    fn wait_for_unlock(&mut self, path: &Path) -> io::Result<bool> {
        while (self.lock_check)(path) {
            writeln!(
                self.output,
                "\nThe file '{}' is currently open. Please close it before continuing.",
                path.display()
            )?;
            write!(
                self.output,
                "Type 'retry' to check again, or 'cancel' to exit without saving: "
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                // Nobody left to answer
                warn!("Input closed while waiting for {} to be released", path.display());
                writeln!(self.output, "\nCancelling program without saving data.")?;
                return Ok(false);
            }

            // Anything but cancel goes back to the lock check
            match line.trim().to_lowercase().as_str() {
                "cancel" => {
                    writeln!(self.output, "Cancelling program without saving data.")?;
                    return Ok(false);
                }
                "retry" => {}
                _ => writeln!(self.output, "Invalid input. Please type 'retry' or 'cancel'.")?,
            }
        }

        Ok(true)
    }
}

/// Non-interactive policy: poll a fixed number of times, then give up
pub struct FixedRetries {
    attempts: u32,
    delay: Duration,
    lock_check: LockCheck,
}

impl FixedRetries {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            lock_check: Box::new(is_file_locked),
        }
    }

    pub fn with_lock_check(mut self, lock_check: impl FnMut(&Path) -> bool + Send + 'static) -> Self {
        self.lock_check = Box::new(lock_check);
        self
    }
}

impl UnlockWait for FixedRetries {
    fn wait_for_unlock(&mut self, path: &Path) -> io::Result<bool> {
        for attempt in 1..=self.attempts.max(1) {
            if !(self.lock_check)(path) {
                return Ok(true);
            }
            if attempt < self.attempts {
                info!(
                    "{} is open elsewhere, checking again in {:?} ({}/{})",
                    path.display(),
                    self.delay,
                    attempt,
                    self.attempts
                );
                thread::sleep(self.delay);
            }
        }

        warn!(
            "{} still locked after {} checks, giving up",
            path.display(),
            self.attempts
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn guard(input: &str) -> PromptGuard<Cursor<Vec<u8>>, Vec<u8>> {
        PromptGuard::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_missing_file_is_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_file_locked(&dir.path().join("absent.xlsx")));
    }

    #[test]
    fn test_writable_file_is_unlocked() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(!is_file_locked(file.path()));
    }

    #[test]
    fn test_directory_cannot_be_opened_read_write() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_file_locked(dir.path()));
    }

    #[test]
    fn test_lock_check_does_not_touch_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"workbook bytes").unwrap();

        assert!(!is_file_locked(file.path()));
        assert_eq!(std::fs::read(file.path()).unwrap(), b"workbook bytes");
    }

    #[test]
    fn test_unlocked_file_does_not_prompt() {
        let mut guard = guard("").with_lock_check(|_| false);
        assert!(guard.wait_for_unlock(Path::new("out.xlsx")).unwrap());
        assert!(guard.into_output().is_empty());
    }

    #[test]
    fn test_cancel_returns_false() {
        let mut guard = guard("cancel\n").with_lock_check(|_| true);
        assert!(!guard.wait_for_unlock(Path::new("out.xlsx")).unwrap());

        let output = String::from_utf8(guard.into_output()).unwrap();
        assert!(output.contains("The file 'out.xlsx' is currently open"));
        assert!(output.contains("Cancelling program without saving data."));
    }

    #[test]
    fn test_retry_after_release_returns_true() {
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        // Locked on the first check, released afterwards
        let mut guard = guard("retry\n")
            .with_lock_check(move |_| counter.fetch_add(1, Ordering::SeqCst) == 0);

        assert!(guard.wait_for_unlock(Path::new("out.xlsx")).unwrap());
        assert_eq!(checks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_while_still_locked_prompts_again() {
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        let mut guard = guard("retry\nretry\ncancel\n").with_lock_check(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(!guard.wait_for_unlock(Path::new("out.xlsx")).unwrap());
        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_invalid_input_rechecks_lock() {
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        let mut guard = guard("close it\n\n  CANCEL  \n").with_lock_check(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(!guard.wait_for_unlock(Path::new("out.xlsx")).unwrap());
        assert_eq!(checks.load(Ordering::SeqCst), 3);

        let output = String::from_utf8(guard.into_output()).unwrap();
        assert_eq!(
            output.matches("Invalid input. Please type 'retry' or 'cancel'.").count(),
            2
        );
    }

    #[test]
    fn test_invalid_input_after_release_proceeds() {
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        // Locked on the first check, closed before the operator answers
        let mut guard = guard("ok\n")
            .with_lock_check(move |_| counter.fetch_add(1, Ordering::SeqCst) == 0);

        assert!(guard.wait_for_unlock(Path::new("out.xlsx")).unwrap());
        assert_eq!(checks.load(Ordering::SeqCst), 2);

        let output = String::from_utf8(guard.into_output()).unwrap();
        assert!(output.contains("Invalid input."));
        assert!(!output.contains("Cancelling"));
    }

    #[test]
    fn test_end_of_input_cancels() {
        let mut guard = guard("retry\n").with_lock_check(|_| true);
        assert!(!guard.wait_for_unlock(Path::new("out.xlsx")).unwrap());
    }

    #[test]
    fn test_locked_directory_then_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let mut guard = guard("cancel\n");
        assert!(!guard.wait_for_unlock(dir.path()).unwrap());
    }

    #[test]
    fn test_fixed_retries_succeeds_when_released() {
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        let mut policy = FixedRetries::new(5, Duration::from_millis(1))
            .with_lock_check(move |_| counter.fetch_add(1, Ordering::SeqCst) < 2);

        assert!(policy.wait_for_unlock(Path::new("out.xlsx")).unwrap());
        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_fixed_retries_gives_up() {
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        let mut policy = FixedRetries::new(3, Duration::from_millis(1)).with_lock_check(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(!policy.wait_for_unlock(Path::new("out.xlsx")).unwrap());
        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }
}
