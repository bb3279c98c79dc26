//! Lifecycle Management
//!
//! Teardown for factories and instances.
//!
//! ## Key Features
//!
//! - **Cleanup**: idempotent teardown trait, also implemented for `Option<T>`
//!   so a never-constructed instance can be cleaned like any other
//! - **terminate_child**: SIGTERM, bounded wait, then SIGKILL

use crate::error::Result;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Child;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Idempotent teardown.
///
/// The first call releases everything it can; later calls are no-ops.
pub trait Cleanup {
    fn clean(&mut self) -> Result<()>;
}

impl<T: Cleanup> Cleanup for Option<T> {
    fn clean(&mut self) -> Result<()> {
        match self {
            Some(inner) => inner.clean(),
            None => Ok(()),
        }
    }
}

impl<T: Cleanup + ?Sized> Cleanup for Box<T> {
    fn clean(&mut self) -> Result<()> {
        (**self).clean()
    }
}

/// Stop `child` and reap it. Exit status is ignored.
///
/// Sends SIGTERM first and escalates to SIGKILL once `grace` has elapsed.
pub fn terminate_child(child: &mut Child, grace: Duration) {
    let pid = child.id();

    // Already exited: just reap
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    if let Ok(raw) = i32::try_from(pid) {
        let _ = kill(Pid::from_raw(raw), Signal::SIGTERM);
    }

    match child.wait_timeout(grace) {
        Ok(Some(status)) => {
            tracing::debug!(pid, %status, "envoy exited");
        }
        Ok(None) | Err(_) => {
            tracing::warn!(pid, ?grace, "envoy ignored SIGTERM, killing");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Instant;

    struct Counter {
        calls: usize,
    }

    impl Cleanup for Counter {
        fn clean(&mut self) -> Result<()> {
            self.calls += 1;
            Ok(())
        }
    }

    #[test]
    fn test_none_is_noop() {
        let mut nothing: Option<Counter> = None;
        assert!(nothing.clean().is_ok());
    }

    #[test]
    fn test_some_delegates() {
        let mut some = Some(Counter { calls: 0 });
        some.clean().unwrap();
        assert_eq!(some.as_ref().unwrap().calls, 1);
    }

    #[test]
    fn test_boxed_delegates() {
        let mut boxed: Box<dyn Cleanup> = Box::new(Counter { calls: 0 });
        boxed.clean().unwrap();
    }

    #[test]
    fn test_terminate_sleeping_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let start = Instant::now();
        terminate_child(&mut child, Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_terminate_escalates_to_kill() {
        // The shell ignores TERM, only KILL gets rid of it
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; while :; do sleep 1; done"])
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));
        terminate_child(&mut child, Duration::from_millis(300));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_terminate_already_exited_child() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().unwrap();
        terminate_child(&mut child, Duration::from_millis(100));
    }
}
