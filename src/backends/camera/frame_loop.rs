// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for the acquisition loop
//!
//! Owns the worker thread and its stop signal, and implements the bounded
//! join used on shutdown: `std::thread::JoinHandle` has no timed join, so the
//! controller polls `is_finished()` until the deadline and detaches the thread
//! if it has not exited by then.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll interval while waiting for the worker to finish
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Outcome of a bounded join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The thread exited before the deadline
    Joined,
    /// The thread exited by panicking
    Panicked,
    /// The deadline passed; the thread was detached
    TimedOut,
    /// There was no thread to join
    NotRunning,
}

impl JoinOutcome {
    /// Whether the worker is known to have exited normally
    pub fn is_clean(&self) -> bool {
        matches!(self, JoinOutcome::Joined | JoinOutcome::NotRunning)
    }
}

/// Controller for a loop running in a dedicated thread
///
/// The stop signal is per controller, so a detached worker from an earlier
/// run can never be revived by a later start.
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Set while the loop should keep running
    running: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a loop with initialization
    ///
    /// `init_fn` runs once on the new thread. If it fails the thread exits
    /// without entering the loop; the init closure is responsible for
    /// reporting the failure to whoever waits on it. `loop_fn` runs until it
    /// returns [`LoopAction::Stop`] or the controller is stopped. The running
    /// flag is checked before every iteration.
    pub fn start_with_init<S, E, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> Self
    where
        S: Send + 'static,
        E: std::fmt::Display,
        I: FnOnce(&AtomicBool) -> Result<S, E> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let name_clone = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Capture loop thread started, initializing...");

                let mut state = match init_fn(&running_clone) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Initialization failed");
                        return;
                    }
                };

                loop {
                    if !running_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    match loop_fn(&mut state) {
                        LoopAction::Continue => {}
                        LoopAction::Stop => {
                            debug!(name = %name_clone, "Loop requested stop");
                            break;
                        }
                    }
                }

                info!(name = %name_clone, "Capture loop thread exiting");
            });

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to spawn capture loop thread");
                running.store(false, Ordering::SeqCst);
                None
            }
        };

        Self {
            thread_handle,
            running,
            name: name.to_string(),
        }
    }

    /// Check if the thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Whether the loop has been asked to keep running
    pub fn is_requested_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Signal the loop to stop and wait at most `timeout` for it to exit
    pub fn stop_with_timeout(&mut self, timeout: Duration) -> JoinOutcome {
        self.request_stop();
        self.join_with_timeout(timeout)
    }

    /// Wait at most `timeout` for the thread to finish without signalling it
    pub fn join_with_timeout(&mut self, timeout: Duration) -> JoinOutcome {
        let Some(handle) = self.thread_handle.take() else {
            return JoinOutcome::NotRunning;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    name = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Capture loop thread did not exit in time, detaching it"
                );
                return JoinOutcome::TimedOut;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        match handle.join() {
            Ok(()) => {
                debug!(name = %self.name, "Capture loop thread finished");
                JoinOutcome::Joined
            }
            Err(e) => {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
                JoinOutcome::Panicked
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        // Never block in drop; a live thread observes the cleared flag and exits
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, signalling loop");
            self.request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_loop_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start_with_init(
            "test-loop",
            |_: &AtomicBool| Ok::<_, String>(()),
            move |_| {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                if count >= 10 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
        );

        assert_eq!(
            controller.join_with_timeout(Duration::from_secs(5)),
            JoinOutcome::Joined
        );
        assert_eq!(counter.load(Ordering::SeqCst), 11); // 0-10 inclusive
    }

    #[test]
    fn test_stop_signal() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start_with_init(
            "test-loop",
            |_: &AtomicBool| Ok::<_, String>(()),
            move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                LoopAction::Continue
            },
        );

        thread::sleep(Duration::from_millis(30));

        let outcome = controller.stop_with_timeout(Duration::from_secs(2));
        assert_eq!(outcome, JoinOutcome::Joined);
        assert!(outcome.is_clean());
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_init_state_reaches_loop() {
        let result = Arc::new(AtomicU32::new(0));
        let result_clone = Arc::clone(&result);

        let mut controller = CaptureLoopController::start_with_init(
            "test-init-loop",
            |_: &AtomicBool| Ok::<_, String>(42u32),
            move |state| {
                result_clone.store(*state, Ordering::SeqCst);
                LoopAction::Stop
            },
        );

        controller.join_with_timeout(Duration::from_secs(5));
        assert_eq!(result.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_init_failure_skips_loop() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        let mut controller = CaptureLoopController::start_with_init(
            "test-fail-init",
            |_: &AtomicBool| Err::<(), _>("Init failed".to_string()),
            move |_: &mut ()| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
        );

        controller.join_with_timeout(Duration::from_secs(5));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_join_timeout_detaches() {
        let mut controller = CaptureLoopController::start_with_init(
            "test-slow-loop",
            |_: &AtomicBool| Ok::<_, String>(()),
            |_| {
                // Ignores the stop flag for longer than the join deadline
                thread::sleep(Duration::from_millis(200));
                LoopAction::Continue
            },
        );

        let outcome = controller.stop_with_timeout(Duration::from_millis(10));
        assert_eq!(outcome, JoinOutcome::TimedOut);
        assert!(!outcome.is_clean());
        // Handle is gone after detaching
        assert_eq!(
            controller.join_with_timeout(Duration::from_millis(10)),
            JoinOutcome::NotRunning
        );
    }
}
