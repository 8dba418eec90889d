//! Periodic health monitoring
//!
//! The monitor only reports. It never restarts or signals the process it
//! watches.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::http::{HealthCheck, ProbeResult};

/// Probe results kept per instance
pub const HEALTH_LOG_LEN: usize = 5;

/// Longest sleep between checks of the stop flag
const STOP_POLL: Duration = Duration::from_millis(50);

/// How long `stop` waits for a probe already in flight
const STOP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health as derived from the probe history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub failing_streak: u32,
    pub log: VecDeque<ProbeResult>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: HealthStatus::Starting,
            failing_streak: 0,
            log: VecDeque::new(),
        }
    }
}

impl HealthState {
    /// Fold one probe result in. Returns the previous status when it changed.
    ///
    /// Failures inside the start period only count once a probe has
    /// succeeded; `retries` consecutive counted failures mark the instance
    /// unhealthy.
    pub fn record(&mut self, result: ProbeResult, in_start_period: bool, retries: u32) -> Option<HealthStatus> {
        let previous = self.status;

        if result.healthy {
            self.failing_streak = 0;
            self.status = HealthStatus::Healthy;
        } else if !in_start_period || self.status != HealthStatus::Starting {
            self.failing_streak += 1;
            if self.failing_streak >= retries {
                self.status = HealthStatus::Unhealthy;
            }
        }

        self.log.push_back(result);
        while self.log.len() > HEALTH_LOG_LEN {
            self.log.pop_front();
        }

        (previous != self.status).then_some(previous)
    }

    pub fn last(&self) -> Option<&ProbeResult> {
        self.log.back()
    }
}

/// Timing for a health monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub start_period: Duration,
    pub retries: u32,
}

/// Runs a health check on a fixed interval until stopped
pub struct HealthMonitor<C: HealthCheck> {
    check: C,
    settings: MonitorSettings,
    running: Arc<AtomicBool>,
}

impl<C: HealthCheck + 'static> HealthMonitor<C> {
    pub fn new(check: C, settings: MonitorSettings) -> Self {
        Self {
            check,
            settings,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run on the current thread, calling `on_update` after every probe
    pub fn start<F>(&self, on_update: F)
    where
        F: FnMut(&HealthState, Option<HealthStatus>),
    {
        self.running.store(true, Ordering::SeqCst);
        self.run(on_update);
    }

    fn run<F>(&self, mut on_update: F)
    where
        F: FnMut(&HealthState, Option<HealthStatus>),
    {
        let started = Instant::now();
        let mut state = HealthState::default();

        // First probe after one interval, like a container engine.
        while self.sleep_interval() {
            let result = self.check.check();
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            debug!(healthy = result.healthy, message = %result.message, "health probe");

            let in_start_period = started.elapsed() < self.settings.start_period;
            let previous = state.record(result, in_start_period, self.settings.retries);
            if let Some(previous) = previous {
                match state.status {
                    HealthStatus::Unhealthy => warn!(
                        from = %previous,
                        failing_streak = state.failing_streak,
                        "instance is unhealthy"
                    ),
                    status => info!(from = %previous, to = %status, "health status changed"),
                }
            }
            on_update(&state, previous);
        }
    }

    /// Run on a background thread
    pub fn spawn<F>(self, on_update: F) -> MonitorHandle
    where
        F: FnMut(&HealthState, Option<HealthStatus>) + Send + 'static,
    {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let thread = thread::spawn(move || self.run(on_update));
        MonitorHandle {
            running,
            thread: Some(thread),
        }
    }

    /// Sleep one interval; false once the monitor has been stopped
    fn sleep_interval(&self) -> bool {
        let deadline = Instant::now() + self.settings.interval;
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Handle to a monitor running on its own thread
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the monitor. Waits briefly for its thread; a probe still in
    /// flight after that is left to finish on its own and its result is
    /// dropped.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(thread) = self.thread.take() else {
            return;
        };
        let deadline = Instant::now() + STOP_GRACE;
        while !thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if !thread.is_finished() {
            debug!("health probe still in flight, not waiting for it");
        } else if thread.join().is_err() {
            warn!("health monitor thread panicked");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn ok() -> ProbeResult {
        ProbeResult::new(true, Some(200), "ok")
    }

    fn fail() -> ProbeResult {
        ProbeResult::new(false, None, "refused")
    }

    /// Replays a fixed script of results, then repeats the last one
    struct Scripted {
        results: Mutex<VecDeque<bool>>,
        last: bool,
    }

    impl Scripted {
        fn new(script: &[bool]) -> Self {
            Self {
                results: Mutex::new(script.iter().copied().collect()),
                last: *script.last().unwrap(),
            }
        }
    }

    impl HealthCheck for Scripted {
        fn check(&self) -> ProbeResult {
            let healthy = self.results.lock().pop_front().unwrap_or(self.last);
            if healthy {
                ok()
            } else {
                fail()
            }
        }
    }

    #[test]
    fn test_retries_before_unhealthy() {
        let mut state = HealthState::default();
        assert_eq!(state.record(fail(), false, 3), None);
        assert_eq!(state.record(fail(), false, 3), None);
        assert_eq!(state.status, HealthStatus::Starting);
        assert_eq!(state.record(fail(), false, 3), Some(HealthStatus::Starting));
        assert_eq!(state.status, HealthStatus::Unhealthy);
        assert_eq!(state.failing_streak, 3);
    }

    #[test]
    fn test_success_resets_streak() {
        let mut state = HealthState::default();
        state.record(fail(), false, 3);
        assert_eq!(state.record(ok(), false, 3), Some(HealthStatus::Starting));
        assert_eq!(state.failing_streak, 0);
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.record(ok(), false, 3), None);
    }

    #[test]
    fn test_start_period_failures_not_counted() {
        let mut state = HealthState::default();
        for _ in 0..10 {
            state.record(fail(), true, 1);
        }
        assert_eq!(state.status, HealthStatus::Starting);
        assert_eq!(state.failing_streak, 0);

        // once started, failures count even inside the start period
        state.record(ok(), true, 1);
        state.record(fail(), true, 1);
        assert_eq!(state.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut state = HealthState::default();
        for _ in 0..(HEALTH_LOG_LEN + 3) {
            state.record(ok(), false, 3);
        }
        assert_eq!(state.log.len(), HEALTH_LOG_LEN);
        assert!(state.last().unwrap().healthy);
    }

    #[test]
    fn test_monitor_becomes_healthy() {
        let settings = MonitorSettings {
            interval: Duration::from_millis(10),
            start_period: Duration::from_secs(0),
            retries: 3,
        };
        let monitor = HealthMonitor::new(Scripted::new(&[false, false, true]), settings);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = monitor.spawn(move |state, _| sink.lock().push(state.status));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !seen.lock().contains(&HealthStatus::Healthy) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.stop();

        let seen = seen.lock();
        assert_eq!(seen[0], HealthStatus::Starting);
        assert!(seen.contains(&HealthStatus::Healthy));
    }

    #[test]
    fn test_start_runs_until_stopped() {
        let settings = MonitorSettings {
            interval: Duration::from_millis(5),
            start_period: Duration::from_secs(0),
            retries: 2,
        };
        let monitor = HealthMonitor::new(Scripted::new(&[false]), settings);
        let mut probes = 0;
        monitor.start(|state, _| {
            probes += 1;
            if state.status == HealthStatus::Unhealthy {
                monitor.stop();
            }
        });
        assert_eq!(probes, 2);
        assert!(!monitor.is_running());
    }

    /// Blocks on every check until released
    struct Stalled {
        entered: Arc<AtomicBool>,
        release: Arc<AtomicBool>,
    }

    impl HealthCheck for Stalled {
        fn check(&self) -> ProbeResult {
            self.entered.store(true, Ordering::SeqCst);
            while !self.release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            ok()
        }
    }

    #[test]
    fn test_stop_does_not_wait_for_slow_check() {
        let settings = MonitorSettings {
            interval: Duration::from_millis(5),
            start_period: Duration::from_secs(0),
            retries: 3,
        };
        let entered = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let check = Stalled {
            entered: entered.clone(),
            release: release.clone(),
        };
        let updates = Arc::new(Mutex::new(0));
        let sink = updates.clone();
        let handle = HealthMonitor::new(check, settings).spawn(move |_, _| *sink.lock() += 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !entered.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(entered.load(Ordering::SeqCst));

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(2));

        // the late result is dropped
        release.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(*updates.lock(), 0);
    }

    #[test]
    fn test_stop_is_prompt() {
        let settings = MonitorSettings {
            interval: Duration::from_secs(60),
            start_period: Duration::from_secs(0),
            retries: 3,
        };
        let monitor = HealthMonitor::new(Scripted::new(&[true]), settings);
        let handle = monitor.spawn(|_, _| {});
        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
