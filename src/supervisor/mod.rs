//! Server process supervisor
//!
//! `ServerSupervisor` owns at most one background server process and moves it
//! through a small state machine:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |           |
//!               +-----------+--> Failed (unexpected exit)
//! ```
//!
//! Every transition happens under one mutex. Each spawned process gets a
//! dedicated waiter thread that blocks on the child and records its exit, so
//! an unexpected exit is noticed without anyone polling.
//!
//! The server leads its own process group. Stop signals go to the whole group
//! and, once the leader is gone, anything left in the group is killed.

mod process;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{LampError, Result};

pub use process::{ServerCommand, BIND_PLACEHOLDER};

/// How long to wait for the process to disappear after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Interval between readiness checks while starting
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle state of the supervised server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// The process exited on its own; stays here until `stop` or `start`
    Failed,
}

impl ServerState {
    /// Whether a process is (or may still be) alive in this state
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ServerState::Starting | ServerState::Running | ServerState::Stopping
        )
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// How the previous server process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    /// Killed after ignoring the graceful stop request
    pub forced: bool,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code)?,
            (None, Some(signal)) => write!(f, "signal {}", signal)?,
            (None, None) => write!(f, "unknown exit status")?,
        }
        if self.forced {
            write!(f, " (forced)")?;
        }
        Ok(())
    }
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub state: ServerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<ExitInfo>,
}

/// Supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub command: ServerCommand,
    /// Upper bound on waiting for the server to accept connections
    pub startup_grace: Duration,
    /// Upper bound on waiting for a graceful exit before killing
    pub stop_timeout: Duration,
}

struct Inner {
    state: ServerState,
    bind_address: Option<String>,
    pid: Option<u32>,
    /// Process group of the current server; outlives the leader's pid
    pgid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    last_exit: Option<ExitInfo>,
    /// Bumped for every spawn so a stale waiter never touches a newer process
    generation: u64,
    /// The current generation's process has been reaped
    exited: bool,
    waiter: Option<JoinHandle<()>>,
}

impl Inner {
    fn status(&self) -> ServerStatus {
        ServerStatus {
            state: self.state,
            bind_address: self.bind_address.clone(),
            pid: self.pid,
            started_at: self.started_at,
            last_exit: self.last_exit.clone(),
        }
    }

    fn reset(&mut self) {
        self.state = ServerState::Stopped;
        self.bind_address = None;
        self.pid = None;
        self.pgid = None;
        self.started_at = None;
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `done` holds or `timeout` passes; returns the final verdict
    fn wait_until<F>(&self, timeout: Duration, mut done: F) -> (MutexGuard<'_, Inner>, bool)
    where
        F: FnMut(&Inner) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if done(&guard) {
                return (guard, true);
            }
            let now = Instant::now();
            if now >= deadline {
                return (guard, false);
            }
            guard = self
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Supervises exactly one background server process
///
/// Dropping the supervisor stops a live process.
pub struct ServerSupervisor {
    options: SupervisorOptions,
    shared: Arc<Shared>,
}

impl ServerSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ServerState::Stopped,
                    bind_address: None,
                    pid: None,
                    pgid: None,
                    started_at: None,
                    last_exit: None,
                    generation: 0,
                    exited: true,
                    waiter: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Current status; never blocks on the process
    pub fn status(&self) -> ServerStatus {
        self.shared.lock().status()
    }

    /// Start the server bound to `bind_address`
    ///
    /// A no-op returning the current status while starting or running.
    /// Returns once the server accepts connections on the bind address or
    /// the startup grace period passes without the process exiting.
    pub fn start(&self, bind_address: &str) -> Result<ServerStatus> {
        let (generation, stale_waiter) = {
            let mut inner = self.shared.lock();
            match inner.state {
                ServerState::Starting | ServerState::Running => {
                    debug!("server already {}, start ignored", inner.state);
                    return Ok(inner.status());
                }
                ServerState::Stopping => {
                    return Err(LampError::InvalidState {
                        operation: "start",
                        state: inner.state.to_string(),
                    });
                }
                ServerState::Stopped | ServerState::Failed => {}
            }

            inner.state = ServerState::Starting;
            inner.bind_address = Some(bind_address.to_string());
            inner.pid = None;
            inner.started_at = None;
            inner.generation += 1;
            (inner.generation, inner.waiter.take())
        };
        if let Some(handle) = stale_waiter {
            let _ = handle.join();
        }

        if let Err(e) = self.spawn(bind_address, generation) {
            self.shared.lock().reset();
            self.shared.changed.notify_all();
            return Err(e);
        }

        self.await_ready(bind_address, generation)
    }

    fn spawn(&self, bind_address: &str, generation: u64) -> Result<()> {
        process::ensure_port_free(bind_address)?;

        let mut child = self.options.command.spawn(bind_address).map_err(|e| {
            LampError::Spawn(format!("{}: {}", self.options.command.program().display(), e))
        })?;
        let pid = child.id();

        {
            let mut inner = self.shared.lock();
            inner.pid = Some(pid);
            inner.pgid = Some(pid);
            inner.started_at = Some(Utc::now());
            inner.exited = false;
        }

        let shared = Arc::clone(&self.shared);
        let waiter = thread::Builder::new()
            .name(format!("lampctl-waiter-{}", pid))
            .spawn(move || {
                let exit = ExitInfo::from_wait(child.wait());
                let mut inner = shared.lock();
                if inner.generation == generation {
                    inner.exited = true;
                    inner.pid = None;
                    match inner.state {
                        ServerState::Starting | ServerState::Running => {
                            error!("server process {} exited unexpectedly: {}", pid, exit);
                            inner.state = ServerState::Failed;
                        }
                        _ => debug!("server process {} exited: {}", pid, exit),
                    }
                    inner.last_exit = Some(exit);
                }
                drop(inner);
                shared.changed.notify_all();
            });

        match waiter {
            Ok(handle) => {
                self.shared.lock().waiter = Some(handle);
                info!("spawned server process {} on {}", pid, bind_address);
                Ok(())
            }
            Err(e) => {
                let _ = process::kill_group(pid);
                Err(LampError::Spawn(format!(
                    "unable to monitor process {}: {}",
                    pid, e
                )))
            }
        }
    }

    fn await_ready(&self, bind_address: &str, generation: u64) -> Result<ServerStatus> {
        let deadline = Instant::now() + self.options.startup_grace;
        let mut ready = false;

        loop {
            if let Some(outcome) = self.startup_outcome(generation, ready) {
                return outcome;
            }

            if process::accepts_connections(bind_address) {
                debug!("server accepts connections on {}", bind_address);
                ready = true;
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("startup grace period elapsed for {}", bind_address);
                ready = true;
                continue;
            }
            let pause = READY_POLL_INTERVAL.min(deadline - now);
            let _ = self
                .shared
                .wait_until(pause, |inner| inner.exited || inner.generation != generation);
        }
    }

    /// Settle a pending start, or `None` while still waiting
    fn startup_outcome(&self, generation: u64, ready: bool) -> Option<Result<ServerStatus>> {
        let mut inner = self.shared.lock();
        if inner.generation != generation {
            // a newer start took over after this process had already exited
            return Some(Err(LampError::Spawn(
                "server exited during startup".to_string(),
            )));
        }

        match inner.state {
            ServerState::Failed if inner.exited => {
                let exit = inner
                    .last_exit
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown exit status".to_string());
                let pgid = inner.pgid;
                inner.reset();
                let waiter = inner.waiter.take();
                drop(inner);
                self.shared.changed.notify_all();
                if let Some(pgid) = pgid {
                    sweep_group(pgid);
                }
                if let Some(handle) = waiter {
                    let _ = handle.join();
                }
                Some(Err(LampError::Spawn(format!(
                    "server exited during startup ({})",
                    exit
                ))))
            }
            ServerState::Starting if ready => {
                inner.state = ServerState::Running;
                info!(
                    "server running (pid {}) on {}",
                    inner.pid.unwrap_or_default(),
                    inner.bind_address.as_deref().unwrap_or_default()
                );
                let status = inner.status();
                drop(inner);
                self.shared.changed.notify_all();
                Some(Ok(status))
            }
            ServerState::Starting => None,
            // stop() reset a start whose process had already failed
            state => Some(Err(LampError::Spawn(format!(
                "server start interrupted, state is {}",
                state
            )))),
        }
    }

    /// Stop the server, gracefully first and forcibly if needed
    ///
    /// A no-op when stopped. Returns only after the process has exited and
    /// been reaped. From `Failed` the supervisor is reset to `Stopped`. A stop
    /// overlapping a pending `start` or another `stop` is rejected.
    pub fn stop(&self) -> Result<ServerStatus> {
        let (pgid, generation) = {
            let mut inner = self.shared.lock();
            match inner.state {
                ServerState::Stopped => return Ok(inner.status()),
                ServerState::Starting | ServerState::Stopping => {
                    return Err(LampError::InvalidState {
                        operation: "stop",
                        state: inner.state.to_string(),
                    });
                }
                ServerState::Failed => {
                    let pgid = inner.pgid;
                    inner.reset();
                    let waiter = inner.waiter.take();
                    let status = inner.status();
                    drop(inner);
                    if let Some(pgid) = pgid {
                        sweep_group(pgid);
                    }
                    if let Some(handle) = waiter {
                        let _ = handle.join();
                    }
                    info!("failed server reset to stopped");
                    return Ok(status);
                }
                ServerState::Running => {}
            }
            inner.state = ServerState::Stopping;

            // a reaped leader's id may already belong to someone else
            if let Some(pgid) = inner.pgid.filter(|_| !inner.exited) {
                info!("stopping server process {}", pgid);
                if let Err(e) = process::terminate_group(pgid) {
                    warn!("failed to signal server process {}: {}", pgid, e);
                }
            }
            (inner.pgid, inner.generation)
        };
        self.shared.changed.notify_all();

        let exited = |inner: &Inner| inner.exited || inner.generation != generation;
        let mut forced = false;

        if let Some(pgid) = pgid {
            let (guard, done) = self.shared.wait_until(self.options.stop_timeout, exited);

            if !done {
                warn!(
                    "server process {} did not exit within {} ms, killing it",
                    pgid,
                    self.options.stop_timeout.as_millis()
                );
                forced = true;
                if let Err(e) = process::kill_group(pgid) {
                    warn!("failed to kill server process {}: {}", pgid, e);
                }
                drop(guard);

                let (mut inner, done) = self.shared.wait_until(KILL_WAIT, exited);
                if !done {
                    // still alive; hand it back to the waiter as a live process
                    inner.state = ServerState::Running;
                    error!("server process {} survived SIGKILL", pgid);
                    return Err(LampError::ProcessTimeout {
                        pid: pgid,
                        waited_ms: (self.options.stop_timeout + KILL_WAIT).as_millis() as u64,
                    });
                }
                drop(inner);
            } else {
                drop(guard);
            }

            sweep_group(pgid);
        }

        let mut inner = self.shared.lock();
        inner.reset();
        if forced {
            if let Some(exit) = inner.last_exit.as_mut() {
                exit.forced = true;
            }
        }
        let waiter = inner.waiter.take();
        let status = inner.status();
        drop(inner);
        self.shared.changed.notify_all();

        if let Some(handle) = waiter {
            let _ = handle.join();
        }
        info!("server stopped");
        Ok(status)
    }

    /// Block until the server is no longer starting or running
    ///
    /// Returns the status once it has stopped or failed, or `None` if
    /// `timeout` passed first. `None` as timeout waits indefinitely.
    pub fn wait_for_exit(&self, timeout: Option<Duration>) -> Option<ServerStatus> {
        let settled = |inner: &Inner| {
            matches!(inner.state, ServerState::Stopped | ServerState::Failed)
        };
        match timeout {
            Some(timeout) => {
                let (inner, done) = self.shared.wait_until(timeout, settled);
                done.then(|| inner.status())
            }
            None => loop {
                let (inner, done) = self.shared.wait_until(Duration::from_secs(3600), settled);
                if done {
                    return Some(inner.status());
                }
            },
        }
    }
}

/// Kill whatever the exited leader left behind in its group
#[cfg(unix)]
fn sweep_group(pgid: u32) {
    if let Err(e) = process::kill_group(pgid) {
        warn!("failed to clean up process group {}: {}", pgid, e);
    }
}

// taskkill /T already walks the tree while the leader is alive, and a
// reaped pid may have been reused
#[cfg(not(unix))]
fn sweep_group(_pgid: u32) {}

impl Drop for ServerSupervisor {
    fn drop(&mut self) {
        let state = self.shared.lock().state;
        if state.is_live() || state == ServerState::Failed {
            if let Err(e) = self.stop() {
                warn!("failed to stop server on shutdown: {}", e);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn free_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn supervisor(script: &str, grace_ms: u64, stop_ms: u64) -> ServerSupervisor {
        ServerSupervisor::new(SupervisorOptions {
            command: ServerCommand::new("sh").args(["-c", script]),
            startup_grace: Duration::from_millis(grace_ms),
            stop_timeout: Duration::from_millis(stop_ms),
        })
    }

    fn is_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    fn wait_for_state(sup: &ServerSupervisor, state: ServerState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while sup.status().state != state {
            assert!(Instant::now() < deadline, "never reached {}", state);
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Running and not a zombie waiting for an orphan reaper
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    fn gone_within(pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while is_running(pid) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        true
    }

    #[cfg(target_os = "linux")]
    fn read_pid(path: &std::path::Path) -> u32 {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(pid) = std::fs::read_to_string(path)
                .ok()
                .and_then(|s| s.trim().parse().ok())
            {
                return pid;
            }
            assert!(Instant::now() < deadline, "pid file never written");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_start_twice_spawns_once() {
        let sup = supervisor("exec sleep 30", 200, 2000);
        let bind = free_port();

        let first = sup.start(&bind).unwrap();
        assert_eq!(first.state, ServerState::Running);
        let pid = first.pid.unwrap();

        let second = sup.start(&bind).unwrap();
        assert_eq!(second.state, ServerState::Running);
        assert_eq!(second.pid, Some(pid));

        sup.stop().unwrap();
    }

    #[test]
    fn test_start_then_stop_leaves_no_process() {
        let sup = supervisor("exec sleep 30", 200, 2000);
        let bind = free_port();

        let pid = sup.start(&bind).unwrap().pid.unwrap();
        assert!(is_alive(pid));

        let status = sup.stop().unwrap();
        assert_eq!(status.state, ServerState::Stopped);
        assert!(status.pid.is_none());
        assert!(!status.last_exit.unwrap().forced);
        assert!(!is_alive(pid));

        // second stop is a no-op
        assert_eq!(sup.stop().unwrap().state, ServerState::Stopped);
        assert_eq!(sup.status().state, ServerState::Stopped);
    }

    #[test]
    fn test_stop_when_never_started() {
        let sup = supervisor("exec sleep 30", 100, 1000);
        let status = sup.stop().unwrap();
        assert_eq!(status.state, ServerState::Stopped);
        assert!(status.last_exit.is_none());
    }

    #[test]
    fn test_unexpected_exit_becomes_failed() {
        let sup = supervisor("sleep 0.5; exit 3", 100, 1000);
        let bind = free_port();

        assert_eq!(sup.start(&bind).unwrap().state, ServerState::Running);

        let status = sup.wait_for_exit(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(status.state, ServerState::Failed);
        assert_eq!(status.last_exit.unwrap().code, Some(3));

        // stop resets a failed supervisor
        assert_eq!(sup.stop().unwrap().state, ServerState::Stopped);
    }

    #[test]
    fn test_restart_after_failure() {
        let sup = supervisor("sleep 0.3; exit 1", 100, 1000);
        let bind = free_port();

        sup.start(&bind).unwrap();
        sup.wait_for_exit(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(sup.status().state, ServerState::Failed);

        let status = sup.start(&bind).unwrap();
        assert_eq!(status.state, ServerState::Running);
        sup.stop().unwrap();
    }

    #[test]
    fn test_exit_during_startup_is_spawn_error() {
        let sup = supervisor("exit 1", 2000, 1000);
        let bind = free_port();

        assert!(matches!(sup.start(&bind), Err(LampError::Spawn(_))));
        assert_eq!(sup.status().state, ServerState::Stopped);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let sup = ServerSupervisor::new(SupervisorOptions {
            command: ServerCommand::new("/nonexistent/lampctl-server"),
            startup_grace: Duration::from_millis(100),
            stop_timeout: Duration::from_millis(100),
        });

        assert!(matches!(sup.start(&free_port()), Err(LampError::Spawn(_))));
        assert_eq!(sup.status().state, ServerState::Stopped);
    }

    #[test]
    fn test_port_owned_by_someone_else_is_spawn_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let bind = listener.local_addr().unwrap().to_string();
        let sup = supervisor("exec sleep 30", 100, 1000);

        assert!(matches!(sup.start(&bind), Err(LampError::Spawn(_))));
        assert_eq!(sup.status().state, ServerState::Stopped);
    }

    #[test]
    fn test_ignoring_sigterm_gets_killed() {
        let sup = supervisor("trap '' TERM; while :; do sleep 0.1; done", 300, 300);
        let bind = free_port();

        let pid = sup.start(&bind).unwrap().pid.unwrap();
        let status = sup.stop().unwrap();

        assert_eq!(status.state, ServerState::Stopped);
        let exit = status.last_exit.unwrap();
        assert!(exit.forced);
        assert_eq!(exit.signal, Some(libc::SIGKILL));
        assert!(!is_alive(pid));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_stop_takes_down_server_children() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("worker.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let sup = supervisor(&script, 200, 2000);

        sup.start(&free_port()).unwrap();
        let worker = read_pid(&pid_file);
        assert!(is_running(worker));

        let status = sup.stop().unwrap();
        assert_eq!(status.state, ServerState::Stopped);
        assert!(!status.last_exit.unwrap().forced);
        assert!(gone_within(worker, Duration::from_secs(2)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_forced_stop_takes_down_server_children() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("worker.pid");
        let script = format!(
            "trap '' TERM; sleep 30 & echo $! > {}; while :; do sleep 0.1; done",
            pid_file.display()
        );
        let sup = supervisor(&script, 200, 300);

        sup.start(&free_port()).unwrap();
        let worker = read_pid(&pid_file);

        let status = sup.stop().unwrap();
        assert!(status.last_exit.unwrap().forced);
        assert!(gone_within(worker, Duration::from_secs(2)));
    }

    #[test]
    fn test_stop_while_starting_is_rejected() {
        // nothing listens, so the start stays pending for the whole grace period
        let sup = supervisor("exec sleep 30", 1500, 2000);
        let bind = free_port();

        thread::scope(|scope| {
            let starting = scope.spawn(|| sup.start(&bind));
            wait_for_state(&sup, ServerState::Starting);

            match sup.stop() {
                Err(LampError::InvalidState { operation, state }) => {
                    assert_eq!(operation, "stop");
                    assert_eq!(state, "starting");
                }
                other => panic!("unexpected result: {:?}", other),
            }

            let status = starting.join().unwrap().unwrap();
            assert_eq!(status.state, ServerState::Running);
        });

        let pid = sup.status().pid.unwrap();
        assert_eq!(sup.stop().unwrap().state, ServerState::Stopped);
        assert!(!is_alive(pid));
    }

    #[test]
    fn test_calls_while_stopping_are_rejected() {
        let sup = supervisor("trap '' TERM; while :; do sleep 0.1; done", 200, 1000);
        let bind = free_port();
        sup.start(&bind).unwrap();

        thread::scope(|scope| {
            let stopping = scope.spawn(|| sup.stop());
            wait_for_state(&sup, ServerState::Stopping);

            assert!(matches!(
                sup.start(&bind),
                Err(LampError::InvalidState {
                    operation: "start",
                    ..
                })
            ));
            assert!(matches!(
                sup.stop(),
                Err(LampError::InvalidState {
                    operation: "stop",
                    ..
                })
            ));
            assert_eq!(sup.status().state, ServerState::Stopping);

            let status = stopping.join().unwrap().unwrap();
            assert_eq!(status.state, ServerState::Stopped);
            assert!(status.last_exit.unwrap().forced);
        });
    }

    #[test]
    fn test_drop_stops_process() {
        let bind = free_port();
        let pid = {
            let sup = supervisor("exec sleep 30", 100, 2000);
            sup.start(&bind).unwrap().pid.unwrap()
        };
        assert!(!is_alive(pid));
    }

    #[test]
    fn test_status_serializes_lowercase_state() {
        let sup = supervisor("exec sleep 30", 100, 1000);
        let json = serde_json::to_value(sup.status()).unwrap();
        assert_eq!(json["state"], "stopped");
    }
}
