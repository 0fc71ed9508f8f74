//! OS process plumbing for the server supervisor
//!
//! - Command description and `{bind}` substitution
//! - Port pre-check and readiness check
//! - Graceful and forced termination of the server's process group
//!   (SIGTERM then SIGKILL on unix)

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::error::{LampError, Result};

use super::ExitInfo;

/// Placeholder replaced by the bind address in server arguments
pub const BIND_PLACEHOLDER: &str = "{bind}";

const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// The program spawned as the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl ServerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments with every `{bind}` replaced by `bind`
    pub fn render_args(&self, bind: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(BIND_PLACEHOLDER, bind))
            .collect()
    }

    pub(crate) fn spawn(&self, bind: &str) -> std::io::Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(self.render_args(bind))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // keep terminal signals (Ctrl-C) away from the server; only the
        // supervisor decides when it stops
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn()
    }
}

impl std::fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn resolve(bind: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = bind
        .to_socket_addrs()
        .map_err(|e| LampError::Spawn(format!("invalid bind address '{}': {}", bind, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(LampError::Spawn(format!(
            "bind address '{}' did not resolve",
            bind
        )));
    }
    Ok(addrs)
}

/// Fail when another owner already listens on `bind`
pub(crate) fn ensure_port_free(bind: &str) -> Result<()> {
    for addr in resolve(bind)? {
        match TcpListener::bind(addr) {
            Ok(_listener) => {}
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                return Err(LampError::Spawn(format!(
                    "address {} is already in use",
                    addr
                )));
            }
            Err(e) => {
                return Err(LampError::Spawn(format!("cannot bind {}: {}", addr, e)));
            }
        }
    }
    Ok(())
}

/// Whether something accepts TCP connections on `bind`
pub(crate) fn accepts_connections(bind: &str) -> bool {
    let Ok(addrs) = resolve(bind) else {
        return false;
    };
    addrs.into_iter().any(|mut addr| {
        // a wildcard bind is reachable through loopback
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok()
    })
}

impl ExitInfo {
    pub(crate) fn from_wait(result: std::io::Result<ExitStatus>) -> Self {
        let (code, signal) = match result {
            Ok(status) => (status.code(), exit_signal(&status)),
            Err(_) => (None, None),
        };
        ExitInfo {
            code,
            signal,
            forced: false,
            at: Utc::now(),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Ask the server and everything in its process group to exit
#[cfg(unix)]
pub(crate) fn terminate_group(pgid: u32) -> std::io::Result<()> {
    signal_group(pgid, libc::SIGTERM)
}

/// Kill the server's whole process group outright
#[cfg(unix)]
pub(crate) fn kill_group(pgid: u32) -> std::io::Result<()> {
    signal_group(pgid, libc::SIGKILL)
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .ok()
        // 0 and 1 would address our own group or every process
        .filter(|&p| p > 1)
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "invalid process group"))?;
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    // group already empty
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

#[cfg(not(unix))]
pub(crate) fn terminate_group(pid: u32) -> std::io::Result<()> {
    taskkill(pid, false)
}

#[cfg(not(unix))]
pub(crate) fn kill_group(pid: u32) -> std::io::Result<()> {
    taskkill(pid, true)
}

#[cfg(not(unix))]
fn taskkill(pid: u32, force: bool) -> std::io::Result<()> {
    let pid = pid.to_string();
    let mut args = vec!["/PID", pid.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    Command::new("taskkill")
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_args() {
        let command = ServerCommand::new("server").args(["--listen", "{bind}", "--bind={bind}"]);
        assert_eq!(
            command.render_args("0.0.0.0:80"),
            vec!["--listen", "0.0.0.0:80", "--bind=0.0.0.0:80"]
        );
        assert_eq!(command.to_string(), "server --listen {bind} --bind={bind}");
    }

    #[test]
    fn test_port_checks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let bind = listener.local_addr().unwrap().to_string();

        assert!(matches!(ensure_port_free(&bind), Err(LampError::Spawn(_))));
        assert!(accepts_connections(&bind));

        drop(listener);
        assert!(ensure_port_free(&bind).is_ok());
        assert!(!accepts_connections(&bind));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_group_rejects_special_ids() {
        assert!(terminate_group(0).is_err());
        assert!(kill_group(1).is_err());
    }

    #[test]
    fn test_invalid_bind_address() {
        assert!(matches!(
            ensure_port_free("not an address"),
            Err(LampError::Spawn(_))
        ));
        assert!(!accepts_connections("not an address"));
    }
}
