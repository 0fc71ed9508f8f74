use std::path::PathBuf;
use std::sync::Arc;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

use clap::Args;
use lampctl::web::{start_server, WebConfig};
use lampctl::{LampConfig, NetworkInfo, OutputFormat, ServerStatus, ServerSupervisor};
use serde_json::json;
use tracing::{info, warn};

use super::{fail, open_registry, print_json};

/// Arguments for the Up command
#[derive(Args)]
pub struct UpArgs {
    /// Address to bind the server to, `bind_address` from the config by default
    #[clap(long, short = 'b', value_name = "HOST:PORT")]
    pub bind: Option<String>,

    /// Skip the public IP lookup
    #[clap(long)]
    pub no_public_ip: bool,
}

/// Arguments for the Serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[clap(long, short = 'b', value_name = "HOST:PORT")]
    pub bind: Option<String>,

    /// Database file to serve, the configured default by default
    #[clap(long, short = 'd', value_name = "PATH")]
    pub database: Option<PathBuf>,
}

fn print_status(status: &ServerStatus, output_format: OutputFormat) {
    if output_format.is_json() {
        print_json(status, output_format);
        return;
    }

    println!("Server:     {}", status.state);
    if let Some(bind) = &status.bind_address {
        println!("Address:    http://{}", bind);
    }
    if let Some(pid) = status.pid {
        println!("PID:        {}", pid);
    }
    if let Some(started) = status.started_at {
        println!("Started:    {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(exit) = &status.last_exit {
        println!("Last exit:  {}", exit);
    }
}

fn runtime(output_format: OutputFormat) -> tokio::runtime::Runtime {
    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => fail(
            lampctl::LampError::Config(format!("unable to start async runtime: {}", e)),
            output_format,
        ),
    }
}

/// Signals that end `lampctl up`
///
/// Handlers are installed before the server is spawned; otherwise a SIGTERM
/// or SIGHUP would kill lampctl and leave the server (in its own process
/// group) running.
struct StopSignals {
    #[cfg(unix)]
    interrupt: Option<Signal>,
    #[cfg(unix)]
    terminate: Option<Signal>,
    #[cfg(unix)]
    hangup: Option<Signal>,
}

#[cfg(unix)]
fn listen(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!("Unable to listen for {}: {}", name, e);
            None
        }
    }
}

#[cfg(unix)]
async fn next(signal: &mut Option<Signal>) {
    match signal {
        Some(signal) => {
            signal.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl StopSignals {
    /// Must be called within the runtime
    fn install() -> Self {
        #[cfg(unix)]
        {
            StopSignals {
                interrupt: listen(SignalKind::interrupt(), "Ctrl-C"),
                terminate: listen(SignalKind::terminate(), "SIGTERM"),
                hangup: listen(SignalKind::hangup(), "SIGHUP"),
            }
        }
        #[cfg(not(unix))]
        {
            StopSignals {}
        }
    }

    /// Wait for the next stop request and name it
    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = next(&mut self.interrupt) => "Ctrl-C",
                _ = next(&mut self.terminate) => "SIGTERM",
                _ = next(&mut self.hangup) => "SIGHUP",
            }
        }
        #[cfg(not(unix))]
        {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "Ctrl-C",
                Err(e) => {
                    warn!("Unable to listen for Ctrl-C: {}", e);
                    std::future::pending().await
                }
            }
        }
    }
}

pub fn run_up(config: &LampConfig, args: UpArgs, output_format: OutputFormat) {
    let registry = open_registry(config);
    let database = match registry.require_active() {
        Ok(db) => db.clone(),
        Err(e) => fail(e, output_format),
    };
    let bind = args.bind.unwrap_or_else(|| config.bind_address.clone());

    let mut options = match config.supervisor_options() {
        Ok(options) => options,
        Err(e) => fail(e, output_format),
    };
    if config.uses_builtin_server() {
        options.command = options
            .command
            .arg("--database")
            .arg(database.path().to_string_lossy());
    }

    let rt = runtime(output_format);
    let mut signals = {
        let _guard = rt.enter();
        StopSignals::install()
    };

    let supervisor = Arc::new(ServerSupervisor::new(options));
    let status = match supervisor.start(&bind) {
        Ok(status) => status,
        Err(e) => fail(e, output_format),
    };

    let network = NetworkInfo::from_config(config);
    let local = network.local_address().ok();
    let public = if args.no_public_ip {
        None
    } else {
        Some(network.public_address())
    };

    if output_format.is_json() {
        print_json(
            &json!({
                "server": status,
                "database": database.path(),
                "local_address": local,
                "public_address": public.map(|p| p.to_string()),
            }),
            output_format,
        );
    } else {
        print_status(&status, output_format);
        println!("Database:   {}", database.path().display());
        if let Some(local) = local {
            println!("Local IP:   {}", local);
        }
        if let Some(public) = public {
            println!("Public IP:  {}", public);
        }
        eprintln!();
        eprintln!("Press Ctrl-C to stop the server.");
    }

    rt.block_on(async {
        let watcher = Arc::clone(&supervisor);
        let exited = tokio::task::spawn_blocking(move || watcher.wait_for_exit(None));

        tokio::select! {
            name = signals.recv() => {
                info!("{} received, stopping server", name);
            }
            res = exited => {
                if let Ok(Some(status)) = res {
                    if let Some(exit) = &status.last_exit {
                        eprintln!("Server exited on its own: {}", exit);
                    }
                }
            }
        }
    });

    let failed = supervisor.status().state == lampctl::ServerState::Failed;
    match supervisor.stop() {
        Ok(status) => {
            if !output_format.is_json() {
                println!();
            }
            print_status(&status, output_format);
        }
        Err(e) => fail(e, output_format),
    }
    drop(rt);

    if failed {
        std::process::exit(1);
    }
}

pub fn run_serve(config: &LampConfig, args: ServeArgs) {
    let bind = args.bind.unwrap_or_else(|| config.bind_address.clone());
    let database = args.database.unwrap_or_else(|| config.database_path());

    let rt = runtime(OutputFormat::Text);
    if let Err(e) = rt.block_on(start_server(WebConfig::new(bind, database))) {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn raise(signal: libc::c_int) {
        unsafe {
            libc::kill(libc::getpid(), signal);
        }
    }

    #[tokio::test]
    async fn test_terminate_and_hangup_request_stop() {
        let mut signals = StopSignals::install();

        raise(libc::SIGTERM);
        let Ok(name) = tokio::time::timeout(Duration::from_secs(2), signals.recv()).await else {
            panic!("no stop request received");
        };
        assert_eq!(name, "SIGTERM");

        raise(libc::SIGHUP);
        let Ok(name) = tokio::time::timeout(Duration::from_secs(2), signals.recv()).await else {
            panic!("no stop request received");
        };
        assert_eq!(name, "SIGHUP");
    }
}
