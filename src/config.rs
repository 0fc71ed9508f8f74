use config::Config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LampError, Result};
use crate::supervisor::{ServerCommand, SupervisorOptions};

/// Default address-echo service used for the public IP lookup
pub const DEFAULT_PUBLIC_IP_URL: &str = "https://api64.ipify.org?format=json";

/// Default arguments passed to the spawned server; `{bind}` is substituted
pub const DEFAULT_SERVER_ARGS: &[&str] = &["serve", "--bind", "{bind}"];

#[derive(Debug, Clone, Serialize)]
pub struct LampConfig {
    /// Path to the directory holding lampctl's data
    pub data_dir: String,

    /// Default database, relative to `<data_dir>/databases` unless absolute
    pub database: String,

    /// Address the supervised server binds to
    pub bind_address: String,

    /// Program spawned as the server (default: the running lampctl binary)
    pub server_program: Option<String>,

    /// Arguments for the server program
    pub server_args: Vec<String>,

    /// How long a starting server may take to accept connections
    pub startup_grace_ms: u64,

    /// How long a stopping server may take to exit before it is killed
    pub stop_timeout_ms: u64,

    /// Address-echo endpoint returning `{"ip": "..."}`
    pub public_ip_url: String,

    /// Upper bound for the public IP lookup
    pub public_ip_timeout_ms: u64,
}

const EMPTY_CONFIG: &str = r#"### lampctl configuration file

### directory for databases and other data used by lampctl
# data_dir = "~/.lampctl"

### default database, relative to <data_dir>/databases
# database = "lampctl.db"

### server process settings
# bind_address = "127.0.0.1:5000"
# server_program = "/usr/local/bin/my-server"
# server_args = ["--listen", "{bind}"]
# startup_grace_ms = 1500
# stop_timeout_ms = 5000

### public address lookup
# public_ip_url = "https://api64.ipify.org?format=json"
# public_ip_timeout_ms = 3000
"#;

/// Values as they come out of the file and environment layers
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    data_dir: Option<String>,
    database: Option<String>,
    bind_address: Option<String>,
    server_program: Option<String>,
    server_args: Option<Vec<String>>,
    startup_grace_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
    public_ip_url: Option<String>,
    public_ip_timeout_ms: Option<u64>,
}

fn home_dir() -> String {
    dirs::home_dir()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string())
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> String {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{}", home_dir(), rest)
        }
        _ => path.to_string(),
    }
}

impl Default for LampConfig {
    fn default() -> Self {
        Self {
            data_dir: format!("{}/.lampctl", home_dir()),
            database: "lampctl.db".to_string(),
            bind_address: "127.0.0.1:5000".to_string(),
            server_program: None,
            server_args: DEFAULT_SERVER_ARGS.iter().map(|s| s.to_string()).collect(),
            startup_grace_ms: 1500,
            stop_timeout_ms: 5000,
            public_ip_url: DEFAULT_PUBLIC_IP_URL.to_string(),
            public_ip_timeout_ms: 3000,
        }
    }
}

impl LampConfig {
    /// Function to create and initialize a new configuration
    ///
    /// Layers, lowest priority first: built-in defaults, the TOML file
    /// (`~/.lampctl/lampctl.toml` unless `path` is given) and `LAMPCTL_*`
    /// environment variables. A missing file is created from a commented
    /// template.
    pub fn new(path: &Option<String>) -> Result<LampConfig> {
        let mut builder = Config::builder();

        let config_file = match path {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(Self::config_file_path()),
        };

        if config_file.exists() {
            builder = builder.add_source(config::File::from(config_file.as_path()));
        } else {
            if let Some(parent) = config_file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LampError::Config(format!(
                        "Unable to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            std::fs::write(&config_file, EMPTY_CONFIG).map_err(|e| {
                LampError::Config(format!(
                    "Unable to create config file {}: {}",
                    config_file.display(),
                    e
                ))
            })?;
        }

        // Add in settings from the environment (with a prefix of LAMPCTL)
        // E.g., `LAMPCTL_BIND_ADDRESS=0.0.0.0:8080 lampctl up` would change the bind address
        builder = builder.add_source(
            config::Environment::with_prefix("LAMPCTL")
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("server_args"),
        );

        let settings = builder
            .build()
            .map_err(|e| LampError::Config(format!("Failed to build configuration: {}", e)))?;

        let raw = settings.try_deserialize::<RawConfig>().map_err(|e| {
            LampError::Config(format!("Failed to deserialize configuration: {}", e))
        })?;

        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> LampConfig {
        let defaults = LampConfig::default();
        LampConfig {
            data_dir: raw
                .data_dir
                .map(|d| expand_home(&d))
                .unwrap_or(defaults.data_dir),
            database: raw.database.unwrap_or(defaults.database),
            bind_address: raw.bind_address.unwrap_or(defaults.bind_address),
            server_program: raw.server_program.map(|p| expand_home(&p)),
            server_args: raw.server_args.unwrap_or(defaults.server_args),
            startup_grace_ms: raw.startup_grace_ms.unwrap_or(defaults.startup_grace_ms),
            stop_timeout_ms: raw.stop_timeout_ms.unwrap_or(defaults.stop_timeout_ms),
            public_ip_url: raw.public_ip_url.unwrap_or(defaults.public_ip_url),
            public_ip_timeout_ms: raw
                .public_ip_timeout_ms
                .unwrap_or(defaults.public_ip_timeout_ms),
        }
    }

    /// Directory holding the database files
    pub fn databases_dir(&self) -> PathBuf {
        Path::new(self.data_dir.trim_end_matches('/')).join("databases")
    }

    /// Path of the default database
    pub fn database_path(&self) -> PathBuf {
        let database = Path::new(&self.database);
        if database.is_absolute() {
            database.to_path_buf()
        } else {
            self.databases_dir().join(database)
        }
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn public_ip_timeout(&self) -> Duration {
        Duration::from_millis(self.public_ip_timeout_ms)
    }

    /// Whether the server is the lampctl binary itself
    pub fn uses_builtin_server(&self) -> bool {
        self.server_program.is_none()
    }

    /// The program the supervisor spawns
    pub fn server_command(&self) -> Result<ServerCommand> {
        let program = match &self.server_program {
            Some(p) => PathBuf::from(p),
            None => std::env::current_exe().map_err(|e| {
                LampError::Config(format!("Unable to locate the lampctl executable: {}", e))
            })?,
        };
        Ok(ServerCommand::new(program).args(self.server_args.iter().cloned()))
    }

    /// Supervisor settings derived from this configuration
    pub fn supervisor_options(&self) -> Result<SupervisorOptions> {
        Ok(SupervisorOptions {
            command: self.server_command()?,
            startup_grace: self.startup_grace(),
            stop_timeout: self.stop_timeout(),
        })
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let program = self
            .server_program
            .clone()
            .unwrap_or_else(|| "(lampctl)".to_string());

        [
            format!("Config File:        {}", Self::config_file_path()),
            format!("Data Directory:     {}", self.data_dir),
            format!("Databases:          {}", self.databases_dir().display()),
            format!("Default Database:   {}", self.database_path().display()),
            format!("Bind Address:       {}", self.bind_address),
            format!("Server Program:     {}", program),
            format!("Server Arguments:   {}", self.server_args.join(" ")),
            format!("Startup Grace:      {} ms", self.startup_grace_ms),
            format!("Stop Timeout:       {} ms", self.stop_timeout_ms),
            format!("Public IP URL:      {}", self.public_ip_url),
            format!("Public IP Timeout:  {} ms", self.public_ip_timeout_ms),
        ]
        .join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        format!("{}/.lampctl/lampctl.toml", home_dir())
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LampConfig::default();
        assert_eq!(config.bind_address, "127.0.0.1:5000");
        assert_eq!(config.startup_grace_ms, 1500);
        assert_eq!(config.stop_timeout_ms, 5000);
        assert_eq!(config.public_ip_timeout_ms, 3000);
        assert_eq!(config.server_args, vec!["serve", "--bind", "{bind}"]);
        assert!(config.uses_builtin_server());
    }

    #[test]
    fn test_paths() {
        let config = LampConfig {
            data_dir: "/test/dir/".to_string(),
            ..LampConfig::default()
        };
        assert_eq!(config.databases_dir(), PathBuf::from("/test/dir/databases"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/test/dir/databases/lampctl.db")
        );

        let config = LampConfig {
            database: "/elsewhere/app.db".to_string(),
            ..config
        };
        assert_eq!(config.database_path(), PathBuf::from("/elsewhere/app.db"));
    }

    #[test]
    fn test_durations() {
        let config = LampConfig {
            startup_grace_ms: 250,
            stop_timeout_ms: 2000,
            ..LampConfig::default()
        };
        assert_eq!(config.startup_grace(), Duration::from_millis(250));
        assert_eq!(config.stop_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_missing_file_is_created_from_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("lampctl.toml");

        let config = LampConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert!(path.exists());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            EMPTY_CONFIG.to_string()
        );
        assert_eq!(config.database, "lampctl.db");
    }

    #[test]
    fn test_file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lampctl.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/lamp"
database = "site.db"
server_program = "/usr/bin/env"
server_args = ["python3", "-m", "http.server", "--bind", "{bind}"]
stop_timeout_ms = 750
"#,
        )
        .unwrap();

        let config = LampConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.data_dir, "/srv/lamp");
        assert_eq!(config.database_path(), PathBuf::from("/srv/lamp/databases/site.db"));
        assert_eq!(config.stop_timeout_ms, 750);
        assert_eq!(config.startup_grace_ms, 1500);
        assert!(!config.uses_builtin_server());

        let command = config.server_command().unwrap();
        assert_eq!(command.program(), Path::new("/usr/bin/env"));
        assert_eq!(
            command.render_args("127.0.0.1:8000"),
            vec!["python3", "-m", "http.server", "--bind", "127.0.0.1:8000"]
        );
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "stop_timeout_ms = \"soon\"\n").unwrap();

        assert!(matches!(
            LampConfig::new(&Some(path.to_string_lossy().to_string())),
            Err(LampError::Config(_))
        ));
    }

    #[test]
    fn test_expand_home() {
        let home = home_dir();
        assert_eq!(expand_home("~/.lampctl"), format!("{}/.lampctl", home));
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        assert_eq!(expand_home("~other"), "~other");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }
}
