#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::{Parser, Subcommand};
use lampctl::{LampConfig, OutputFormat};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::config::ConfigArgs;
use commands::database::DatabaseArgs;
use commands::network::IpArgs;
use commands::script::{ExportArgs, ImportArgs};
use commands::server::{ServeArgs, UpArgs};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.lampctl/lampctl.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long, global = true)]
    debug: bool,

    /// Output format: table (default), markdown, json, json-pretty, text
    #[clap(long, short = 'f', global = true, value_parser = parse_output_format)]
    format: Option<OutputFormat>,

    /// Shortcut for --format json
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, select, inspect, clear and delete databases
    Db(DatabaseArgs),

    /// Export the active database to an SQL script
    Export(ExportArgs),

    /// Import an SQL script into the active database
    Import(ImportArgs),

    /// Start the web server and supervise it until Ctrl-C
    Up(UpArgs),

    /// Run the web app in the foreground (this is what `up` spawns)
    Serve(ServeArgs),

    /// Show local and public IP addresses
    Ip(IpArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

fn parse_output_format(s: &str) -> Result<OutputFormat, String> {
    s.parse()
}

fn init_logging(debug: bool) {
    let default = if debug { "lampctl=debug" } else { "lampctl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match LampConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let output_format = if cli.json {
        OutputFormat::Json
    } else {
        cli.format.unwrap_or_default()
    };

    match cli.command {
        Commands::Db(args) => commands::database::run(&config, args, output_format),
        Commands::Export(args) => commands::script::run_export(&config, args, output_format),
        Commands::Import(args) => commands::script::run_import(&config, args, output_format),
        Commands::Up(args) => commands::server::run_up(&config, args, output_format),
        Commands::Serve(args) => commands::server::run_serve(&config, args),
        Commands::Ip(args) => commands::network::run(&config, args, output_format),
        Commands::Config(args) => commands::config::run(&config, args, output_format),
    }
}
