pub mod config;
pub mod database;
pub mod network;
pub mod script;
pub mod server;

use lampctl::{DatabaseRegistry, LampConfig, LampError, OutputFormat};
use serde::Serialize;

/// Open the registry, exiting when the initial database cannot be prepared
pub(crate) fn open_registry(config: &LampConfig) -> DatabaseRegistry {
    match DatabaseRegistry::open(config) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("ERROR: unable to prepare the initial database: {}", e);
            std::process::exit(1);
        }
    }
}

/// Report an error in the requested format and exit
pub(crate) fn fail(err: LampError, output_format: OutputFormat) -> ! {
    if output_format.is_json() {
        let value = serde_json::json!({"error": err.kind(), "message": err.to_string()});
        println!("{}", value);
    } else {
        eprintln!("ERROR: {}", err);
    }
    std::process::exit(1);
}

pub(crate) fn print_json<T: Serialize>(value: &T, output_format: OutputFormat) {
    match output_format.to_json(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}

/// Ask for confirmation on stderr; anything but y/yes declines
pub(crate) fn confirm(prompt: &str) -> bool {
    eprint!("{} [y/N] ", prompt);

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    let input = input.trim().to_lowercase();
    input == "y" || input == "yes"
}
