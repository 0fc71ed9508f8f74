use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use lampctl::database::DatabaseRegistry;
use lampctl::{Database, LampConfig, OutputFormat};

use super::{fail, open_registry, print_json};

/// Arguments for the Export command
#[derive(Args)]
pub struct ExportArgs {
    /// Destination script file
    #[clap(value_name = "FILE")]
    pub file: PathBuf,

    /// Export this database instead of the active one
    #[clap(long, short = 'd', value_name = "DB")]
    pub database: Option<String>,
}

/// Arguments for the Import command
#[derive(Args)]
pub struct ImportArgs {
    /// Script file to replay
    #[clap(value_name = "FILE")]
    pub file: PathBuf,

    /// Import into this database instead of the active one
    #[clap(long, short = 'd', value_name = "DB")]
    pub database: Option<String>,
}

fn target(registry: &DatabaseRegistry, name: Option<&str>, output_format: OutputFormat) -> Database {
    match name {
        Some(name) => registry.database(name),
        None => match registry.require_active() {
            Ok(db) => db.clone(),
            Err(e) => fail(e, output_format),
        },
    }
}

pub fn run_export(config: &LampConfig, args: ExportArgs, output_format: OutputFormat) {
    let registry = open_registry(config);
    let db = target(&registry, args.database.as_deref(), output_format);

    let started = Instant::now();
    let statements = match registry.export(&db, &args.file) {
        Ok(n) => n,
        Err(e) => fail(e, output_format),
    };

    if output_format.is_json() {
        print_json(
            &serde_json::json!({
                "database": db.path(),
                "file": args.file,
                "statements": statements,
            }),
            output_format,
        );
    } else {
        println!(
            "Exported {} statements from {} to {} in {:.2?}",
            statements,
            db.name(),
            args.file.display(),
            started.elapsed()
        );
    }
}

pub fn run_import(config: &LampConfig, args: ImportArgs, output_format: OutputFormat) {
    let registry = open_registry(config);
    let db = target(&registry, args.database.as_deref(), output_format);

    let started = Instant::now();
    let statements = match registry.import(&db, &args.file) {
        Ok(n) => n,
        Err(e) => fail(e, output_format),
    };

    if output_format.is_json() {
        print_json(
            &serde_json::json!({
                "database": db.path(),
                "file": args.file,
                "statements": statements,
            }),
            output_format,
        );
    } else {
        println!(
            "Imported {} statements from {} into {} in {:.2?}",
            statements,
            args.file.display(),
            db.name(),
            started.elapsed()
        );
    }
}
