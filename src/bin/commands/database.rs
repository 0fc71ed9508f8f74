use clap::{Args, Subcommand};
use lampctl::config::format_size;
use lampctl::database::{ClearReport, DatabaseInfo, DatabaseRegistry};
use lampctl::{LampConfig, OutputFormat};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{confirm, fail, open_registry, print_json};

/// Arguments for the Db command
#[derive(Args)]
pub struct DatabaseArgs {
    #[clap(subcommand)]
    pub command: Option<DatabaseCommands>,
}

/// Database subcommands
#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Create a new database with the application schema
    Create {
        /// File name (relative to the databases directory) or absolute path
        #[clap(value_name = "DB")]
        name: String,

        /// Make the new database the active one
        #[clap(long = "use")]
        activate: bool,
    },

    /// Delete a database file (irreversible)
    Delete {
        #[clap(value_name = "DB")]
        name: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Select the active database
    Use {
        #[clap(value_name = "DB")]
        name: String,
    },

    /// Show database status (default when no subcommand)
    Status {
        /// Database to inspect, the active one by default
        #[clap(value_name = "DB")]
        name: Option<String>,
    },

    /// Delete all rows from all tables of the active database
    Clear {
        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// List databases in the databases directory
    List,
}

#[derive(Tabled)]
struct DatabaseRow {
    #[tabled(rename = " ")]
    marker: &'static str,
    name: String,
    size: String,
    path: String,
}

#[derive(Tabled)]
struct TableRow {
    table: String,
    rows: u64,
}

pub fn run(config: &LampConfig, args: DatabaseArgs, output_format: OutputFormat) {
    let mut registry = open_registry(config);

    match args.command {
        None | Some(DatabaseCommands::Status { name: None }) => {
            let active = match registry.require_active() {
                Ok(db) => db.clone(),
                Err(e) => fail(e, output_format),
            };
            run_status(&registry, &active, output_format)
        }
        Some(DatabaseCommands::Status { name: Some(name) }) => {
            let db = registry.database(&name);
            run_status(&registry, &db, output_format)
        }
        Some(DatabaseCommands::Create { name, activate }) => {
            run_create(&mut registry, &name, activate, output_format)
        }
        Some(DatabaseCommands::Delete { name, yes }) => {
            run_delete(&mut registry, &name, yes, output_format)
        }
        Some(DatabaseCommands::Use { name }) => run_use(&mut registry, &name, output_format),
        Some(DatabaseCommands::Clear { yes }) => run_clear(&registry, yes, output_format),
        Some(DatabaseCommands::List) => run_list(&registry, output_format),
    }
}

fn render<T: Tabled>(rows: Vec<T>, output_format: OutputFormat) -> String {
    match output_format {
        OutputFormat::Markdown => Table::new(rows).with(Style::markdown()).to_string(),
        _ => Table::new(rows).with(Style::rounded()).to_string(),
    }
}

fn run_status(registry: &DatabaseRegistry, db: &lampctl::Database, output_format: OutputFormat) {
    let info = match registry.info(db) {
        Ok(info) => info,
        Err(e) => fail(e, output_format),
    };

    if output_format.is_json() {
        print_json(&info, output_format);
        return;
    }
    print_status(&info, output_format);
}

fn print_status(info: &DatabaseInfo, output_format: OutputFormat) {
    println!("Database:   {}", info.path);
    println!(
        "Status:     {}{}",
        if info.exists { "exists" } else { "not created" },
        if info.active { " (active)" } else { "" }
    );
    if let Some(size) = info.size_bytes {
        println!("Size:       {}", format_size(size));
    }
    if let Some(schema) = &info.schema {
        println!("Schema:     {}", schema);
    }

    if !info.tables.is_empty() {
        let rows: Vec<TableRow> = info
            .tables
            .iter()
            .map(|t| TableRow {
                table: t.name.clone(),
                rows: t.rows,
            })
            .collect();
        println!();
        match output_format {
            OutputFormat::Text => {
                for row in rows {
                    println!("{}: {}", row.table, row.rows);
                }
            }
            _ => println!("{}", render(rows, output_format)),
        }
    }
}

fn run_create(
    registry: &mut DatabaseRegistry,
    name: &str,
    activate: bool,
    output_format: OutputFormat,
) {
    let db = match registry.create(name) {
        Ok(db) => db,
        Err(e) => fail(e, output_format),
    };
    if activate {
        if let Err(e) = registry.set_active(db.clone()) {
            fail(e, output_format);
        }
    }

    if output_format.is_json() {
        print_json(
            &serde_json::json!({"created": db.path(), "active": activate}),
            output_format,
        );
    } else {
        println!("Created {}", db.path().display());
        if activate {
            println!("Active database is now {}", db.name());
        }
    }
}

fn run_delete(registry: &mut DatabaseRegistry, name: &str, yes: bool, output_format: OutputFormat) {
    let db = registry.database(name);
    let was_active = registry.get_active() == Some(&db);

    if !yes && !output_format.is_json() {
        let mut prompt = format!("This will permanently delete {}", db.path().display());
        if was_active {
            prompt.push_str(" (the active database)");
        }
        prompt.push_str(". Are you sure?");
        if !confirm(&prompt) {
            eprintln!("Aborted.");
            return;
        }
    }

    if let Err(e) = registry.delete(name) {
        fail(e, output_format);
    }

    if output_format.is_json() {
        print_json(
            &serde_json::json!({"deleted": db.path(), "was_active": was_active}),
            output_format,
        );
    } else {
        println!("Deleted {}", db.path().display());
        if was_active {
            eprintln!("No database is active now; run `lampctl db use <DB>` to select one.");
        }
    }
}

fn run_use(registry: &mut DatabaseRegistry, name: &str, output_format: OutputFormat) {
    let db = registry.database(name);
    if let Err(e) = registry.set_active(db.clone()) {
        fail(e, output_format);
    }

    if output_format.is_json() {
        print_json(&serde_json::json!({"active": db.path()}), output_format);
    } else {
        println!("Active database is now {}", db.path().display());
    }
}

fn run_clear(registry: &DatabaseRegistry, yes: bool, output_format: OutputFormat) {
    let db = match registry.require_active() {
        Ok(db) => db.clone(),
        Err(e) => fail(e, output_format),
    };

    if !yes && !output_format.is_json() {
        let prompt = format!(
            "This will delete all rows from all tables in {}. Are you sure?",
            db.path().display()
        );
        if !confirm(&prompt) {
            eprintln!("Aborted.");
            return;
        }
    }

    let report = match registry.clear_all_tables(&db) {
        Ok(report) => report,
        Err(e) => fail(e, output_format),
    };

    if output_format.is_json() {
        print_json(&report, output_format);
    } else {
        print_clear_report(&report, output_format);
    }
}

fn print_clear_report(report: &ClearReport, output_format: OutputFormat) {
    let rows: Vec<TableRow> = report
        .tables
        .iter()
        .map(|t| TableRow {
            table: t.table.clone(),
            rows: t.rows_deleted,
        })
        .collect();
    if !rows.is_empty() && output_format != OutputFormat::Text {
        println!("{}", render(rows, output_format));
    }
    println!(
        "Cleared {} rows from {} tables",
        report.total_rows(),
        report.tables.len()
    );
}

#[derive(Serialize)]
struct ListedDatabase {
    name: String,
    path: String,
    size_bytes: Option<u64>,
    active: bool,
}

fn run_list(registry: &DatabaseRegistry, output_format: OutputFormat) {
    let databases = match registry.list() {
        Ok(dbs) => dbs,
        Err(e) => fail(e, output_format),
    };

    let listed: Vec<ListedDatabase> = databases
        .iter()
        .map(|db| ListedDatabase {
            name: db.name(),
            path: db.path().to_string_lossy().to_string(),
            size_bytes: std::fs::metadata(db.path()).ok().map(|m| m.len()),
            active: registry.get_active() == Some(db),
        })
        .collect();

    match output_format {
        f if f.is_json() => print_json(&listed, output_format),
        OutputFormat::Text => {
            for db in &listed {
                println!("{}{}", db.name, if db.active { " *" } else { "" });
            }
        }
        _ => {
            if listed.is_empty() {
                println!("No databases in {}", registry.databases_dir().display());
                return;
            }
            let rows: Vec<DatabaseRow> = listed
                .into_iter()
                .map(|db| DatabaseRow {
                    marker: if db.active { "*" } else { "" },
                    name: db.name,
                    size: db.size_bytes.map(format_size).unwrap_or_default(),
                    path: db.path,
                })
                .collect();
            println!("{}", render(rows, output_format));
        }
    }
}
