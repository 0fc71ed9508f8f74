use std::path::Path;

use clap::Args;
use lampctl::config::format_size;
use lampctl::database::ACTIVE_STATE_FILE;
use lampctl::{LampConfig, OutputFormat};
use serde::Serialize;

use super::print_json;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also list the files in the data directory
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo<'a> {
    config_file: String,
    #[serde(flatten)]
    settings: &'a LampConfig,
    databases_dir: String,
    default_database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<FileInfo>>,
}

#[derive(Debug, Serialize)]
struct FileInfo {
    name: String,
    path: String,
    size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<String>,
}

fn collect_files(dir: &Path, prefix: &str, files: &mut Vec<FileInfo>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().ok().map(|t| {
            let datetime: chrono::DateTime<chrono::Utc> = t.into();
            datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
        });
        files.push(FileInfo {
            name: format!("{}{}", prefix, entry.file_name().to_string_lossy()),
            path: entry.path().to_string_lossy().to_string(),
            size_bytes: metadata.len(),
            modified,
        });
    }
}

pub fn run(config: &LampConfig, args: ConfigArgs, output_format: OutputFormat) {
    let ConfigArgs { verbose } = args;

    let data_dir = Path::new(&config.data_dir);
    let active_database = std::fs::read_to_string(data_dir.join(ACTIVE_STATE_FILE))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let files = verbose.then(|| {
        let mut files = Vec::new();
        collect_files(data_dir, "", &mut files);
        collect_files(&config.databases_dir(), "databases/", &mut files);
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    });

    let info = ConfigInfo {
        config_file: LampConfig::config_file_path(),
        settings: config,
        databases_dir: config.databases_dir().to_string_lossy().to_string(),
        default_database: config.database_path().to_string_lossy().to_string(),
        active_database,
        files,
    };

    if output_format.is_json() {
        print_json(&info, output_format);
        return;
    }

    println!("lampctl Configuration");
    println!("=====================\n");
    println!("{}", config.summary());
    println!(
        "Active Database:    {}",
        info.active_database.as_deref().unwrap_or("(none)")
    );

    if let Some(files) = &info.files {
        println!();
        println!("Files:");
        if files.is_empty() {
            println!("  (none)");
        }
        for file in files {
            println!(
                "  {:<32} {:>10}  {}",
                file.name,
                format_size(file.size_bytes),
                file.modified.as_deref().unwrap_or("")
            );
        }
    } else {
        println!();
        println!("Use --verbose to list data files.");
    }
}
