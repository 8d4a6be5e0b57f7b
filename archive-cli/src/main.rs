/*!
Archive CLI - Command-line interface for object-graph archives.

This CLI provides utilities for inspecting the version headers of archives
written in either encoding, and for producing header-only archives used as
fixtures.
*/

use archive_core::{
    open_reader, open_writer, ArchiveConfig, ArchiveError, Format, TypeRegistry, VersionInfo,
    VersionTable,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "archive")]
#[command(about = "CLI for object-graph archives")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Wire encoding; `auto` picks text for `.txt` files and binary otherwise
    #[arg(short, long, global = true, value_enum, default_value = "auto", env = "ARCHIVE_FORMAT")]
    format: FormatArg,

    /// Print Prometheus metrics after the command (needs the `metrics` feature)
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Auto,
    Binary,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the library versions recorded in an archive header
    Inspect {
        /// Archive file
        file: PathBuf,
        /// Print the header as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write an archive holding only a version header
    Stamp {
        /// Archive file to create
        file: PathBuf,
        /// Library version as NAME=VERSION, repeatable
        #[arg(short, long = "library", value_parser = parse_library)]
        libraries: Vec<(String, VersionInfo)>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// List the archives in a directory
    List {
        /// Directory to scan
        dir: PathBuf,
    },
}

#[derive(Tabled)]
struct LibraryRow {
    #[tabled(rename = "Library")]
    library: String,
    #[tabled(rename = "Version")]
    version: String,
}

#[derive(Tabled)]
struct ArchiveRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Format")]
    format: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Libraries")]
    libraries: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Inspect { file, json } => inspect(file, cli.format, *json)?,
        Commands::Stamp {
            file,
            libraries,
            force,
        } => stamp(file, cli.format, libraries, *force)?,
        Commands::List { dir } => list(dir, cli.format)?,
    }

    if cli.metrics {
        print_metrics()?;
    }

    Ok(())
}

#[cfg(feature = "metrics")]
fn print_metrics() -> Result<(), anyhow::Error> {
    if let Some(metrics) = archive_core::observability::ArchiveMetrics::global() {
        print!("{}", metrics.gather_metrics()?);
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn print_metrics() -> Result<(), anyhow::Error> {
    warn!("Metrics support not enabled");
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_library(arg: &str) -> Result<(String, VersionInfo), String> {
    let (name, version) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VERSION, got {arg:?}"))?;
    if name.is_empty() {
        return Err(format!("missing library name in {arg:?}"));
    }
    let version = version.parse().map_err(|e: ArchiveError| e.to_string())?;
    Ok((name.to_string(), version))
}

fn config_for(format: FormatArg, path: &Path) -> ArchiveConfig {
    match format {
        FormatArg::Auto => ArchiveConfig::for_path(path),
        FormatArg::Binary => ArchiveConfig::binary(),
        FormatArg::Text => ArchiveConfig::text(),
    }
}

/// Read only the version header of an archive
fn read_header(path: &Path, config: &ArchiveConfig) -> Result<VersionTable, ArchiveError> {
    // Headers never reference polymorphic classes
    let registry = TypeRegistry::new();
    let file = File::open(path)?;
    let ar = open_reader(config, file, &registry)?;
    let versions = ar.versions().clone();
    Ok(versions)
}

fn write_stamp(path: &Path, config: &ArchiveConfig, versions: VersionTable) -> Result<(), ArchiveError> {
    let registry = TypeRegistry::new();
    let file = File::create(path)?;
    let ar = open_writer(config, file, &registry, versions)?;
    ar.finish()
}

fn inspect(path: &Path, format: FormatArg, json: bool) -> Result<(), anyhow::Error> {
    let config = config_for(format, path);
    info!("Inspecting {} as {:?}", path.display(), config.format);

    let versions = read_header(path, &config)?;
    if json {
        let text: std::collections::BTreeMap<&str, String> = versions
            .iter()
            .map(|(library, version)| (library.as_str(), version.to_string()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&text)?);
    } else if versions.is_empty() {
        println!("No library versions recorded");
    } else {
        let rows: Vec<LibraryRow> = versions
            .iter()
            .map(|(library, version)| LibraryRow {
                library: library.clone(),
                version: version.to_string(),
            })
            .collect();
        println!("{}", Table::new(rows));
    }
    Ok(())
}

fn stamp(
    path: &Path,
    format: FormatArg,
    libraries: &[(String, VersionInfo)],
    force: bool,
) -> Result<(), anyhow::Error> {
    if path.exists() && !force {
        return Err(anyhow::anyhow!(
            "{} already exists, pass --force to overwrite",
            path.display()
        ));
    }

    let config = config_for(format, path);
    let versions: VersionTable = libraries.iter().cloned().collect();
    debug!("Stamping {} with {} libraries", path.display(), versions.len());
    write_stamp(path, &config, versions)?;
    println!("✓ Wrote {}", path.display());
    Ok(())
}

fn list(dir: &Path, format: FormatArg) -> Result<(), anyhow::Error> {
    if !dir.exists() {
        println!("No directory found at: {}", dir.display());
        return Ok(());
    }

    let mut rows = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }

        let config = config_for(format, &path);
        match read_header(&path, &config) {
            Ok(versions) => {
                let size = match std::fs::metadata(&path) {
                    Ok(meta) => format_size(meta.len()),
                    Err(_) => "Unknown".to_string(),
                };
                rows.push(ArchiveRow {
                    file: path
                        .file_name()
                        .unwrap_or_default()
                        .to_string_lossy()
                        .to_string(),
                    format: format_name(config.format).to_string(),
                    size,
                    libraries: versions
                        .iter()
                        .map(|(library, version)| format!("{library} {version}"))
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
            }
        }
    }

    if rows.is_empty() {
        println!("No archives found");
    } else {
        rows.sort_by(|a, b| a.file.cmp(&b.file));
        println!("{}", Table::new(rows));
    }
    Ok(())
}

fn format_name(format: Format) -> &'static str {
    match format {
        Format::Binary => "binary",
        Format::Text => "text",
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
