//! treedoc CLI
//!
//! Encode a directory into a text document and decode it back (similar to tar).

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use treedoc::{write_incompatible_report, write_sidecars, Decoder, Encoder, WalkConfig};

#[derive(Parser, Debug)]
#[command(name = "treedoc")]
#[command(version)]
#[command(about = "Directory tree to text document codec")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encode a directory into a document
    #[command(visible_alias = "c")]
    Encode {
        /// Directory to encode
        root: PathBuf,

        /// Output document (default: stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// File whose text is placed in the overview section
        #[arg(long)]
        overview: Option<PathBuf>,

        /// Files to also copy as standalone `<name>.txt` side-cars
        #[arg(long = "select")]
        selected: Vec<PathBuf>,

        /// Directory for side-car copies (default: ./selected_files_content)
        #[arg(long)]
        sidecar_dir: Option<PathBuf>,

        /// Write the list of incompatible files here
        #[arg(long)]
        incompatible_report: Option<PathBuf>,

        /// Additional directory names to skip (on top of __pycache__)
        #[arg(long = "ignore-dir")]
        ignored_dirs: Vec<String>,
    },

    /// Recreate a directory tree from a document
    #[command(visible_alias = "x")]
    Decode {
        /// Document to decode (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,

        /// Directory to decode into (default: current directory)
        #[arg(short = 'C', long, default_value = ".")]
        directory: PathBuf,
    },

    /// List the structure recorded in a document
    #[command(visible_alias = "t")]
    List {
        /// Document to list (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Encode {
            root,
            output,
            overview,
            selected,
            sidecar_dir,
            incompatible_report,
            ignored_dirs,
        } => encode(
            root,
            output,
            overview,
            selected,
            sidecar_dir,
            incompatible_report,
            ignored_dirs,
        ),
        Commands::Decode { input, directory } => decode(input, directory),
        Commands::List { input } => list(input),
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn encode(
    root: PathBuf,
    output: Option<PathBuf>,
    overview: Option<PathBuf>,
    selected: Vec<PathBuf>,
    sidecar_dir: Option<PathBuf>,
    incompatible_report: Option<PathBuf>,
    ignored_dirs: Vec<String>,
) -> Result<()> {
    let mut config = WalkConfig::default();
    config.ignored_dirs.extend(ignored_dirs);

    let mut encoder = Encoder::new().with_walk_config(config).with_selected(selected);
    if let Some(path) = overview {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read overview: {}", path.display()))?;
        encoder = encoder.with_overview(text);
    }

    let result = encoder
        .encode(&root)
        .with_context(|| format!("Failed to encode: {}", root.display()))?;

    match &output {
        Some(path) => result
            .document
            .write_to_file(path)
            .with_context(|| format!("Failed to write: {}", path.display()))?,
        None => result.document.write_to(io::stdout().lock())?,
    }

    for issue in &result.walk_issues {
        eprintln!("Skipped: {}", issue);
    }

    if !result.sidecars.is_empty() {
        let dir = sidecar_dir.unwrap_or_else(|| PathBuf::from(treedoc::encoder::SIDECAR_DIR_NAME));
        let failures = write_sidecars(&dir, &result.sidecars)
            .with_context(|| format!("Failed to write side-cars to: {}", dir.display()))?;
        for failure in &failures {
            eprintln!("Side-car failed: {}", failure);
        }
    }

    if !result.incompatible.is_empty() {
        eprintln!("Incompatible files: {}", result.incompatible.len());
        if let Some(path) = incompatible_report {
            write_incompatible_report(&path, &result.incompatible)
                .with_context(|| format!("Failed to write: {}", path.display()))?;
            eprintln!("Details in: {}", path.display());
        }
    }

    if let Some(path) = output {
        eprintln!("Created: {}", path.display());
    }

    Ok(())
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    if let Some(input_path) = input {
        fs::read_to_string(&input_path)
            .with_context(|| format!("Failed to read: {}", input_path.display()))
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}

fn decode(input: Option<PathBuf>, directory: PathBuf) -> Result<()> {
    let text = read_input(input)?;

    let report = Decoder::new()
        .decode_into(&text, &directory)
        .context("Failed to decode document")?;

    for failure in &report.failures {
        eprintln!("Failed: {}", failure);
    }
    println!(
        "Recreated {} directories and {} files in {}",
        report.created_dirs,
        report.written_files,
        directory.display()
    );

    if !report.is_success() {
        anyhow::bail!("{} entries could not be written", report.failures.len());
    }
    Ok(())
}

fn list(input: Option<PathBuf>) -> Result<()> {
    let text = read_input(input)?;
    let plan = Decoder::new().parse(&text).context("Failed to parse document")?;

    for line in &plan.structure {
        println!("{}", line);
    }
    println!();
    println!("Embedded files: {}", plan.embedded_files());
    for issue in &plan.issues {
        println!("Unreadable block: {}", issue);
    }

    Ok(())
}
