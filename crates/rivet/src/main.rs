use clap::Parser;
use env_logger::Env;
use log::{debug, info};
use std::io::{self, Write};
use std::path::PathBuf;

use rivet::bundler::Bundler;
use rivet::config::{Config, ConfigOverrides, EmitPolicy, Mode};
use rivet::emit::Artifact;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entry module, resolved against the build context
    #[arg(short, long)]
    entry: Option<String>,

    /// Directory the artifacts are written to
    #[arg(short, long)]
    output_path: Option<PathBuf>,

    /// Output file name template ([name], [hash])
    #[arg(long)]
    filename: Option<String>,

    /// URL prefix for emitted files
    #[arg(long)]
    public_path: Option<String>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Roots that must share a module before it moves to the vendor chunk
    #[arg(long)]
    min_chunks: Option<usize>,

    /// Merge chunks smaller than this many bytes (production only)
    #[arg(long)]
    min_chunk_size: Option<usize>,

    /// Attempt every artifact and report all write failures
    #[arg(long)]
    best_effort: bool,

    /// Build and report without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            entry: self.entry.clone(),
            mode: self.mode,
            output_path: self.output_path.clone(),
            filename: self.filename.clone(),
            public_path: self.public_path.clone(),
            min_chunks: self.min_chunks,
            min_chunk_size: self.min_chunk_size,
            externals: None,
            emit_policy: self.best_effort.then_some(EmitPolicy::BestEffort),
        }
    }
}

fn print_artifacts(artifacts: &[Artifact], dry_run: bool) -> io::Result<()> {
    let width = artifacts
        .iter()
        .map(|artifact| artifact.file_name.len())
        .max()
        .unwrap_or_default();

    let mut stdout = io::stdout().lock();
    for artifact in artifacts {
        writeln!(
            stdout,
            "{:width$}  {:<6}  {:.2} kB",
            artifact.file_name,
            format!("{:?}", artifact.kind).to_lowercase(),
            artifact.size() as f64 / 1024.0,
        )?;
    }
    if dry_run {
        writeln!(stdout, "(dry run, nothing written)")?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let log_level = match cli.verbose {
        0 => "warn",  // Default: warnings and errors only
        1 => "info",  // -v: informational messages
        2 => "debug", // -vv: debug messages
        _ => "trace", // -vvv or more: trace messages
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    debug!(
        "Verbosity level: {} (log level: {})",
        cli.verbose, log_level
    );
    info!("Starting rivet");

    let config = Config::load(cli.config.as_deref())?;
    let config = cli.overrides().apply_to(config);
    debug!("Configuration: {:?}", config);

    let bundler = Bundler::new(config);
    let output = if cli.dry_run {
        bundler.build()?
    } else {
        bundler.bundle()?
    };

    print_artifacts(&output.artifacts, cli.dry_run)?;
    info!(
        "Bundled {} module(s) into {} artifact(s)",
        output.graph.len(),
        output.artifacts.len()
    );

    Ok(())
}
