mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::run::{ExporterKind, RunArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flatpub")]
#[command(about = "Create Flatpak OCI images and publish them to container storage", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the Flatpak OCI image and publish it to container storage
    Run {
        /// Workflow state file, rewritten when the run succeeds
        #[arg(long, env = "FLATPUB_STATE")]
        state: PathBuf,
        /// Config file (defaults to discovery)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// How the Flatpak build tree is obtained
        #[arg(long, value_enum, default_value = "pre-extracted")]
        exporter: ExporterKind,
        /// Pre-extracted filesystem tarball
        #[arg(long, requires = "manifest")]
        tarball: Option<PathBuf>,
        /// Pre-extracted package manifest
        #[arg(long, requires = "tarball")]
        manifest: Option<PathBuf>,
    },
    /// Print the image ID of an OCI image layout
    Inspect {
        oci_path: PathBuf,
        /// Config file (defaults to discovery)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show version information
    Version,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            state,
            config,
            exporter,
            tarball,
            manifest,
        } => {
            commands::run::handle(RunArgs {
                state,
                config,
                exporter,
                tarball,
                manifest,
            })
            .await
        }
        Commands::Inspect { oci_path, config } => {
            commands::inspect::handle(&oci_path, config.as_deref()).await
        }
        Commands::Version => {
            println!("flatpub {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dispatch(cli.command).await {
        eprintln!();
        eprintln!("{}", "✗ flatpub failed".red().bold());
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}
