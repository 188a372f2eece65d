use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{self, Context};
use clap::{Args, Parser, Subcommand};
use rtlsquash::rootfs::{Operation, Report};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// RTL RootFS tool
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Log more detail to stderr (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable logging
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check integrity of RTL RootFS image
    Check(CheckArgs),
    /// Build an RTL RootFS image from a SquashFS
    Build(BuildArgs),
    /// Only output the RTL RootFS checksum of a SquashFS
    Sum(SumArgs),
    /// Check RTL RootFS image, and extract the SquashFS from the image (without the checksum)
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
    rootfs_flash_image: PathBuf,
}

#[derive(Args, Debug)]
struct BuildArgs {
    squashfs_image: PathBuf,
    rootfs_image: PathBuf,
}

#[derive(Args, Debug)]
struct SumArgs {
    squashfs_image: PathBuf,
    checksum_file: PathBuf,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    rootfs_flash_image: PathBuf,
    squashfs_out: PathBuf,
}

impl From<Command> for Operation {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Check(a) => Operation::Check { image: a.rootfs_flash_image },
            Command::Build(a) => Operation::Build { squashfs: a.squashfs_image, rootfs: a.rootfs_image },
            Command::Sum(a) => Operation::Sum { squashfs: a.squashfs_image, checksum: a.checksum_file },
            Command::Extract(a) => Operation::Extract { image: a.rootfs_flash_image, squashfs: a.squashfs_out },
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli);
    Ok(ExitCode::from(run(cli)?))
}

/// Run the parsed command line and return the process exit status
fn run(cli: Cli) -> anyhow::Result<u8> {
    let Some(command) = cli.command else {
        let argv0 = std::env::args().next().unwrap_or_else(|| "rtlrootfs".to_string());
        println!("OOPS: Need command. Run {} -h for help.", argv0);
        return Ok(1);
    };

    let op = Operation::from(command);
    let report = op.run()
        .with_context(|| format!("{} failed on {}", op.name(), op.input().display()))?;
    debug!(?report, "done");

    // Only verification results are printed; a failed checksum still exits cleanly
    if let Report::Verified(v) = report {
        println!("{}", v);
    }
    Ok(0)
}

fn init_logging(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "off",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
