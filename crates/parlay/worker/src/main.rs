//! Parlay worker - serves built-in tasks over stdin/stdout.
//!
//! Spawned by the parent's worker pool. Protocol frames use the original
//! stdout; logs and anything tasks print go to stderr.

use clap::Parser;

#[derive(Parser)]
#[command(name = "parlay-worker")]
#[command(about = "Worker process for Parlay task dispatch")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let registry = parlay::builtins::registry();
    tracing::debug!("Worker {} starting with tasks: {:?}", std::process::id(), registry.names());

    parlay_core::serve(&registry)?;
    Ok(())
}
