use clap::Parser;
use tracing_subscriber::EnvFilter;
mod cli;
mod commands;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("ferritin_rgn=info,ferritin_training=info,ferritin_geometry=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();
    cli.execute()?;
    Ok(())
}
