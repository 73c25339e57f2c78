use clap::Parser;
use tracing_subscriber::EnvFilter;
use xnat_uploader_lib::args::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    if !xnat_uploader_lib::run(cli).await? {
        std::process::exit(1);
    }
    Ok(())
}
