use anyhow::Result;
use draft_bench::{
    bench,
    utils::{setup_logging, LogConfig},
    Features, RunConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Argument errors exit here, before any engine work
    let config = RunConfig::parse_args();

    setup_logging(LogConfig::default()).map_err(anyhow::Error::msg)?;
    tracing::debug!(features = %Features::detect(), "detected backends");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    bench::run(&config, &mut out).await?;

    Ok(())
}
