use crate::util::env::init_env;
use tracing::info;

/// Common bootstrap for the CLI binary:
///   * load `.env.local` / `.env` once
///   * install the tracing subscriber
///   * log which command is starting and whether writes are enabled
pub fn bootstrap_cli(bin_name: &str, command: &str, verbose: bool) -> anyhow::Result<()> {
    init_env();
    crate::logging::init_tracing(crate::logging::DEFAULT_FILTER, verbose)?;
    info!(target: "bootstrap", bin = bin_name, command, "starting");
    Ok(())
}
