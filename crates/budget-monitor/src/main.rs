//! budget-monitor: inspect and manage the daily spend tracked by tiergate
//!
//! ```bash
//! budget-monitor                      # status
//! budget-monitor check                # exit 1 when an alert threshold is reached
//! budget-monitor simulate code openai/gpt-4o 20000
//! budget-monitor route "fix the failing test" --attempt 1 --failure validation
//! ```

use anyhow::Result;
use budget_monitor::{run, Cli};
use clap::Parser;
use std::sync::Arc;
use tiergate::budget::SystemClock;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays parseable with --json
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();
    let code = run(&cli, Arc::new(SystemClock), &mut stdout).await?;
    drop(stdout);

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
