//! mship CLI entry point.

use metrics_shipper::cli::{self, Cli};
use metrics_shipper::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse_args();

    // Execute the command
    cli::execute(cli).await
}
