use clap::Parser;

use tmuxdeck::cli::BridgeCli;
use tmuxdeck::logging;

#[tokio::main]
async fn main() {
    logging::init();
    let config = BridgeCli::parse().into_config();
    if !tmuxdeck::bridge::agent::run(config).await {
        std::process::exit(1);
    }
}
