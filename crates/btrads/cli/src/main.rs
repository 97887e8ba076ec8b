//! `btrads` binary entry point

use colored::Colorize;

#[tokio::main]
async fn main() {
    if let Err(err) = btrads_cli::run().await {
        eprintln!("{} {}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}
