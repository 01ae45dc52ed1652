use batchrun::cli::{execute_command, init_logging, Cli, EXIT_ERROR};
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute_command(cli.command).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
