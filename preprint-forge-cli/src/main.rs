//! `preprint-forge` command line.

mod cli;

use clap::Parser;

use cli::{Cli, EXIT_FAILURE};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let code = match cli::run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}
