//! assetline - build, watch and publish static site assets

use std::process::ExitCode;

use assetline::cli;

#[tokio::main]
async fn main() -> ExitCode {
    cli::run().await
}
