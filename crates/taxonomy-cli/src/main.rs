//! Primary entrypoint for the `taxonomy` CLI binary.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    taxonomy_cli::run().await
}
