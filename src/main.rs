mod core;
mod interfaces;
mod logging;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // `goosed mcp <name>` serves a platform extension over stdio; stdout is
    // the protocol channel, so logging stays off in that mode.
    if args.len() > 2 && args[1] == "mcp" {
        return interfaces::mcp::serve(&args[2]).await;
    }

    logging::init();
    let config = core::config::Config::load()?;
    let server = interfaces::web::ApiServer::new(config).await?;
    server.serve().await
}
