use vidrelay_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize the application (ledger, sink, worker pool, routes)
    let (state, router) = vidrelay_api::setup::initialize_app(config.clone()).await?;

    // Start the server
    vidrelay_api::setup::server::start_server(&config, router).await?;

    if let Some(queue) = state.queue.as_ref() {
        queue.shutdown().await;
    }

    Ok(())
}
