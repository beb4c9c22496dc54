use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use streamgate::client::PlatformApiClient;
use streamgate::config::Config;
use streamgate::workers::WorkerPool;
use streamgate::{handlers, http, logging, StreamingRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_from_env();

    let config = Arc::new(Config::from_env().context("configuration error")?);

    // The primary client handles user chat and doubles as worker 0.
    let primary = Arc::new(PlatformApiClient::new(&config, config.main_bot_token.clone()));
    let me = primary
        .start()
        .await
        .context("main bot failed to start")?;
    info!(username = %me.username, dc = me.dc_id, "main bot started");

    let pool = Arc::new(WorkerPool::start(&config, Arc::clone(&primary)).await);
    let runtime = Arc::new(StreamingRuntime::new(
        Arc::clone(&config),
        Arc::clone(&pool),
    ));
    let shutdown = runtime.shutdown_token();

    let update_loop = tokio::spawn(handlers::run_update_loop(
        primary,
        Arc::clone(&config),
        pool,
        shutdown.child_token(),
    ));

    let keep_alive = if config.base_url.is_empty() {
        None
    } else {
        Some(tokio::spawn(handlers::keep_alive(
            config.base_url.clone(),
            shutdown.child_token(),
        )))
    };

    let routes = http::routes(Arc::clone(&runtime));
    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(
        ([0, 0, 0, 0], config.port),
        {
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        },
    );
    info!(%addr, archive = config.archive_channel, "gateway listening");

    let server = tokio::spawn(server);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    runtime.shutdown();

    if let Err(err) = server.await {
        error!(%err, "http server task failed");
    }
    if let Err(err) = update_loop.await {
        error!(%err, "update loop task failed");
    }
    if let Some(task) = keep_alive {
        let _ = task.await;
    }

    info!("stopped");
    Ok(())
}
