//! The long-running service: one indexer loop per enabled chain, one
//! executor loop, one webhook dispatcher loop and the status API, all
//! stopped by a single watch channel.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use autopay_core::chain::{ChainClient, EvmChainClient};
use autopay_core::executor::{Executor, ExecutorChain};
use autopay_core::indexer::Indexer;
use autopay_core::store::{PgStore, Store};
use autopay_core::webhook::{HttpTransport, WebhookDispatcher};

use crate::api;
use crate::config::FileConfig;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;

/// How long loops get to finish their current iteration after the shutdown
/// signal before the process exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Run the relayer until SIGINT/SIGTERM.
pub async fn run(config: FileConfig, pool: PgPool) -> anyhow::Result<()> {
    let signer = crate::config::get_signer()?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut executor_chains = Vec::new();

    for chain in config.chains.iter().filter(|c| c.enabled) {
        let settings = chain.to_settings();
        let client: Arc<dyn ChainClient> = Arc::new(EvmChainClient::connect(
            chain.rpc_url.clone(),
            chain.policy_manager,
            signer.clone(),
        ));

        let indexer = Indexer::new(store.clone(), client.clone(), settings.clone());
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { indexer.run_loop(rx).await }));

        executor_chains.push(ExecutorChain { settings, client });
        tracing::info!(chain = %chain.name, chain_id = chain.chain_id, "chain enabled");
    }

    let executor = Executor::new(store.clone(), executor_chains, config.executor.to_settings());
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { executor.run_loop(rx).await }));

    let transport = Arc::new(HttpTransport::new(config.webhooks.timeout()));
    let dispatcher = WebhookDispatcher::new(store.clone(), transport, config.webhooks.to_settings());
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { dispatcher.run_loop(rx).await }));

    let chain_ids: Vec<i64> = config.chains.iter().map(|c| c.chain_id).collect();
    let router = api::build_router(AppState::new(store, chain_ids));
    let listener = TcpListener::bind(config.api.listen).await?;
    tracing::info!("Status API listening on {}", config.api.listen);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The server only returns after a shutdown signal; stop the loops and
    // give in-flight iterations a bounded window to finish.
    let _ = shutdown_tx.send(true);
    let join_all = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, join_all).await.is_err() {
        tracing::warn!("loops did not stop within the grace period, exiting anyway");
    }

    tracing::info!("Closing database connections...");
    pool.close().await;
    tracing::info!("Relayer shutdown complete");
    Ok(())
}
