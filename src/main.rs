//! nenet-core entry point: wires configuration, storage, the hardware map,
//! the metadata manager, and the CLI REPL together (§4.H).

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use nenet_core::lifecycle;
use nenet_core::metadata_manager::MetadataManager;

const CONFIG_PATH_ENV: &str = "NENET_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "nenet.ini";
const LOCK_PATH: &str = "nenet-core.lock";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let _lock = match lifecycle::InstanceLock::acquire(LOCK_PATH) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::error!(error = %e, "another instance is already running");
            return ExitCode::FAILURE;
        }
    };

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let bootstrap = match lifecycle::bootstrap(&config_path).await {
        Ok(bootstrap) => bootstrap,
        Err(e) => {
            tracing::error!(error = %e, fatal = e.fatal(), "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let manager = std::sync::Arc::new(MetadataManager::new(
        bootstrap.state.clone(),
        bootstrap.services.store.clone(),
        bootstrap.services.mux.clone(),
        bootstrap.links,
        &bootstrap.state.inner().await.metadata.clone(),
    ));

    if let Err(e) = manager.bind_channels() {
        tracing::error!(error = %e, "failed to bind udp channels");
        return ExitCode::FAILURE;
    }

    let manager_task = tokio::spawn(manager.clone().run(bootstrap.events));
    let hello_manager = manager.clone();
    tokio::spawn(async move { hello_manager.send_initial_hello().await });

    let (cli_thread, quit_rx) = nenet_core::cli::spawn(bootstrap.state.clone());

    tokio::task::spawn_blocking(move || quit_rx.recv())
        .await
        .ok();

    lifecycle::teardown(&bootstrap.state).await;
    manager_task.abort();
    let _ = cli_thread.join();

    ExitCode::SUCCESS
}
