//! Startup / lifecycle wiring (§4.H). `Services` is an explicit
//! dependency-injection record (design note 9, §9) rather than a global
//! singleton; `SharedState` remains the one mutex-guarded aggregate.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{Config, DatabaseKind};
use crate::error::CoreError;
use crate::hardware_map::build_hardware_map;
use crate::jf::JfPlateLink;
use crate::store::{MysqlStore, SqliteStore, StoreAdapter};
use crate::state::SharedState;
use crate::udp::{DataReceived, UdpMux};

/// Process-wide named lock (§7 SecondInstance). Removed on drop so a clean
/// shutdown releases it; a stale file after a crash is a known limitation
/// shared with simple pidfile-based locks.
pub struct InstanceLock {
    path: std::path::PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: impl Into<std::path::PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|_| CoreError::SecondInstance)?;
        Ok(Self { path })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Shared collaborators handed by `Arc` to the subsystems that need them.
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn StoreAdapter>,
    pub mux: Arc<UdpMux>,
}

pub struct Bootstrap {
    pub services: Arc<Services>,
    pub state: SharedState,
    pub links: HashMap<i64, Arc<JfPlateLink>>,
    pub events: mpsc::UnboundedReceiver<DataReceived>,
}

async fn open_store(config: &Config) -> Result<Arc<dyn StoreAdapter>, CoreError> {
    match config.database.kind {
        DatabaseKind::Sqlite => {
            let store = SqliteStore::connect(&config.database.path)
                .await
                .map_err(CoreError::Store)?;
            Ok(Arc::new(store))
        }
        DatabaseKind::Mysql => {
            let store = MysqlStore::connect(&config.database)
                .await
                .map_err(CoreError::Store)?;
            Ok(Arc::new(store))
        }
    }
}

/// Runs the ordered startup sequence in §4.H up through hardware map build
/// and link construction. The caller drives the metadata manager afterward.
pub async fn bootstrap(config_path: &str) -> Result<Bootstrap, CoreError> {
    info!("init CAN skipped: driven by an external collaborator outside this core");

    let config = Config::load(config_path)?;
    info!(database = ?config.database.kind, "configuration loaded");

    let store = open_store(&config).await?;

    let plates = store.load_plates().await.map_err(CoreError::Store)?;
    let metadata = store.load_meta().await.map_err(CoreError::Store)?;
    let flows = store.load_flows().await.map_err(CoreError::Store)?;
    info!(
        plates = plates.len(),
        metadata = metadata.len(),
        flows = flows.len(),
        "rows loaded"
    );

    let (controllers, _stats) = build_hardware_map(&plates, &metadata);

    let links: HashMap<i64, Arc<JfPlateLink>> = controllers
        .iter()
        .map(|(id, controller)| {
            let link = JfPlateLink::new(
                *id,
                controller.ip_addr.clone(),
                controller.ip_port as u16,
                controller.login_password.clone(),
            );
            (*id, link)
        })
        .collect();

    let state = SharedState::new(config.clone());
    {
        let mut inner = state.inner().await;
        inner.plates = plates;
        inner.metadata = metadata;
        inner.flows = flows;
        inner.controllers = controllers;
    }
    state.log_state("post-bootstrap").await;

    let (mux, events) = UdpMux::new();
    let mux = Arc::new(mux);

    for link in links.values() {
        tokio::spawn(Arc::clone(link).run());
    }

    let services = Arc::new(Services {
        config: Arc::new(config),
        store,
        mux,
    });

    Ok(Bootstrap {
        services,
        state,
        links,
        events,
    })
}

pub async fn teardown(state: &SharedState) {
    warn!("tearing down nenet-core");
    state.clear_all().await;
}
