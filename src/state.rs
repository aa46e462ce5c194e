//! Shared mutable state (§4.C). Single owner, single coarse lock: every
//! accessor goes through [`SharedState::inner`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::hardware_map::JFHardControl;
use crate::store::models::{FlowInfo, MdInfo, Plate};

#[derive(Debug, Default)]
pub struct Inner {
    pub plates: Vec<Plate>,
    pub metadata: Vec<MdInfo>,
    pub flows: Vec<FlowInfo>,
    pub controllers: HashMap<i64, JFHardControl>,
    /// `"ip:port"` -> registration, per `addRegListen` (§4.F).
    pub registered_clients: HashMap<String, RegisteredClient>,
    pub nec_connected: bool,
}

#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub ip: String,
    pub port: u16,
}

impl Inner {
    pub fn clear_all(&mut self) {
        self.plates.clear();
        self.metadata.clear();
        self.flows.clear();
        self.controllers.clear();
        self.registered_clients.clear();
        self.nec_connected = false;
    }
}

/// Aggregate owning config and every loaded list/map (§4.C, §5). Cloning the
/// handle is cheap; the guarded state is shared via `Arc`.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,
    inner: Arc<Mutex<Inner>>,
}

impl SharedState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub async fn inner(&self) -> tokio::sync::MutexGuard<'_, Inner> {
        self.inner.lock().await
    }

    pub async fn clear_all(&self) {
        self.inner.lock().await.clear_all();
    }

    /// One-shot diagnostic line with container sizes (§4.C).
    pub async fn log_state(&self, context: &str) {
        let guard = self.inner.lock().await;
        info!(
            context,
            plates = guard.plates.len(),
            metadata = guard.metadata.len(),
            flows = guard.flows.len(),
            controllers = guard.controllers.len(),
            registered_clients = guard.registered_clients.len(),
            nec_connected = guard.nec_connected,
            "shared state snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DatabaseKind, IpConfig, LogConfig, PassthroughSection};

    fn test_config() -> Config {
        Config {
            database: DatabaseConfig {
                kind: DatabaseKind::Sqlite,
                path: ":memory:".into(),
                mysql_host: String::new(),
                mysql_port: 3306,
                mysql_user: String::new(),
                mysql_password: String::new(),
                mysql_database: String::new(),
            },
            log: LogConfig {
                level: "info".into(),
                path: "nenet.log".into(),
                console_output: true,
            },
            ip: IpConfig::default(),
            hardio: PassthroughSection::default(),
            jfplate: PassthroughSection::default(),
            qjcustom: PassthroughSection::default(),
        }
    }

    #[tokio::test]
    async fn clear_all_empties_every_container() {
        let state = SharedState::new(test_config());
        {
            let mut guard = state.inner().await;
            guard.plates.push(crate::store::models::fixtures::plate(1, 2));
            guard.nec_connected = true;
            guard
                .registered_clients
                .insert("10.0.0.5:55555".into(), RegisteredClient {
                    ip: "10.0.0.5".into(),
                    port: 55555,
                });
        }
        state.clear_all().await;
        let guard = state.inner().await;
        assert!(guard.plates.is_empty());
        assert!(guard.registered_clients.is_empty());
        assert!(!guard.nec_connected);
    }
}
