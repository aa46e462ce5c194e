//! Metadata manager (§4.F): owns the NEC and interface UDP channels, the
//! metadata route cache, and fans DO writes out to JF plate links.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::CoreError;
use crate::jf::JfPlateLink;
use crate::protocol::{self, Message, MessageType, MetaInfo};
use crate::state::{RegisteredClient, SharedState};
use crate::store::StoreAdapter;
use crate::udp::{DataReceived, UdpMux};

const NEC_HEARTBEAT: &[u8] = b"NECRunSuccess";
const NENET_HELLO: &[u8] = b"NENetRunSuccess";
const BIND_GRACE: std::time::Duration = std::time::Duration::from_millis(200);

#[derive(Debug, Clone)]
struct Route {
    plate_type: i32,
    control_id: i64,
    hard_addr: i32,
    tport: i32,
}

fn build_routes(metadata: &[crate::store::models::MdInfo]) -> HashMap<i64, Route> {
    let mut routes = HashMap::new();
    for md in metadata.iter().filter(|m| matches!(m.plate_type_id, 3 | 4 | 5)) {
        if md.tport < 0 || md.tport >= 16 {
            continue;
        }
        let control_id = if md.plate_type_id == 5 {
            md.plate_id
        } else {
            md.plate_control_id
        };
        routes.insert(
            md.pk_id,
            Route {
                plate_type: md.plate_type_id,
                control_id,
                hard_addr: md.plate_hard_addr,
                tport: md.tport,
            },
        );
    }
    routes
}

fn build_md_in_snapshot(metadata: &[crate::store::models::MdInfo]) -> Message {
    let items = metadata
        .iter()
        .map(|md| MetaInfo {
            d: md.pk_id,
            v: md.current_value.to_string(),
            n: 0,
            model: 0,
        })
        .collect();
    Message::with_items("md_in", items)
}

pub struct MetadataManager {
    state: SharedState,
    store: Arc<dyn StoreAdapter>,
    mux: Arc<UdpMux>,
    links: HashMap<i64, Arc<JfPlateLink>>,
    routes: StdMutex<HashMap<i64, Route>>,
    nec_local_port: u16,
    interface_local_port: u16,
}

impl MetadataManager {
    pub fn new(
        state: SharedState,
        store: Arc<dyn StoreAdapter>,
        mux: Arc<UdpMux>,
        links: HashMap<i64, Arc<JfPlateLink>>,
        metadata: &[crate::store::models::MdInfo],
    ) -> Self {
        let cfg = &state.config.ip;
        Self {
            nec_local_port: cfg.nenet_nec_port,
            interface_local_port: cfg.interface_port,
            state,
            store,
            mux,
            links,
            routes: StdMutex::new(build_routes(metadata)),
        }
    }

    fn config(&self) -> Arc<Config> {
        self.state.config.clone()
    }

    /// Binds the NEC and interface ports on the given muxer. The caller
    /// drives `run` against the muxer's event stream afterwards (§4.F).
    pub fn bind_channels(&self) -> Result<(), CoreError> {
        let cfg = self.config();
        self.mux.bind(&cfg.ip.nenet_ip, self.nec_local_port)?;
        self.mux.bind(&cfg.ip.nenet_ex_ip, self.interface_local_port)?;
        Ok(())
    }

    pub async fn send_initial_hello(self: &Arc<Self>) {
        tokio::time::sleep(BIND_GRACE).await;
        self.send_to_nec(NENET_HELLO.to_vec());
        self.broadcast_md_in_snapshot().await;
    }

    /// Drains muxer events forever, dispatching by `local_port` (§4.F, §9).
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<DataReceived>) {
        while let Some(event) = events.recv().await {
            if event.local_port == self.nec_local_port {
                self.handle_nec_ingress(&event.bytes).await;
            } else if event.local_port == self.interface_local_port {
                self.handle_interface_ingress(&event.sender_ip, event.sender_port, &event.bytes)
                    .await;
            }
        }
    }

    async fn handle_nec_ingress(self: &Arc<Self>, bytes: &[u8]) {
        if bytes == NEC_HEARTBEAT {
            let already_connected = {
                let mut inner = self.state.inner().await;
                let was = inner.nec_connected;
                inner.nec_connected = true;
                was
            };
            if !already_connected {
                info!("nec session connected");
                self.send_to_nec(NENET_HELLO.to_vec());
                self.broadcast_md_in_snapshot().await;
            }
            return;
        }

        match protocol::parse(bytes) {
            Ok(msg) => {
                self.fan_out_do_refresh().await;
                if matches!(
                    msg.message_type(),
                    MessageType::MdChange | MessageType::MdIn
                ) {
                    self.broadcast_md_in_snapshot().await;
                }
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed nec datagram");
            }
        }
    }

    async fn handle_interface_ingress(self: &Arc<Self>, sender_ip: &str, sender_port: u16, bytes: &[u8]) {
        let msg = match protocol::parse(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "dropping malformed interface datagram");
                return;
            }
        };

        match msg.message_type() {
            MessageType::SetValue => {
                let ok = self.apply_set_value(&msg).await;
                self.reply_interface(sender_ip, sender_port, protocol::emit_ack("setValueAck", ok));
                if ok {
                    self.broadcast_md_in_snapshot().await;
                }
            }
            MessageType::AddRegListen => {
                let key = format!("{sender_ip}:{sender_port}");
                let mut inner = self.state.inner().await;
                inner.registered_clients.insert(
                    key,
                    RegisteredClient {
                        ip: sender_ip.to_string(),
                        port: sender_port,
                    },
                );
                drop(inner);
                self.reply_interface(
                    sender_ip,
                    sender_port,
                    protocol::emit_ack("addRegListenAck", true),
                );
                self.broadcast_md_in_snapshot().await;
            }
            MessageType::ButtonGrade | MessageType::EndGrade => {
                info!(t = %msg.t, "button/end grade event observed");
            }
            _ => {}
        }
    }

    async fn apply_set_value(&self, msg: &Message) -> bool {
        if msg.i.is_empty() {
            return false;
        }

        let mut updates = Vec::new();
        let mut any_unknown = false;
        {
            let routes = self.routes.lock().expect("routes mutex poisoned");
            for item in &msg.i {
                match (routes.get(&item.d), item.v.parse::<i32>()) {
                    (Some(_), Ok(v)) => updates.push((item.d, v)),
                    _ => any_unknown = true,
                }
            }
        }

        if updates.is_empty() {
            return false;
        }

        if let Err(e) = self.store.update_meta_values(&updates).await {
            warn!(error = %e, "setValue persistence failed");
            return false;
        }

        let route_copies: Vec<(Route, i32)> = {
            let routes = self.routes.lock().expect("routes mutex poisoned");
            updates
                .iter()
                .filter_map(|(id, v)| routes.get(id).map(|r| (r.clone(), *v)))
                .collect()
        };

        let mut inner = self.state.inner().await;
        for (md_id, value) in &updates {
            if let Some(md) = inner.metadata.iter_mut().find(|m| m.pk_id == *md_id) {
                md.current_value = *value;
            }
        }
        for (route, value) in route_copies {
            let Some(controller) = inner.controllers.get_mut(&route.control_id) else {
                continue;
            };
            let tport = route.tport as usize;
            match route.plate_type {
                3 => {
                    if let Some(slot) = controller.all_do_value.get_mut(&route.hard_addr) {
                        slot[tport] = value;
                    }
                }
                4 => {
                    if let Some(slot) = controller.all_di_value.get_mut(&route.hard_addr) {
                        slot[tport] = value;
                    }
                }
                _ => {}
            }
        }

        !any_unknown
    }

    async fn fan_out_do_refresh(&self) {
        for link in self.links.values() {
            let _ = link.set_each_do(true, 0, 0).await;
            let _ = link.set_slave_each_do(true, 0, 0).await;
        }
    }

    async fn broadcast_md_in_snapshot(&self) {
        let snapshot = {
            let inner = self.state.inner().await;
            build_md_in_snapshot(&inner.metadata)
        };
        self.send_to_nec(protocol::emit(&snapshot));
    }

    fn send_to_nec(&self, bytes: Vec<u8>) {
        let cfg = self.config();
        if let Err(e) = self
            .mux
            .send_from(self.nec_local_port, &cfg.ip.nec_ip, cfg.ip.nec_port, bytes)
        {
            warn!(error = %e, "failed to send to nec");
        }
    }

    fn reply_interface(&self, dst_ip: &str, dst_port: u16, bytes: Vec<u8>) {
        if let Err(e) = self
            .mux
            .send_from(self.interface_local_port, dst_ip, dst_port, bytes)
        {
            warn!(error = %e, "failed to reply to interface client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::fixtures::md;

    #[test]
    fn route_cache_skips_out_of_range_tport() {
        let mut meta = md(42, 3);
        meta.plate_control_id = 7;
        meta.tport = 99;
        let routes = build_routes(&[meta]);
        assert!(routes.is_empty());
    }

    #[test]
    fn route_cache_binds_type5_by_plate_id() {
        let mut meta = md(10, 5);
        meta.plate_id = 3;
        meta.tport = 1;
        let routes = build_routes(&[meta]);
        assert_eq!(routes[&10].control_id, 3);
    }

    #[test]
    fn md_in_snapshot_carries_every_metadata_row() {
        let mut a = md(1, 3);
        a.current_value = 5;
        let mut b = md(2, 4);
        b.current_value = 9;
        let msg = build_md_in_snapshot(&[a, b]);
        assert_eq!(msg.t, "md_in");
        assert_eq!(msg.i.len(), 2);
        assert_eq!(msg.i[0].v, "5");
        assert_eq!(msg.i[1].v, "9");
    }
}
