//! UDP multiplexer (§4.E): one worker thread per bound source port. Sends
//! and receives never race on the same socket because both are serviced by
//! the worker's own loop.

use std::collections::HashMap;
use std::net::UdpSocket as StdUdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::CoreError;

const POLL_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct DataReceived {
    pub local_port: u16,
    pub sender_ip: String,
    pub sender_port: u16,
    pub bytes: Vec<u8>,
}

enum WorkerMsg {
    Send { dst_ip: String, dst_port: u16, bytes: Vec<u8> },
    Stop,
}

struct Worker {
    tx: crossbeam_channel::Sender<WorkerMsg>,
    handle: std::thread::JoinHandle<()>,
}

pub struct UdpMux {
    workers: Arc<Mutex<HashMap<u16, Worker>>>,
    event_tx: mpsc::UnboundedSender<DataReceived>,
}

impl UdpMux {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DataReceived>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                workers: Arc::new(Mutex::new(HashMap::new())),
                event_tx,
            },
            event_rx,
        )
    }

    /// Binds a worker to `(ip, port)`. Fails if the port is already bound
    /// by this muxer or the OS refuses the bind.
    pub fn bind(&self, ip: &str, port: u16) -> Result<(), CoreError> {
        let mut workers = self.workers.lock().expect("udp workers mutex poisoned");
        if workers.contains_key(&port) {
            return Err(CoreError::Bind(format!("port {port} already bound")));
        }

        let socket = StdUdpSocket::bind((ip, port))
            .map_err(|e| CoreError::Bind(format!("bind {ip}:{port} failed: {e}")))?;
        socket
            .set_read_timeout(Some(POLL_TIMEOUT))
            .map_err(|e| CoreError::Bind(format!("set_read_timeout failed: {e}")))?;

        let (tx, rx) = crossbeam_channel::unbounded::<WorkerMsg>();
        let event_tx = self.event_tx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("udp-worker-{port}"))
            .spawn(move || worker_loop(socket, port, rx, event_tx))
            .expect("spawning udp worker thread");

        workers.insert(port, Worker { tx, handle });
        info!(port, ip, "udp worker bound");
        Ok(())
    }

    pub fn unbind(&self, port: u16) {
        let worker = {
            let mut workers = self.workers.lock().expect("udp workers mutex poisoned");
            workers.remove(&port)
        };
        if let Some(worker) = worker {
            let _ = worker.tx.send(WorkerMsg::Stop);
            let _ = worker.handle.join();
            info!(port, "udp worker stopped");
        }
    }

    pub fn send_from(
        &self,
        source_port: u16,
        dst_ip: &str,
        dst_port: u16,
        bytes: Vec<u8>,
    ) -> Result<(), CoreError> {
        let workers = self.workers.lock().expect("udp workers mutex poisoned");
        let worker = workers
            .get(&source_port)
            .ok_or_else(|| CoreError::Bind(format!("port {source_port} not bound")))?;
        worker
            .tx
            .send(WorkerMsg::Send {
                dst_ip: dst_ip.to_string(),
                dst_port,
                bytes,
            })
            .map_err(|_| CoreError::Bind(format!("worker on port {source_port} gone")))
    }

    /// Sends from any bound worker; used only where the source port is
    /// irrelevant to the peer (§4.E).
    pub fn send_any(&self, dst_ip: &str, dst_port: u16, bytes: Vec<u8>) -> Result<(), CoreError> {
        let workers = self.workers.lock().expect("udp workers mutex poisoned");
        let (_, worker) = workers
            .iter()
            .next()
            .ok_or_else(|| CoreError::Bind("no udp worker bound".into()))?;
        worker
            .tx
            .send(WorkerMsg::Send {
                dst_ip: dst_ip.to_string(),
                dst_port,
                bytes,
            })
            .map_err(|_| CoreError::Bind("worker gone".into()))
    }
}

fn worker_loop(
    socket: StdUdpSocket,
    local_port: u16,
    rx: crossbeam_channel::Receiver<WorkerMsg>,
    event_tx: mpsc::UnboundedSender<DataReceived>,
) {
    let mut buf = [0u8; 65536];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((n, addr)) => {
                let event = DataReceived {
                    local_port,
                    sender_ip: addr.ip().to_string(),
                    sender_port: addr.port(),
                    bytes: buf[..n].to_vec(),
                };
                if event_tx.send(event).is_err() {
                    return;
                }
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(e) => {
                error!(local_port, error = %e, "udp recv failed");
            }
        }

        loop {
            match rx.try_recv() {
                Ok(WorkerMsg::Send { dst_ip, dst_port, bytes }) => {
                    if let Err(e) = socket.send_to(&bytes, (dst_ip.as_str(), dst_port)) {
                        warn!(local_port, dst_ip, dst_port, error = %e, "udp send failed");
                    }
                }
                Ok(WorkerMsg::Stop) => return,
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn send_from_bound_port_is_received_by_peer() {
        let (mux_a, mut events_a) = UdpMux::new();
        let (mux_b, mut events_b) = UdpMux::new();

        let port_a = 47001;
        let port_b = 47002;
        mux_a.bind("127.0.0.1", port_a).unwrap();
        mux_b.bind("127.0.0.1", port_b).unwrap();

        mux_a
            .send_from(port_a, "127.0.0.1", port_b, b"hello".to_vec())
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events_b.recv())
            .await
            .expect("timed out waiting for datagram")
            .expect("channel closed");
        assert_eq!(event.bytes, b"hello");
        assert_eq!(event.local_port, port_b);

        mux_a.unbind(port_a);
        mux_b.unbind(port_b);
        let _ = events_a.try_recv();
    }

    #[test]
    fn double_bind_on_same_port_fails() {
        let (mux, _events) = UdpMux::new();
        mux.bind("127.0.0.1", 47010).unwrap();
        assert!(mux.bind("127.0.0.1", 47010).is_err());
        mux.unbind(47010);
    }

    #[test]
    fn send_from_unbound_port_fails() {
        let (mux, _events) = UdpMux::new();
        assert!(mux
            .send_from(47099, "127.0.0.1", 47098, b"x".to_vec())
            .is_err());
    }
}
