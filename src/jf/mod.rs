//! JF plate TCP link (§4.G): one instance per type-2/5 controller. Owns a
//! TCP connection, runs the login handshake, and serves the credit-gated
//! DO/slave-DO batching pipelines.

pub mod credit;
pub mod frame;

use std::sync::Arc;
use std::time::Duration;

use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use credit::{next_serial, Pipeline};
use frame::{build_master_frame, build_slave_frame, drain_frames, Command};

const SET_GET_DI_SERIAL: u16 = 1123;
const SET_GET_DO_SERIAL: u16 = 1124;
const SET_VERIFY_SERIAL: u16 = 398;
const NONCE_LEN: usize = 16;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct LinkState {
    connected: bool,
    master: Pipeline,
    slave: Pipeline,
    /// One serial sequence shared by both pipelines (master and slave sends
    /// draw from the same counter, mirroring the original's single
    /// `m_msgSerial`), even though the slave frame never encodes it on the
    /// wire.
    serial: u16,
    write_half: Option<OwnedWriteHalf>,
}

impl LinkState {
    fn new() -> Self {
        Self {
            connected: false,
            master: Pipeline::new(),
            slave: Pipeline::new(),
            serial: 0,
            write_half: None,
        }
    }
}

pub struct JfPlateLink {
    pub controller_id: i64,
    ip: String,
    port: u16,
    password: String,
    state: Mutex<LinkState>,
}

impl JfPlateLink {
    pub fn new(controller_id: i64, ip: String, port: u16, password: String) -> Arc<Self> {
        Arc::new(Self {
            controller_id,
            ip,
            port,
            password,
            state: Mutex::new(LinkState::new()),
        })
    }

    /// Runs the connect/login/read loop forever, reconnecting with a capped
    /// exponential backoff on every disconnect (§4.G, §9 open question c).
    pub async fn run(self: Arc<Self>) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.connect_and_login().await {
                Ok(stream) => {
                    backoff = INITIAL_BACKOFF;
                    info!(controller_id = self.controller_id, "jf plate connected");
                    self.read_loop(stream).await;
                    warn!(controller_id = self.controller_id, "jf plate disconnected");
                }
                Err(e) => {
                    warn!(controller_id = self.controller_id, error = %e, "jf plate connect failed");
                }
            }
            {
                let mut state = self.state.lock().await;
                state.connected = false;
                state.write_half = None;
            }
            tokio::time::sleep(jittered(backoff)).await;
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
        }
    }

    async fn connect_and_login(&self) -> std::io::Result<tokio::net::tcp::OwnedReadHalf> {
        let stream = TcpStream::connect((self.ip.as_str(), self.port)).await?;
        let (read_half, write_half) = stream.into_split();
        {
            let mut state = self.state.lock().await;
            state.master.reset();
            state.slave.reset();
            state.write_half = Some(write_half);
            state.connected = true;
        }
        Ok(read_half)
    }

    async fn read_loop(&self, mut read_half: tokio::net::tcp::OwnedReadHalf) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = match read_half.read(&mut chunk).await {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    warn!(controller_id = self.controller_id, error = %e, "jf plate read failed");
                    return;
                }
            };
            buf.extend_from_slice(&chunk[..n]);
            for frame in drain_frames(&mut buf) {
                self.handle_frame(frame.cmd, frame.serial, &frame.payload)
                    .await;
            }
        }
    }

    async fn handle_frame(&self, cmd: Command, _serial: u16, payload: &[u8]) {
        match cmd {
            Command::GetRandomCode => {
                if payload.len() != NONCE_LEN {
                    warn!(
                        controller_id = self.controller_id,
                        len = payload.len(),
                        "jf plate random code has wrong length, aborting login"
                    );
                    return;
                }
                let digest = login_digest(payload, &self.password);
                let frame = build_master_frame(Command::SetVerifyPassword, SET_VERIFY_SERIAL, &digest);
                self.write_frame(frame).await;
            }
            Command::GetVerifyReply => {
                let di = build_master_frame(Command::SetGetDI, SET_GET_DI_SERIAL, &[0x00]);
                let do_ = build_master_frame(Command::SetGetDO, SET_GET_DO_SERIAL, &[0x00]);
                self.write_frame(di).await;
                self.write_frame(do_).await;
            }
            Command::GetSetDO => {
                self.state.lock().await.master.restore_credit();
            }
            Command::GetSetCom => {
                self.state.lock().await.slave.restore_credit();
            }
            other => {
                debug!(controller_id = self.controller_id, ?other, "jf plate frame ignored");
            }
        }
    }

    async fn write_frame(&self, frame: Vec<u8>) -> bool {
        let mut state = self.state.lock().await;
        let Some(write_half) = state.write_half.as_mut() else {
            return false;
        };
        if write_half.write_all(&frame).await.is_err() {
            state.connected = false;
            return false;
        }
        true
    }

    /// `setEachDO` (§4.G): `is_send=false` defers a pair; `is_send=true`
    /// attempts to flush the wait list as one `setDO` frame.
    pub async fn set_each_do(&self, is_send: bool, high: i32, low: i32) -> bool {
        if !is_send {
            self.state.lock().await.master.defer(high, low);
            return false;
        }
        let sent = {
            let mut state = self.state.lock().await;
            if !state.connected {
                return false;
            }
            match state.master.try_send() {
                Some(payload) => {
                    state.serial = next_serial(state.serial);
                    Some((state.serial, payload))
                }
                None => None,
            }
        };
        let Some((serial, payload)) = sent else {
            return false;
        };
        self.write_frame(build_master_frame(Command::SetDO, serial, &payload))
            .await
    }

    /// `setSlaveEachDO`, mirroring [`Self::set_each_do`] over the slave
    /// pipeline. The slave frame never encodes a serial, but the send still
    /// draws one from the shared sequence to keep master and slave on one
    /// monotonic count.
    pub async fn set_slave_each_do(&self, is_send: bool, high: i32, low: i32) -> bool {
        if !is_send {
            self.state.lock().await.slave.defer(high, low);
            return false;
        }
        let payload = {
            let mut state = self.state.lock().await;
            if !state.connected {
                return false;
            }
            match state.slave.try_send() {
                Some(payload) => {
                    state.serial = next_serial(state.serial);
                    Some(payload)
                }
                None => None,
            }
        };
        let Some(payload) = payload else {
            return false;
        };
        self.write_frame(build_slave_frame(Command::SetCom, &payload))
            .await
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }
}

/// Adds up to 20% jitter so many controllers reconnecting at once don't
/// all retry in lockstep.
fn jittered(backoff: Duration) -> Duration {
    let jitter_ratio: f64 = rand::random::<f64>() * 0.2;
    backoff.mul_f64(1.0 + jitter_ratio)
}

fn pad16(password: &str) -> [u8; NONCE_LEN] {
    let mut key = [0u8; NONCE_LEN];
    let bytes = password.as_bytes();
    let n = bytes.len().min(NONCE_LEN);
    key[..n].copy_from_slice(&bytes[..n]);
    key
}

fn login_digest(nonce: &[u8], password: &str) -> [u8; NONCE_LEN] {
    let key = pad16(password);
    let mut hasher = Md5::new();
    hasher.update(nonce);
    hasher.update(key);
    let digest = hasher.finalize();
    let mut out = [0u8; NONCE_LEN];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad16_truncates_long_passwords() {
        let padded = pad16("0123456789ABCDEFGHIJ");
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded, b"0123456789ABCDEF");
    }

    #[test]
    fn pad16_zero_fills_short_passwords() {
        let padded = pad16("abc");
        assert_eq!(&padded[..3], b"abc");
        assert!(padded[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn login_digest_matches_reference_md5() {
        let nonce = b"0123456789ABCDEF";
        let password = "secret";
        let digest = login_digest(nonce, password);

        let mut expected_input = nonce.to_vec();
        expected_input.extend_from_slice(&pad16(password));
        let mut hasher = Md5::new();
        hasher.update(&expected_input);
        let expected = hasher.finalize();

        assert_eq!(&digest[..], &expected[..]);
    }

    #[test]
    fn master_and_slave_draw_from_one_shared_serial() {
        let mut state = LinkState::new();

        state.master.defer(1, 2);
        let payload = state.master.try_send().expect("master should send");
        state.serial = next_serial(state.serial);
        assert_eq!(state.serial, 1);
        assert_eq!(payload, vec![0x02, 1, 2]);

        state.slave.defer(3, 4);
        let payload = state.slave.try_send().expect("slave should send");
        state.serial = next_serial(state.serial);
        assert_eq!(state.serial, 2);
        assert_eq!(payload, vec![0x02, 3, 4]);
    }

    #[tokio::test]
    async fn set_each_do_defers_without_connection() {
        let link = JfPlateLink::new(1, "127.0.0.1".into(), 0, "pw".into());
        let sent = link.set_each_do(false, 1, 2).await;
        assert!(!sent);
        // no connection yet, so a flush attempt cannot transmit regardless of credit
        let sent = link.set_each_do(true, 0, 0).await;
        assert!(!sent);
    }
}
