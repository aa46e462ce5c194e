//! DO batching credit state machine (§4.G, §9): one `Ready`/`InFlight`
//! pipeline per master and slave DO channel.

const WAIT_LIST_HEAD: u8 = 0x02;

#[derive(Debug, Clone)]
pub struct Pipeline {
    wait_list: Vec<u8>,
    credit: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            wait_list: vec![WAIT_LIST_HEAD],
            credit: true,
        }
    }

    /// `setEachDO(isSend=false, high, low)`: defer a pair without transmitting.
    pub fn defer(&mut self, high: i32, low: i32) {
        self.wait_list.push((high & 0xFF) as u8);
        self.wait_list.push((low & 0xFF) as u8);
    }

    /// `setEachDO(isSend=true, ...)`: transmits iff the wait list holds more
    /// than the leading byte and credit is available. Returns the payload to
    /// send, or `None` if the send is suppressed. The serial that goes with
    /// this payload is minted by the link, which shares one sequence across
    /// both the master and slave pipelines.
    pub fn try_send(&mut self) -> Option<Vec<u8>> {
        if self.wait_list.len() <= 1 || !self.credit {
            return None;
        }
        let payload = std::mem::replace(&mut self.wait_list, vec![WAIT_LIST_HEAD]);
        self.credit = false;
        Some(payload)
    }

    /// `getSetDO`/`getSetCom` received: restores the credit.
    pub fn restore_credit(&mut self) {
        self.credit = true;
    }

    /// Fresh connect (§4.G reconnect policy): credit returns to `true` and
    /// any pending wait list is dropped.
    pub fn reset(&mut self) {
        self.credit = true;
        self.wait_list = vec![WAIT_LIST_HEAD];
    }

    pub fn is_ready(&self) -> bool {
        self.credit
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Advances the shared master/slave serial sequence, wrapping from 9999
/// back to 1 (the link holds the one counter both pipelines draw from).
pub fn next_serial(serial: u16) -> u16 {
    if serial >= 9999 {
        1
    } else {
        serial + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_pairs_send_as_one_frame_then_consume_credit() {
        let mut pipeline = Pipeline::new();
        pipeline.defer(1, 2);
        pipeline.defer(3, 4);
        let payload = pipeline.try_send().expect("should send");
        assert_eq!(payload, vec![0x02, 1, 2, 3, 4]);
        assert!(!pipeline.is_ready());
    }

    #[test]
    fn no_credit_means_no_send_even_with_pending_pairs() {
        let mut pipeline = Pipeline::new();
        pipeline.defer(1, 2);
        pipeline.try_send().unwrap();
        pipeline.defer(5, 6);
        assert!(pipeline.try_send().is_none());
    }

    #[test]
    fn restoring_credit_allows_next_batch_to_send() {
        let mut pipeline = Pipeline::new();
        pipeline.defer(1, 2);
        pipeline.try_send().unwrap();
        pipeline.defer(5, 6);
        pipeline.restore_credit();
        let payload = pipeline.try_send().unwrap();
        assert_eq!(payload, vec![0x02, 5, 6]);
    }

    #[test]
    fn empty_wait_list_never_sends() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.try_send().is_none());
    }

    #[test]
    fn serial_wraps_from_9999_to_1() {
        assert_eq!(next_serial(9999), 1);
        assert_eq!(next_serial(10000), 1);
        assert_eq!(next_serial(5), 6);
    }

    #[test]
    fn reset_restores_credit_and_clears_wait_list() {
        let mut pipeline = Pipeline::new();
        pipeline.defer(1, 2);
        pipeline.try_send().unwrap();
        pipeline.defer(9, 9);
        pipeline.reset();
        assert!(pipeline.is_ready());
        let payload = {
            pipeline.defer(1, 1);
            pipeline.try_send().unwrap()
        };
        assert_eq!(payload, vec![0x02, 1, 1]);
    }
}
