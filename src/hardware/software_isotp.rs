//! Software ISOTP layer
//!
//! This is useful for adapters which do not natively support ISO-TP, but can send and receive
//! raw CAN frames. [IsoTpQuery] queries any number of ECUs in parallel over a [BusTransport],
//! handling segmentation and reassembly of both requests and responses.
use std::{
    cmp::{max, min},
    time::{Duration, Instant},
};

use log::{debug, error, warn};

use crate::{
    DiagError, DiagResult,
    channel::{
        BusTransport, CanFrame, ChannelError, EcuTarget, IsoTPSettings, QueryEngine, QueryResults,
    },
    clock::Clock,
    helpers::st_min_to_duration,
    uds::{
        DiagnosticExchange, NEGATIVE_RESPONSE_SID, UdsNrc, nrc_description,
        tester_present_exchange,
    },
};

const PAD_BYTE: u8 = 0xCC;
const CAN_FRAME_SIZE: usize = 8;
const MAX_ISOTP_PAYLOAD: usize = 0x0FFF;

/// Returns the address an ECU responds on, given the address it receives requests on.
///
/// 11bit addresses respond on `tx_address + rx_offset` (EG: 0x7D0 -> 0x7D8). 29bit
/// (Normal fixed) addresses respond with the target and source bytes swapped
/// (EG: 0x18DA30F1 -> 0x18DAF130).
pub fn rx_address_for(tx_address: u32, rx_offset: u32) -> u32 {
    if tx_address > 0x7FF {
        (tx_address & 0xFFFF_0000) | ((tx_address << 8) & 0xFF00) | ((tx_address >> 8) & 0xFF)
    } else {
        tx_address.wrapping_add(rx_offset)
    }
}

#[derive(Debug)]
enum IsoTpRxAction {
    None,
    /// Consecutive frame accepted, more to come
    Progress,
    Completed(Vec<u8>),
    SendFC,
    FlowControl,
    Invalid(DiagError),
}

struct IsoTpRxMemory {
    receiving: bool,
    bs: u8,
    next_sn: u8,
    frames_received: usize,
    data: Vec<u8>,
    max_size: usize,
}

impl IsoTpRxMemory {
    fn new(bs: u8) -> Self {
        Self {
            receiving: false,
            bs,
            next_sn: 1,
            frames_received: 0,
            data: vec![],
            max_size: 0,
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.bs);
    }

    fn on_frame(&mut self, data: &[u8]) -> IsoTpRxAction {
        let Some(pci) = data.first() else {
            return IsoTpRxAction::None;
        };
        match pci & 0xF0 {
            0x00 => self.add_single_frame(data),
            0x10 => self.add_start_frame(data),
            0x20 => self.add_continuous_frame(data),
            0x30 => IsoTpRxAction::FlowControl,
            _ => {
                debug!("Ignoring frame with unknown PCI {data:02X?}");
                IsoTpRxAction::None
            }
        }
    }

    fn add_single_frame(&mut self, s: &[u8]) -> IsoTpRxAction {
        self.reset();
        // A length nibble of 0 means the length is in the next byte (CAN-FD)
        let (len, start) = match s[0] & 0x0F {
            0 => (s.get(1).copied().unwrap_or(0) as usize, 2),
            l => (l as usize, 1),
        };
        match s.get(start..start + len) {
            Some(payload) if len > 0 => IsoTpRxAction::Completed(payload.to_vec()),
            _ => IsoTpRxAction::Invalid(DiagError::InvalidResponseLength),
        }
    }

    fn add_start_frame(&mut self, s: &[u8]) -> IsoTpRxAction {
        self.reset();
        if s.len() < 3 {
            return IsoTpRxAction::Invalid(DiagError::InvalidResponseLength);
        }
        self.max_size = (((s[0] & 0x0F) as usize) << 8) | s[1] as usize;
        if self.max_size == 0 {
            return IsoTpRxAction::Invalid(DiagError::InvalidResponseLength);
        }
        let end = min(s.len(), 2 + self.max_size);
        self.data.extend_from_slice(&s[2..end]);
        self.receiving = true;
        IsoTpRxAction::SendFC
    }

    fn add_continuous_frame(&mut self, s: &[u8]) -> IsoTpRxAction {
        if !self.receiving {
            debug!("Consecutive frame without a first frame {s:02X?}");
            return IsoTpRxAction::None;
        }
        let sn = s[0] & 0x0F;
        if sn != self.next_sn {
            error!("ISO-TP sequence error. Expected {}, got {sn}", self.next_sn);
            self.reset();
            return IsoTpRxAction::Invalid(DiagError::WrongMessage);
        }
        self.next_sn = (self.next_sn + 1) & 0x0F;
        let max_copy = min(self.max_size - self.data.len(), s.len() - 1);
        self.data.extend_from_slice(&s[1..1 + max_copy]);
        self.frames_received += 1;
        if self.data.len() == self.max_size {
            let data = std::mem::take(&mut self.data);
            self.reset();
            IsoTpRxAction::Completed(data)
        } else if self.bs != 0 && self.frames_received == self.bs as usize {
            self.frames_received = 0;
            IsoTpRxAction::SendFC
        } else {
            IsoTpRxAction::Progress
        }
    }
}

struct IsoTpTxMemory {
    data: Vec<u8>,
    current_pos: usize,
    current_pci: u8,
    transmitting: bool,
    awaiting_fc: bool,
    last_tx_time: Instant,
    frames_txed: usize,
    // Set by receiving ECU
    fc_bs: u8,
    // Set by receiving ECU
    fc_stmin: Duration,
}

impl IsoTpTxMemory {
    fn new(data: &[u8], now: Instant) -> Self {
        Self {
            data: data.to_vec(),
            current_pos: 0,
            current_pci: 0x21,
            transmitting: false,
            awaiting_fc: false,
            last_tx_time: now,
            frames_txed: 0,
            fc_bs: 0,
            fc_stmin: Duration::ZERO,
        }
    }

    /// Single frame if the payload fits, otherwise the first frame of a segmented transfer.
    /// `frame_capacity` is the number of bytes available after any extended address byte
    fn get_start_frame(&mut self, frame_capacity: usize) -> Vec<u8> {
        let len = self.data.len();
        if len < frame_capacity {
            let mut tx = Vec::with_capacity(len + 1);
            tx.push(len as u8);
            tx.extend_from_slice(&self.data);
            self.current_pos = len;
            tx
        } else {
            let first = frame_capacity - 2;
            let mut tx = Vec::with_capacity(frame_capacity);
            tx.push(0x10 | ((len >> 8) & 0x0F) as u8);
            tx.push((len & 0xFF) as u8);
            tx.extend_from_slice(&self.data[..first]);
            self.current_pos = first;
            self.current_pci = 0x21;
            self.transmitting = true;
            self.awaiting_fc = true;
            self.frames_txed = 0;
            tx
        }
    }

    /// Returns true if the flow control was one we were waiting for
    fn on_flow_control(&mut self, data: &[u8], now: Instant) -> DiagResult<bool> {
        if !self.awaiting_fc {
            debug!("Unexpected flow control {data:02X?}");
            return Ok(false);
        }
        if data.len() < 3 {
            return Err(DiagError::InvalidResponseLength);
        }
        match data[0] & 0x0F {
            0x00 => {
                self.fc_bs = data[1];
                self.fc_stmin = st_min_to_duration(data[2]);
                self.awaiting_fc = false;
                self.frames_txed = 0;
                self.last_tx_time = now;
                Ok(true)
            }
            0x01 => {
                debug!("ECU requested we wait before sending more frames");
                Ok(true)
            }
            0x02 => Err(ChannelError::BufferFull.into()),
            _ => Err(DiagError::WrongMessage),
        }
    }

    /// Next consecutive frame, if one may be sent right now
    fn on_update(&mut self, frame_capacity: usize, now: Instant) -> Option<Vec<u8>> {
        if !self.transmitting || self.awaiting_fc {
            return None;
        }
        if now.duration_since(self.last_tx_time) < self.fc_stmin {
            return None;
        }
        let max_data = min(frame_capacity - 1, self.data.len() - self.current_pos);
        let mut tx = Vec::with_capacity(max_data + 1);
        tx.push(self.current_pci);
        tx.extend_from_slice(&self.data[self.current_pos..self.current_pos + max_data]);
        self.current_pos += max_data;
        self.frames_txed += 1;
        self.last_tx_time = now;
        self.current_pci = if self.current_pci == 0x2F {
            0x20
        } else {
            self.current_pci + 1
        };

        if self.current_pos >= self.data.len() {
            debug!("Tx done!");
            self.transmitting = false;
        } else if self.fc_bs != 0 && self.frames_txed == self.fc_bs as usize {
            debug!("Awaiting FC");
            self.awaiting_fc = true;
            self.frames_txed = 0;
        }
        Some(tx)
    }
}

/// Query state of a single target
struct TargetQuery {
    target: EcuTarget,
    rx_address: u32,
    step: usize,
    deadline: Instant,
    // No wait may run past this, however often the ECU asks for more time
    max_deadline: Instant,
    tx: IsoTpTxMemory,
    rx: IsoTpRxMemory,
    result: Option<DiagResult<Vec<u8>>>,
    timed_out: bool,
}

impl TargetQuery {
    fn is_done(&self) -> bool {
        self.result.is_some() || self.timed_out
    }

    /// Restarts the wait for the ECU, never past [TargetQuery::max_deadline]
    fn wait_for(&mut self, now: Instant, wait: Duration) {
        self.deadline = now
            .checked_add(wait)
            .map_or(self.max_deadline, |d| min(d, self.max_deadline));
    }
}

fn strip_sub_address<'a>(target: &EcuTarget, data: &'a [u8]) -> Option<&'a [u8]> {
    match target.sub_address {
        Some(sub) => match data.split_first() {
            Some((&b, rest)) if b == sub => Some(rest),
            _ => None,
        },
        None => Some(data),
    }
}

/// ISO-TP query engine running in software over a [BusTransport]
///
/// Every target is queried in parallel. A target's wait is restarted whenever its ISO-TP transfer
/// moves forward, and extended by [IsoTPSettings::response_pending_timeout_ms] whenever it
/// responds with 'response pending'. Frames which do not move the transfer forward are ignored.
/// No target is waited on for longer than the query timeout or
/// [IsoTPSettings::total_timeout_ms], whichever is longer.
#[derive(Debug, Clone)]
pub struct IsoTpQuery<C: Clock> {
    settings: IsoTPSettings,
    clock: C,
}

impl<C: Clock> IsoTpQuery<C> {
    /// Creates a new query engine
    pub fn new(settings: IsoTPSettings, clock: C) -> Self {
        Self { settings, clock }
    }

    /// Returns the ISO-TP settings used by the engine
    pub fn settings(&self) -> &IsoTPSettings {
        &self.settings
    }

    /// Sends a tester present (With the response suppressed) to each target, keeping them in their
    /// current diagnostic session. Needs to be called periodically for as long as
    /// a disabled ECU should stay silent.
    pub fn send_tester_present(
        &mut self,
        transport: &mut dyn BusTransport,
        bus: u8,
        targets: &[EcuTarget],
    ) -> DiagResult<()> {
        self.query(
            transport,
            bus,
            targets,
            &[tester_present_exchange(true)],
            Duration::ZERO,
        )
        .map(|_| ())
    }

    fn frame_capacity(target: &EcuTarget) -> usize {
        CAN_FRAME_SIZE - target.sub_address.map_or(0, |_| 1)
    }

    fn build_frame(&self, target: &EcuTarget, bus: u8, pci_data: &[u8]) -> CanFrame {
        let mut data = Vec::with_capacity(CAN_FRAME_SIZE);
        if let Some(sub) = target.sub_address {
            data.push(sub);
        }
        data.extend_from_slice(pci_data);
        if self.settings.pad_frame && data.len() < CAN_FRAME_SIZE {
            data.resize(CAN_FRAME_SIZE, PAD_BYTE);
        }
        CanFrame::new(target.address, bus, &data)
    }

    fn flow_control(&self) -> Vec<u8> {
        vec![0x30, self.settings.block_size, self.settings.st_min]
    }

    /// Feeds a received frame (Without its extended address) to a target.
    /// Returns the frames which need sending back to the target
    fn on_frame(
        &self,
        session: &mut TargetQuery,
        data: &[u8],
        exchanges: &[DiagnosticExchange],
        timeout: Duration,
        now: Instant,
    ) -> Vec<Vec<u8>> {
        let reply = match session.rx.on_frame(data) {
            IsoTpRxAction::None => return vec![],
            IsoTpRxAction::Progress => vec![],
            IsoTpRxAction::SendFC => vec![self.flow_control()],
            IsoTpRxAction::FlowControl => match session.tx.on_flow_control(data, now) {
                Ok(true) => vec![],
                Ok(false) => return vec![],
                Err(e) => {
                    error!("Flow control error from ECU {}: {e}", session.target);
                    session.result = Some(Err(e));
                    return vec![];
                }
            },
            IsoTpRxAction::Invalid(e) => {
                error!(
                    "Invalid ISO-TP frame from ECU {}: {data:02X?}",
                    session.target
                );
                session.result = Some(Err(e));
                return vec![];
            }
            IsoTpRxAction::Completed(response) => {
                return self.on_response(session, response, exchanges, timeout, now);
            }
        };
        session.wait_for(now, timeout);
        reply
    }

    fn on_response(
        &self,
        session: &mut TargetQuery,
        response: Vec<u8>,
        exchanges: &[DiagnosticExchange],
        timeout: Duration,
        now: Instant,
    ) -> Vec<Vec<u8>> {
        debug!("ECU {} Response: {response:02X?}", session.target);
        if response.first() == Some(&NEGATIVE_RESPONSE_SID) {
            let code = response.get(2).copied().unwrap_or(0);
            if UdsNrc::from(code).is_response_pending() {
                debug!("ECU {} is busy, awaiting response", session.target);
                let pending =
                    Duration::from_millis(self.settings.response_pending_timeout_ms as u64);
                session.wait_for(now, pending);
            } else {
                warn!("ECU {} Negative response 0x{code:02X}", session.target);
                session.result = Some(Err(DiagError::ECUError {
                    code,
                    def: Some(nrc_description(code)),
                }));
            }
            return vec![];
        }

        if !exchanges[session.step].accepts(&response) {
            error!(
                "iso-tp query bad response from ECU {}: {response:02X?}",
                session.target
            );
            session.result = Some(Err(DiagError::WrongMessage));
            return vec![];
        }

        session.step += 1;
        match exchanges.get(session.step) {
            Some(next) => {
                debug!(
                    "Sending req to ECU {}: {:02X?}",
                    session.target, next.request_payload
                );
                session.wait_for(now, timeout);
                session.tx = IsoTpTxMemory::new(&next.request_payload, now);
                vec![session.tx.get_start_frame(Self::frame_capacity(&session.target))]
            }
            None => {
                session.result = Some(Ok(response));
                vec![]
            }
        }
    }
}

impl<C: Clock> QueryEngine for IsoTpQuery<C> {
    fn query(
        &mut self,
        transport: &mut dyn BusTransport,
        bus: u8,
        targets: &[EcuTarget],
        exchanges: &[DiagnosticExchange],
        timeout: Duration,
    ) -> DiagResult<QueryResults> {
        let Some(first) = exchanges.first() else {
            return Err(DiagError::ParameterInvalid);
        };
        let sendable = 1..=MAX_ISOTP_PAYLOAD;
        if exchanges
            .iter()
            .any(|e| !sendable.contains(&e.request_payload.len()))
        {
            return Err(DiagError::ParameterInvalid);
        }

        let start = self.clock.now();
        let total = Duration::from_millis(self.settings.total_timeout_ms as u64);
        let Some(max_deadline) = start.checked_add(max(timeout, total)) else {
            error!("Query timeout of {timeout:?} is out of range");
            return Err(DiagError::ParameterInvalid);
        };
        let mut sessions = Vec::with_capacity(targets.len());
        for target in targets {
            let mut tx = IsoTpTxMemory::new(&first.request_payload, start);
            let pci_data = tx.get_start_frame(Self::frame_capacity(target));
            debug!(
                "Sending req to ECU {target}: {:02X?}",
                first.request_payload
            );
            transport.send(&[self.build_frame(target, bus, &pci_data)])?;
            sessions.push(TargetQuery {
                target: *target,
                rx_address: rx_address_for(target.address, self.settings.rx_offset),
                step: 0,
                deadline: start + timeout,
                max_deadline,
                tx,
                rx: IsoTpRxMemory::new(self.settings.block_size),
                result: None,
                timed_out: false,
            });
        }

        if timeout.is_zero() {
            debug!("No need to poll ECU response");
            return Ok(QueryResults::new());
        }

        while sessions.iter().any(|s| !s.is_done()) {
            let frames = transport.receive_batch()?;
            let now = self.clock.now();
            for frame in frames.iter().filter(|f| f.get_bus() == bus) {
                for session in sessions
                    .iter_mut()
                    .filter(|s| !s.is_done() && s.rx_address == frame.get_address())
                {
                    let Some(data) = strip_sub_address(&session.target, frame.get_data()) else {
                        continue;
                    };
                    for pci_data in self.on_frame(session, data, exchanges, timeout, now) {
                        transport.send(&[self.build_frame(&session.target, bus, &pci_data)])?;
                    }
                }
            }

            for session in sessions.iter_mut().filter(|s| !s.is_done()) {
                let capacity = Self::frame_capacity(&session.target);
                while let Some(pci_data) = session.tx.on_update(capacity, now) {
                    transport.send(&[self.build_frame(&session.target, bus, &pci_data)])?;
                }
                if now >= session.deadline {
                    debug!("No response from ECU {} before timeout", session.target);
                    session.timed_out = true;
                }
            }
        }

        Ok(sessions
            .into_iter()
            .filter_map(|s| s.result.map(|r| (s.target, r)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_addresses() {
        assert_eq!(rx_address_for(0x7D0, 0x8), 0x7D8);
        assert_eq!(rx_address_for(0x7E0, 0x8), 0x7E8);
        assert_eq!(rx_address_for(0x7A1, 0x10), 0x7B1);
        assert_eq!(rx_address_for(0x18DA30F1, 0x8), 0x18DAF130);
        // Offsets past the end of the address space wrap
        assert_eq!(rx_address_for(0x7D0, u32::MAX), 0x7CF);
    }

    #[test]
    fn short_payload_is_single_frame() {
        let mut tx = IsoTpTxMemory::new(&[0x10, 0x03], Instant::now());
        assert_eq!(tx.get_start_frame(8), vec![0x02, 0x10, 0x03]);
        assert!(!tx.transmitting);
        assert_eq!(tx.on_update(8, Instant::now()), None);
    }

    #[test]
    fn seven_bytes_needs_segmenting_with_sub_address() {
        let payload = [0x2E, 0xF1, 0x90, 0x01, 0x02, 0x03, 0x04];
        let mut tx = IsoTpTxMemory::new(&payload, Instant::now());
        assert_eq!(tx.get_start_frame(8)[0], 0x07);

        let mut tx = IsoTpTxMemory::new(&payload, Instant::now());
        assert_eq!(
            tx.get_start_frame(7),
            vec![0x10, 0x07, 0x2E, 0xF1, 0x90, 0x01, 0x02]
        );
        assert!(tx.awaiting_fc);
    }

    #[test]
    fn segmented_tx_honours_block_size() {
        let payload: Vec<u8> = (0..30).collect();
        let now = Instant::now();
        let mut tx = IsoTpTxMemory::new(&payload, now);
        let ff = tx.get_start_frame(8);
        assert_eq!(&ff[..2], &[0x10, 30]);
        // Nothing may go out before flow control
        assert_eq!(tx.on_update(8, now), None);

        assert!(tx.on_flow_control(&[0x30, 0x02, 0x00], now).unwrap());
        assert_eq!(tx.on_update(8, now).unwrap()[0], 0x21);
        assert_eq!(tx.on_update(8, now).unwrap()[0], 0x22);
        assert_eq!(tx.on_update(8, now), None);
        assert!(tx.awaiting_fc);

        tx.on_flow_control(&[0x30, 0x00, 0x00], now).unwrap();
        let cf3 = tx.on_update(8, now).unwrap();
        assert_eq!(cf3[0], 0x23);
        let cf4 = tx.on_update(8, now).unwrap();
        assert_eq!(cf4, vec![0x24, 27, 28, 29]);
        assert_eq!(tx.on_update(8, now), None);
    }

    #[test]
    fn segmented_tx_honours_st_min() {
        let payload: Vec<u8> = (0..20).collect();
        let now = Instant::now();
        let mut tx = IsoTpTxMemory::new(&payload, now);
        tx.get_start_frame(8);
        tx.on_flow_control(&[0x30, 0x00, 10], now).unwrap();
        assert_eq!(tx.on_update(8, now), None);
        let later = now + Duration::from_millis(10);
        assert!(tx.on_update(8, later).is_some());
        assert_eq!(tx.on_update(8, later), None);
    }

    #[test]
    fn unsolicited_flow_control_is_ignored() {
        let now = Instant::now();
        let mut tx = IsoTpTxMemory::new(&[0x10, 0x03], now);
        tx.get_start_frame(8);
        assert!(!tx.on_flow_control(&[0x30, 0x00, 0x00], now).unwrap());
        assert!(!tx.on_flow_control(&[0x32], now).unwrap());
    }

    #[test]
    fn flow_control_overflow_aborts() {
        let payload: Vec<u8> = (0..20).collect();
        let mut tx = IsoTpTxMemory::new(&payload, Instant::now());
        tx.get_start_frame(8);
        assert!(matches!(
            tx.on_flow_control(&[0x32, 0x00, 0x00], Instant::now()),
            Err(DiagError::ChannelError(ChannelError::BufferFull))
        ));
    }

    #[test]
    fn rx_reassembles_multi_frame() {
        let mut rx = IsoTpRxMemory::new(8);
        assert!(matches!(
            rx.on_frame(&[0x10, 0x0A, 1, 2, 3, 4, 5, 6]),
            IsoTpRxAction::SendFC
        ));
        match rx.on_frame(&[0x21, 7, 8, 9, 10, 0xCC, 0xCC, 0xCC]) {
            IsoTpRxAction::Completed(data) => assert_eq!(data, (1..=10).collect::<Vec<u8>>()),
            other => panic!("Unexpected rx action {other:?}"),
        }
    }

    #[test]
    fn rx_reports_accepted_consecutive_frames() {
        let mut rx = IsoTpRxMemory::new(0);
        assert!(matches!(
            rx.on_frame(&[0x21, 0, 0, 0, 0, 0, 0, 0]),
            IsoTpRxAction::None
        ));
        rx.on_frame(&[0x10, 0x14, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            rx.on_frame(&[0x21, 0, 0, 0, 0, 0, 0, 0]),
            IsoTpRxAction::Progress
        ));
        assert!(matches!(rx.on_frame(&[0xF0, 0, 0]), IsoTpRxAction::None));
    }

    #[test]
    fn rx_block_size_requests_flow_control() {
        let mut rx = IsoTpRxMemory::new(1);
        rx.on_frame(&[0x10, 0x14, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            rx.on_frame(&[0x21, 0, 0, 0, 0, 0, 0, 0]),
            IsoTpRxAction::SendFC
        ));
        assert!(matches!(
            rx.on_frame(&[0x22, 0, 0, 0, 0, 0, 0, 0]),
            IsoTpRxAction::Completed(_)
        ));
    }

    #[test]
    fn rx_rejects_bad_sequence() {
        let mut rx = IsoTpRxMemory::new(0);
        rx.on_frame(&[0x10, 0x14, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            rx.on_frame(&[0x22, 0, 0, 0, 0, 0, 0, 0]),
            IsoTpRxAction::Invalid(DiagError::WrongMessage)
        ));
        assert!(!rx.receiving);
    }

    #[test]
    fn rx_single_frame_length_checks() {
        let mut rx = IsoTpRxMemory::new(0);
        match rx.on_frame(&[0x02, 0x50, 0x03, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC]) {
            IsoTpRxAction::Completed(data) => assert_eq!(data, vec![0x50, 0x03]),
            other => panic!("Unexpected rx action {other:?}"),
        }
        assert!(matches!(
            rx.on_frame(&[0x07, 0x50, 0x03]),
            IsoTpRxAction::Invalid(DiagError::InvalidResponseLength)
        ));
        assert!(matches!(
            rx.on_frame(&[0x30, 0, 0]),
            IsoTpRxAction::FlowControl
        ));
    }

    #[test]
    fn wait_never_passes_max_deadline() {
        let now = Instant::now();
        let max_deadline = now + Duration::from_secs(1);
        let mut session = TargetQuery {
            target: EcuTarget::new(0x7D0),
            rx_address: 0x7D8,
            step: 0,
            deadline: now,
            max_deadline,
            tx: IsoTpTxMemory::new(&[0x10, 0x03], now),
            rx: IsoTpRxMemory::new(8),
            result: None,
            timed_out: false,
        };
        session.wait_for(now, Duration::from_millis(100));
        assert_eq!(session.deadline, now + Duration::from_millis(100));
        session.wait_for(now, Duration::from_secs(4));
        assert_eq!(session.deadline, max_deadline);
        session.wait_for(now, Duration::MAX);
        assert_eq!(session.deadline, max_deadline);
    }

    #[test]
    fn sub_address_filtering() {
        let target = EcuTarget::with_sub_address(0x7D0, 0x10);
        assert_eq!(
            strip_sub_address(&target, &[0x10, 0x02, 0x50, 0x03]),
            Some(&[0x02, 0x50, 0x03][..])
        );
        assert_eq!(strip_sub_address(&target, &[0x20, 0x02, 0x50, 0x03]), None);
        assert_eq!(
            strip_sub_address(&EcuTarget::new(0x7D0), &[0x02, 0x50, 0x03]),
            Some(&[0x02, 0x50, 0x03][..])
        );
    }
}
