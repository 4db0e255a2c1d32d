//! Simulation hardware for testing the disable workflow without a vehicle.
//!
//! * [SimClock] - Simulated time, advanced by the bus and by [Clock::sleep]
//! * [SimEcu] - An ECU which answers UDS requests and transmits periodic frames until it
//!   is told to stop
//! * [SimulatedBus] - A [BusTransport] connecting the tester to any number of [SimEcu]s

use std::{
    cell::Cell,
    cmp::min,
    collections::HashMap,
    rc::Rc,
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    channel::{BusTransport, CanFrame, ChannelError, ChannelResult},
    clock::Clock,
    hardware::software_isotp::rx_address_for,
    uds::{CommunicationControlRequest, POSITIVE_RESPONSE_OFFSET, UdsCommand},
};

const RESPONSE_DELAY: Duration = Duration::from_millis(5);
const PAD_BYTE: u8 = 0xCC;

/// Simulated monotonic clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct SimClock {
    origin: Instant,
    elapsed: Rc<Cell<Duration>>,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    /// Creates a new clock, starting at 0
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    /// Moves time forward
    pub fn advance(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
    }

    /// Time passed since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration)
    }
}

#[derive(Debug, Clone)]
struct PeriodicFrame {
    address: u32,
    period: Duration,
    data: Vec<u8>,
    next_due: Option<Instant>,
}

#[derive(Debug)]
struct SegmentedRx {
    len: usize,
    data: Vec<u8>,
    next_sn: u8,
}

#[derive(Debug)]
struct SegmentedTx {
    data: Vec<u8>,
    pos: usize,
    pci: u8,
}

/// A simulated ECU.
///
/// Only single frame and segmented ISO-TP requests on its request address are processed.
/// Responses are sent on the matching response address (EG: 0x7D0 -> 0x7D8).
#[derive(Debug)]
pub struct SimEcu {
    bus: u8,
    request_address: u32,
    response_address: u32,
    sub_address: Option<u8>,
    responses: HashMap<Vec<u8>, Vec<u8>>,
    periodic: Vec<PeriodicFrame>,
    ignore_requests: usize,
    silence_delay: Duration,
    honours_comm_control: bool,
    silenced_at: Option<Instant>,
    outbox: Vec<(Instant, CanFrame)>,
    rx: Option<SegmentedRx>,
    tx: Option<SegmentedTx>,
    requests: Vec<Vec<u8>>,
}

impl SimEcu {
    /// Creates an ECU which answers nothing
    pub fn new(bus: u8, request_address: u32) -> Self {
        Self {
            bus,
            request_address,
            response_address: rx_address_for(request_address, 0x08),
            sub_address: None,
            responses: HashMap::new(),
            periodic: Vec::new(),
            ignore_requests: 0,
            silence_delay: Duration::ZERO,
            honours_comm_control: true,
            silenced_at: None,
            outbox: Vec::new(),
            rx: None,
            tx: None,
            requests: Vec::new(),
        }
    }

    /// Creates an ECU supporting the default and extended diagnostic sessions, and tester present
    pub fn uds(bus: u8, request_address: u32) -> Self {
        Self::new(bus, request_address)
            .with_response(&[0x10, 0x03], &[0x50, 0x03])
            .with_response(&[0x10, 0x01], &[0x50, 0x01])
            .with_response(&[0x3E, 0x00], &[0x7E, 0x00])
    }

    /// Only accept requests (And respond) with this extended address byte
    pub fn with_sub_address(mut self, sub_address: u8) -> Self {
        self.sub_address = Some(sub_address);
        self
    }

    /// Respond to `request` with `response`
    pub fn with_response(mut self, request: &[u8], response: &[u8]) -> Self {
        self.responses.insert(request.to_vec(), response.to_vec());
        self
    }

    /// Transmit a frame on `address` every `period`, until communication is disabled
    pub fn with_periodic_frame(mut self, address: u32, period: Duration, data: &[u8]) -> Self {
        self.periodic.push(PeriodicFrame {
            address,
            period,
            data: data.to_vec(),
            next_due: None,
        });
        self
    }

    /// Silently drop the first `count` requests
    pub fn ignoring_first_requests(mut self, count: usize) -> Self {
        self.ignore_requests = count;
        self
    }

    /// Keep transmitting for `delay` after communication control disables Tx
    pub fn with_silence_delay(mut self, delay: Duration) -> Self {
        self.silence_delay = delay;
        self
    }

    /// Accept communication control requests, but keep transmitting anyway
    pub fn ignoring_communication_control(mut self) -> Self {
        self.honours_comm_control = false;
        self
    }

    /// Every complete request the ECU received, including ignored ones
    pub fn requests(&self) -> &[Vec<u8>] {
        &self.requests
    }

    /// Returns true if the ECU has stopped its periodic transmissions at `now`
    pub fn is_silenced(&self, now: Instant) -> bool {
        self.silenced_at.is_some_and(|t| now >= t)
    }

    fn start(&mut self, now: Instant) {
        for p in self.periodic.iter_mut() {
            p.next_due = Some(now);
        }
    }

    fn frame_capacity(&self) -> usize {
        8 - self.sub_address.map_or(0, |_| 1)
    }

    fn queue(&mut self, at: Instant, pci_data: &[u8]) {
        let mut data = Vec::with_capacity(8);
        if let Some(sub) = self.sub_address {
            data.push(sub);
        }
        data.extend_from_slice(pci_data);
        data.resize(8, PAD_BYTE);
        self.outbox
            .push((at, CanFrame::new(self.response_address, self.bus, &data)));
    }

    fn on_frame(&mut self, frame: &CanFrame, now: Instant) {
        if frame.get_bus() != self.bus || frame.get_address() != self.request_address {
            return;
        }
        let data = match self.sub_address {
            Some(sub) => match frame.get_data().split_first() {
                Some((&b, rest)) if b == sub => rest,
                _ => return,
            },
            None => frame.get_data(),
        };
        let Some(&pci) = data.first() else {
            return;
        };
        match pci & 0xF0 {
            0x00 => {
                let len = (pci & 0x0F) as usize;
                if let Some(payload) = data.get(1..1 + len) {
                    self.on_request(payload.to_vec(), now);
                }
            }
            0x10 if data.len() > 2 => {
                let len = (((pci & 0x0F) as usize) << 8) | data[1] as usize;
                self.rx = Some(SegmentedRx {
                    len,
                    data: data[2..min(data.len(), 2 + len)].to_vec(),
                    next_sn: 1,
                });
                self.queue(now + RESPONSE_DELAY, &[0x30, 0x00, 0x00]);
            }
            0x20 => {
                if let Some(request) = self.on_consecutive_frame(data) {
                    self.on_request(request, now);
                }
            }
            0x30 => self.on_flow_control(data, now),
            _ => {}
        }
    }

    fn on_consecutive_frame(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        let rx = self.rx.as_mut()?;
        if data[0] & 0x0F != rx.next_sn {
            debug!("Sim ECU 0x{:X} sequence error", self.request_address);
            self.rx = None;
            return None;
        }
        rx.next_sn = (rx.next_sn + 1) & 0x0F;
        let take = min(rx.len - rx.data.len(), data.len() - 1);
        rx.data.extend_from_slice(&data[1..1 + take]);
        if rx.data.len() == rx.len {
            self.rx.take().map(|rx| rx.data)
        } else {
            None
        }
    }

    fn on_request(&mut self, request: Vec<u8>, now: Instant) {
        self.requests.push(request.clone());
        if self.ignore_requests > 0 {
            self.ignore_requests -= 1;
            debug!(
                "Sim ECU 0x{:X} ignoring {request:02X?}",
                self.request_address
            );
            return;
        }

        if let Some(cc) = CommunicationControlRequest::from_bytes(&request) {
            if self.honours_comm_control {
                self.silenced_at = if cc.control_type.disables_tx() {
                    Some(now + self.silence_delay)
                } else {
                    None
                };
            }
            if !cc.suppress_positive_response {
                let sid = UdsCommand::CommunicationControl as u8 + POSITIVE_RESPONSE_OFFSET;
                self.respond(&[sid, cc.control_type as u8], now);
            }
            return;
        }

        if let Some(response) = self.responses.get(&request).cloned() {
            self.respond(&response, now);
        }
    }

    fn respond(&mut self, payload: &[u8], now: Instant) {
        let capacity = self.frame_capacity();
        let at = now + RESPONSE_DELAY;
        if payload.len() < capacity {
            let mut sf = vec![payload.len() as u8];
            sf.extend_from_slice(payload);
            self.queue(at, &sf);
        } else {
            let first = capacity - 2;
            let mut ff = vec![
                0x10 | ((payload.len() >> 8) & 0x0F) as u8,
                (payload.len() & 0xFF) as u8,
            ];
            ff.extend_from_slice(&payload[..first]);
            self.queue(at, &ff);
            self.tx = Some(SegmentedTx {
                data: payload.to_vec(),
                pos: first,
                pci: 0x21,
            });
        }
    }

    fn on_flow_control(&mut self, data: &[u8], now: Instant) {
        if data[0] != 0x30 {
            return;
        }
        let Some(mut tx) = self.tx.take() else {
            return;
        };
        let block_size = data.get(1).copied().unwrap_or(0) as usize;
        let capacity = self.frame_capacity();
        let mut sent = 0;
        while tx.pos < tx.data.len() && (block_size == 0 || sent < block_size) {
            let end = min(tx.pos + capacity - 1, tx.data.len());
            let mut cf = vec![tx.pci];
            cf.extend_from_slice(&tx.data[tx.pos..end]);
            sent += 1;
            self.queue(now + Duration::from_millis(sent as u64), &cf);
            tx.pos = end;
            tx.pci = if tx.pci == 0x2F { 0x20 } else { tx.pci + 1 };
        }
        if tx.pos < tx.data.len() {
            self.tx = Some(tx);
        }
    }

    fn poll(&mut self, now: Instant) -> Vec<(Instant, CanFrame)> {
        let silenced_at = self.silenced_at;
        let mut frames = Vec::new();
        for p in self.periodic.iter_mut() {
            while let Some(due) = p.next_due.filter(|d| *d <= now) {
                if silenced_at.is_none_or(|s| due < s) {
                    frames.push((due, CanFrame::new(p.address, self.bus, &p.data)));
                }
                p.next_due = Some(due + p.period);
            }
        }
        let (due, later): (Vec<_>, Vec<_>) = self.outbox.drain(..).partition(|(t, _)| *t <= now);
        self.outbox = later;
        frames.extend(due);
        frames
    }
}

/// A frame the tester sent, and when (In simulated time) it was sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// Time since the [SimClock] was created
    pub at: Duration,
    /// The frame
    pub frame: CanFrame,
}

/// Simulated multi-bus network
///
/// Every call to [BusTransport::receive_batch] advances the clock by the receive latency
/// (10ms by default) and returns whatever the ECUs transmitted in that time.
#[derive(Debug)]
pub struct SimulatedBus {
    clock: SimClock,
    receive_latency: Duration,
    ecus: Vec<SimEcu>,
    scheduled: Vec<(Instant, CanFrame)>,
    sent: Vec<SentFrame>,
    send_faults: usize,
    send_attempts: usize,
}

impl SimulatedBus {
    /// Creates an empty bus
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            receive_latency: Duration::from_millis(10),
            ecus: Vec::new(),
            scheduled: Vec::new(),
            sent: Vec::new(),
            send_faults: 0,
            send_attempts: 0,
        }
    }

    /// Sets how much time each receive call takes
    pub fn with_receive_latency(mut self, latency: Duration) -> Self {
        self.receive_latency = latency;
        self
    }

    /// Attaches an ECU to the bus
    pub fn with_ecu(mut self, mut ecu: SimEcu) -> Self {
        ecu.start(self.clock.now());
        self.ecus.push(ecu);
        self
    }

    /// Makes `frame` appear on the bus `delay` from now
    pub fn schedule_frame(&mut self, delay: Duration, frame: CanFrame) {
        self.scheduled.push((self.clock.now() + delay, frame));
    }

    /// Makes the next `count` send calls fail
    pub fn fail_next_sends(&mut self, count: usize) {
        self.send_faults = count;
    }

    /// Attached ECU, in the order they were added
    pub fn ecu(&self, idx: usize) -> Option<&SimEcu> {
        self.ecus.get(idx)
    }

    /// Every frame passed to [BusTransport::send], including ones which failed to send
    pub fn sent_frames(&self) -> &[SentFrame] {
        &self.sent
    }

    /// Payloads of single frames sent to `address`
    pub fn sent_payloads(&self, address: u32) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter(|s| s.frame.get_address() == address)
            .filter_map(|s| {
                let data = s.frame.get_data();
                let len = (*data.first()? & 0x0F) as usize;
                match data[0] & 0xF0 {
                    0x00 => data.get(1..1 + len).map(|p| p.to_vec()),
                    _ => None,
                }
            })
            .collect()
    }

    /// Number of times [BusTransport::send] was called
    pub fn send_attempts(&self) -> usize {
        self.send_attempts
    }
}

impl BusTransport for SimulatedBus {
    fn receive_batch(&mut self) -> ChannelResult<Vec<CanFrame>> {
        self.clock.advance(self.receive_latency);
        let now = self.clock.now();
        let (mut due, later): (Vec<_>, Vec<_>) =
            self.scheduled.drain(..).partition(|(t, _)| *t <= now);
        self.scheduled = later;
        for ecu in self.ecus.iter_mut() {
            due.extend(ecu.poll(now));
        }
        due.sort_by_key(|(t, _)| *t);
        Ok(due.into_iter().map(|(_, f)| f).collect())
    }

    fn send(&mut self, frames: &[CanFrame]) -> ChannelResult<()> {
        self.send_attempts += 1;
        let at = self.clock.elapsed();
        self.sent.extend(frames.iter().map(|frame| SentFrame {
            at,
            frame: frame.clone(),
        }));
        if self.send_faults > 0 {
            self.send_faults -= 1;
            return Err(ChannelError::APIError {
                api_name: "simulation".into(),
                code: 0,
                desc: "Injected send failure".into(),
            });
        }
        let now = self.clock.now();
        for frame in frames {
            for ecu in self.ecus.iter_mut() {
                ecu.on_frame(frame, now);
            }
        }
        Ok(())
    }
}
