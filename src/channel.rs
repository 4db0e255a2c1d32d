//! Module for raw bus frames, and the logical channels used to reach an ECU
//!
//! Currently, the following channel types are defined:
//! * [BusTransport] - Raw frame I/O over one or more buses
//! * [QueryEngine] - ISO-TP (ISO15765) request/response correlation over a [BusTransport]

use std::{collections::HashMap, fmt, time::Duration};

use crate::{DiagResult, uds::DiagnosticExchange};

/// Communication channel result
pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, thiserror::Error)]
/// Error produced by a communication channel
pub enum ChannelError {
    /// Underlying IO Error with channel
    #[error("IO error: {0}")]
    IOError(
        #[from]
        #[source]
        std::io::Error,
    ),
    /// Timeout when writing data to the channel
    #[error("timeout writing to channel")]
    WriteTimeout,
    /// Timeout when reading from the channel
    #[error("timeout reading from channel")]
    ReadTimeout,
    /// The channels Tx buffer is full, or the receiver reported an overflow
    #[error("channel's Transmit buffer is full")]
    BufferFull,
    /// Unsupported channel request
    #[error("unsupported channel request")]
    UnsupportedRequest,
    /// The interface is not open
    #[error("channel's interface is not open")]
    InterfaceNotOpen,
    /// A frame was addressed to a bus the interface does not have
    #[error("bus {0} does not exist on this interface")]
    UnknownBus(u8),
    /// Underlying API error with hardware
    #[error("underlying {api_name} API error ({code}): {desc}")]
    APIError {
        /// Name of the API EG: 'socketCAN', 'simulation'
        api_name: String,
        /// Internal API error code
        code: u8,
        /// API error description
        desc: String,
    },
}

/// A single raw frame seen on (Or sent to) a bus
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanFrame {
    address: u32,
    bus: u8,
    data: Vec<u8>,
}

impl CanFrame {
    /// Creates a new frame
    ///
    /// ## Parameters
    /// * address - Arbitration ID of the frame
    /// * bus - Bus number the frame was received from or should be sent on
    /// * data - Frame payload
    pub fn new(address: u32, bus: u8, data: &[u8]) -> Self {
        Self {
            address,
            bus,
            data: data.to_vec(),
        }
    }

    /// Arbitration ID of the frame
    pub fn get_address(&self) -> u32 {
        self.address
    }

    /// Source (Or destination) bus of the frame
    pub fn get_bus(&self) -> u8 {
        self.bus
    }

    /// Frame payload
    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    /// Returns true if the frame uses a 29bit identifier
    pub fn is_extended(&self) -> bool {
        self.address > 0x7FF
    }
}

/// One diagnostic endpoint on a bus
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EcuTarget {
    /// Diagnostic request address of the ECU
    pub address: u32,
    /// Extended ISO-TP address, for ECUs that sit behind a gateway
    pub sub_address: Option<u8>,
}

impl EcuTarget {
    /// Creates a target with no sub address
    pub const fn new(address: u32) -> Self {
        Self {
            address,
            sub_address: None,
        }
    }

    /// Creates a target which requires an extended ISO-TP address
    pub const fn with_sub_address(address: u32, sub_address: u8) -> Self {
        Self {
            address,
            sub_address: Some(sub_address),
        }
    }
}

impl Default for EcuTarget {
    fn default() -> Self {
        Self::new(0x7D0)
    }
}

impl fmt::Display for EcuTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_address {
            Some(sub) => write!(f, "0x{:X} (sub 0x{sub:02X})", self.address),
            None => write!(f, "0x{:X}", self.address),
        }
    }
}

/// Raw access to a multi-bus frame network.
///
/// Implementations are expected to be blocking: [BusTransport::receive_batch] waits until either
/// some frames are available, or the transport's own read timeout elapses.
pub trait BusTransport {
    /// Reads the next batch of frames from every bus on the interface.
    /// An empty batch is not an error, it just means nothing was received in time.
    fn receive_batch(&mut self) -> ChannelResult<Vec<CanFrame>>;

    /// Sends frames. Each frame is sent on the bus given by [CanFrame::get_bus]
    fn send(&mut self, frames: &[CanFrame]) -> ChannelResult<()>;
}

impl<T: BusTransport + ?Sized> BusTransport for &mut T {
    fn receive_batch(&mut self) -> ChannelResult<Vec<CanFrame>> {
        (**self).receive_batch()
    }

    fn send(&mut self, frames: &[CanFrame]) -> ChannelResult<()> {
        (**self).send(frames)
    }
}

impl<T: BusTransport + ?Sized> BusTransport for Box<T> {
    fn receive_batch(&mut self) -> ChannelResult<Vec<CanFrame>> {
        (**self).receive_batch()
    }

    fn send(&mut self, frames: &[CanFrame]) -> ChannelResult<()> {
        (**self).send(frames)
    }
}

/// Results of a [QueryEngine::query].
///
/// Targets which never answered are absent. Targets which answered with the expected
/// response hold `Ok(response)`, targets which rejected the request or answered with
/// something unexpected hold the error.
pub type QueryResults = HashMap<EcuTarget, DiagResult<Vec<u8>>>;

/// Request/response correlation with one or more ECUs
pub trait QueryEngine {
    /// Sends each exchange's request to every target (In order), and collects the responses.
    ///
    /// ## Parameters
    /// * transport - Bus to query over
    /// * bus - Bus number the targets live on
    /// * targets - ECUs to query
    /// * exchanges - Requests to send, in order. The next request is only sent once the previous
    ///   one received its expected response
    /// * timeout - How long to wait for a response. A value of 0 sends the requests and returns
    ///   immediately without waiting for any response
    ///
    /// ## Returns
    /// Transport errors are returned directly, everything else is reported per target in the
    /// [QueryResults]
    fn query(
        &mut self,
        transport: &mut dyn BusTransport,
        bus: u8,
        targets: &[EcuTarget],
        exchanges: &[DiagnosticExchange],
        timeout: Duration,
    ) -> DiagResult<QueryResults>;
}

/// ISO-TP configuration options
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsoTPSettings {
    /// Block size sent in our flow control frames
    pub block_size: u8,
    /// Minimum separation time between CAN Frames sent in our flow control frames (In milliseconds)
    pub st_min: u8,
    /// Pad frames to 8 bytes if data size < 8
    pub pad_frame: bool,
    /// Offset between an 11bit request address and the address the ECU responds on
    pub rx_offset: u32,
    /// How long a 'response pending' negative response extends the wait for the real response
    pub response_pending_timeout_ms: u32,
    /// Longest a query may keep waiting on a target which keeps responding with 'response
    /// pending'. Queries with a longer timeout are bounded by their timeout instead
    pub total_timeout_ms: u32,
}

impl Default for IsoTPSettings {
    fn default() -> Self {
        Self {
            block_size: 8,
            st_min: 20,
            pad_frame: true,
            rx_offset: 0x08,
            response_pending_timeout_ms: 4000,
            total_timeout_ms: 10_000,
        }
    }
}
