#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate for taking an ECU off a vehicle network, so that its function (For example radar)
//! can be emulated by another device.
//!
//! ## How an ECU is silenced
//!
//! The ECU is asked to go into its extended diagnostic session (UDS `0x10 0x03`), and is then sent
//! a communication control request (UDS `0x28`), which by default disables both its normal
//! transmission and reception. Once the request has been sent, the crate either passively monitors
//! the bus until the ECU's periodic traffic has stopped for a short debounce period, or waits
//! a fixed delay.
//!
//! The whole handshake is retried a bounded number of times. A disable attempt is atomic, every
//! retry starts again from the diagnostic session request.
//!
//! **WARNING**: Silencing a radar ECU also disables any function it provides, such as AEB!
//!
//! ## Keeping the ECU silent
//!
//! An ECU only stays silent whilst it remains in the non-default diagnostic session. It is the
//! caller's responsibility to keep sending tester present messages
//! (See [uds::tester_present_request]) after the ECU has been disabled.
//!
//! ## Bus access
//!
//! All I/O goes through the [channel::BusTransport] trait, and all request/response correlation
//! goes through the [channel::QueryEngine] trait. This crate provides a software ISO-TP query
//! engine ([hardware::software_isotp::IsoTpQuery]) and an adapter for plain send/receive
//! callbacks ([hardware::CallbackBus]). There is also a scripted simulation bus for testing and,
//! with the `socketcan` feature, a SocketCAN adapter for Linux.

pub mod channel;
pub mod clock;
pub mod disable;
pub mod hardware;
mod helpers;
pub mod silence;
pub mod uds;

use channel::ChannelError;

pub use channel::{CanFrame, EcuTarget};
pub use disable::{DisableOptions, DisableOutcome, EcuDisabler, SilenceCheck, disable_ecu};
pub use silence::{SilenceSettings, verify_silence};

/// Diagnostic result
pub type DiagResult<T> = Result<T, DiagError>;

#[derive(Debug, thiserror::Error)]
/// Diagnostic error
pub enum DiagError {
    /// Diagnostic error code from the ECU itself
    #[error("ECU Negative response. Error 0x{:02X?}, definition: {:?}", code, def)]
    ECUError {
        /// Raw Negative response code from ECU
        code: u8,
        /// Negative response code definition according to protocol
        def: Option<String>,
    },
    /// No response from the ECU before the timeout elapsed
    #[error("ECU did not respond to the request")]
    EmptyResponse,
    /// ECU Responded but send a message that wasn't a reply for the sent message
    #[error("ECU response is out of order")]
    WrongMessage,
    /// ECU Responded with a message, but the length was incorrect
    #[error("ECU response size was not the correct length")]
    InvalidResponseLength,
    /// A parameter given to the function is invalid. Check the function's documentation
    /// for more information
    #[error("Diagnostic function parameter invalid")]
    ParameterInvalid,
    /// Error with underlying communication channel
    #[error("Diagnostic server hardware channel error")]
    ChannelError(
        #[from]
        #[source]
        ChannelError,
    ),
}
