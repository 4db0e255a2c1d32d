//! Module for UDS (Unified diagnostic services - ISO14229)
//!
//! Only the services involved in taking an ECU off the bus are provided here:
//! * Diagnostic session control - Entering the extended diagnostic session
//! * Communication control - Disabling normal ECU communication
//! * Tester present - Keeping the ECU in its non-default session afterwards

mod communication_control;
mod diagnostic_session_control;
mod tester_present;

pub use automotive_diag::uds::UdsCommand;
pub use communication_control::*;
pub use diagnostic_session_control::*;
pub use tester_present::*;

/// Service ID of every negative response
pub const NEGATIVE_RESPONSE_SID: u8 = 0x7F;

/// Positive responses echo the request SID with this offset added
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Bit in a sub-function byte which asks the ECU not to send a positive response
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;

/// A single request, and the response prefix expected back from the ECU
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiagnosticExchange {
    /// Full request payload, starting with the service ID
    pub request_payload: Vec<u8>,
    /// Prefix a response must start with to be accepted. Empty accepts any positive response
    pub expected_response_payload: Vec<u8>,
}

impl DiagnosticExchange {
    /// Creates a new exchange
    pub fn new(request: &[u8], expected_response: &[u8]) -> Self {
        Self {
            request_payload: request.to_vec(),
            expected_response_payload: expected_response.to_vec(),
        }
    }

    /// Returns true if the response is the one this exchange expects
    pub fn accepts(&self, response: &[u8]) -> bool {
        response.starts_with(&self.expected_response_payload)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, strum_macros::Display)]
/// UDS negative response codes seen during session and communication control
pub enum UdsNrc {
    /// ECU rejected the request (No specific error)
    GeneralReject,
    /// Service is not supported by the ECU
    ServiceNotSupported,
    /// Sub function is not supported by the ECU
    SubFunctionNotSupported,
    /// Request message was an invalid length, or the format of the
    /// request was incorrect
    IncorrectMessageLengthOrInvalidFormat,
    /// The ECU is too busy to perform this request. Therefore, the request
    /// Should be sent again if this error occurs
    BusyRepeatRequest,
    /// The requested action could not be preformed due to the prerequisite conditions
    /// not being correct
    ConditionsNotCorrect,
    /// The request has been sent in the incorrect order. Communication control
    /// sent outside of the extended session typically produces this
    RequestSequenceError,
    /// The request message contains data outside of a valid range
    RequestOutOfRange,
    /// The request could not be completed due to security access being denied.
    SecurityAccessDenied,
    /// The ECU has accepted the request, but cannot reply right now.
    RequestCorrectlyReceivedResponsePending,
    /// The sub function is not supported in the current diagnostic session mode
    SubFunctionNotSupportedInActiveSession,
    /// The service is not supported in the current diagnostic session mode
    ServiceNotSupportedInActiveSession,
    /// Vehicle speed is too high
    VehicleSpeedTooHigh,
    /// (0x81-0xFE) Vehicle condition is not correct
    ConditionNotCorrect(u8),
    /// Other reserved error code
    IsoSAEReserved(u8),
}

impl From<u8> for UdsNrc {
    fn from(p: u8) -> Self {
        match p {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupported,
            0x13 => Self::IncorrectMessageLengthOrInvalidFormat,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrect,
            0x24 => Self::RequestSequenceError,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x78 => Self::RequestCorrectlyReceivedResponsePending,
            0x7E => Self::SubFunctionNotSupportedInActiveSession,
            0x7F => Self::ServiceNotSupportedInActiveSession,
            0x88 => Self::VehicleSpeedTooHigh,
            0x81..=0xFE => Self::ConditionNotCorrect(p),
            x => Self::IsoSAEReserved(x),
        }
    }
}

impl UdsNrc {
    /// Returns true if the ECU is still processing the request, and the real
    /// response will follow
    pub fn is_response_pending(&self) -> bool {
        *self == Self::RequestCorrectlyReceivedResponsePending
    }
}

/// Returns a human readable description of a negative response code
pub fn nrc_description(code: u8) -> String {
    UdsNrc::from(code).to_string()
}

/// Checks if the response payload matches the request ServiceID.
/// The matching response SID is request + 0x40.
///
/// ## Parameters
/// * sid - The SID to match against
/// * resp - Response from the ECU to check
pub fn check_pos_response_id(sid: u8, resp: &[u8]) -> crate::DiagResult<()> {
    match resp.first() {
        None => Err(crate::DiagError::EmptyResponse),
        Some(&b) if b == sid.wrapping_add(POSITIVE_RESPONSE_OFFSET) => Ok(()),
        Some(&b) => {
            log::error!(
                "ECU SID mismatch. Request SID was 0x{sid:02X}, response SID was 0x{b:02X}"
            );
            Err(crate::DiagError::WrongMessage)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiagError;

    #[test]
    fn exchange_accepts_prefix() {
        let ex = DiagnosticExchange::new(&[0x22, 0xF1, 0x90], &[0x62, 0xF1, 0x90]);
        assert!(ex.accepts(&[0x62, 0xF1, 0x90, 0x57]));
        assert!(!ex.accepts(&[0x62, 0xF1]));
        assert!(!ex.accepts(&[0x7F, 0x22, 0x31]));
    }

    #[test]
    fn empty_expected_response_accepts_anything() {
        let ex = DiagnosticExchange::new(&[0x28, 0x83, 0x01], &[]);
        assert!(ex.accepts(&[]));
        assert!(ex.accepts(&[0x68, 0x03]));
    }

    #[test]
    fn nrc_lookup() {
        assert_eq!(UdsNrc::from(0x22), UdsNrc::ConditionsNotCorrect);
        assert!(UdsNrc::from(0x78).is_response_pending());
        assert_eq!(UdsNrc::from(0x90), UdsNrc::ConditionNotCorrect(0x90));
        assert_eq!(UdsNrc::from(0x50), UdsNrc::IsoSAEReserved(0x50));
        assert_eq!(nrc_description(0x11), "ServiceNotSupported");
    }

    #[test]
    fn positive_response_check() {
        assert!(check_pos_response_id(0x10, &[0x50, 0x03]).is_ok());
        assert!(matches!(
            check_pos_response_id(0x10, &[0x51, 0x03]),
            Err(DiagError::WrongMessage)
        ));
        assert!(matches!(
            check_pos_response_id(0x10, &[]),
            Err(DiagError::EmptyResponse)
        ));
    }
}
