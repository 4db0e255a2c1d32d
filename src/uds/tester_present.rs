//! Tester present, which keeps an ECU in its current diagnostic session.
//!
//! A disabled ECU returns to the default session (And starts transmitting again) once it stops
//! receiving these, so the request has to be sent periodically by whoever took the ECU off the bus.

use automotive_diag::uds::UdsCommand;

use super::{DiagnosticExchange, POSITIVE_RESPONSE_OFFSET, SUPPRESS_POSITIVE_RESPONSE};

/// Builds a tester present request (`3E 00`, or `3E 80` when the response is suppressed)
pub fn tester_present_request(suppress_response: bool) -> Vec<u8> {
    let sub_function = if suppress_response {
        SUPPRESS_POSITIVE_RESPONSE
    } else {
        0x00
    };
    vec![UdsCommand::TesterPresent as u8, sub_function]
}

/// Builds the tester present exchange
pub fn tester_present_exchange(suppress_response: bool) -> DiagnosticExchange {
    let expected: &[u8] = if suppress_response {
        &[]
    } else {
        &[UdsCommand::TesterPresent as u8 + POSITIVE_RESPONSE_OFFSET, 0x00]
    };
    DiagnosticExchange::new(&tester_present_request(suppress_response), expected)
}
