//!  Provides the requests to manipulate the ECUs diagnostic session mode

pub use automotive_diag::uds::UdsSessionType;
use automotive_diag::uds::UdsCommand;

use super::{DiagnosticExchange, POSITIVE_RESPONSE_OFFSET};

/// Request for the extended diagnostic session (`10 03`)
pub const EXT_DIAG_REQUEST: [u8; 2] = [
    UdsCommand::DiagnosticSessionControl as u8,
    UdsSessionType::Extended as u8,
];

/// Positive response to [EXT_DIAG_REQUEST] (`50 03`)
pub const EXT_DIAG_RESPONSE: [u8; 2] = [
    UdsCommand::DiagnosticSessionControl as u8 + POSITIVE_RESPONSE_OFFSET,
    UdsSessionType::Extended as u8,
];

/// Builds the exchange which asks the ECU to go into a specific diagnostic session mode.
/// The ECU's positive response echoes the session byte.
pub fn session_control_exchange(session_mode: UdsSessionType) -> DiagnosticExchange {
    let session = session_mode as u8;
    DiagnosticExchange::new(
        &[UdsCommand::DiagnosticSessionControl as u8, session],
        &[
            UdsCommand::DiagnosticSessionControl as u8 + POSITIVE_RESPONSE_OFFSET,
            session,
        ],
    )
}

/// The extended diagnostic session exchange, which must succeed before communication control is
/// accepted by the ECU
pub fn extended_session_exchange() -> DiagnosticExchange {
    DiagnosticExchange::new(&EXT_DIAG_REQUEST, &EXT_DIAG_RESPONSE)
}
