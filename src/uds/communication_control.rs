//! Provides requests to control normal ECU communication

use automotive_diag::uds::UdsCommand;

use super::{DiagnosticExchange, SUPPRESS_POSITIVE_RESPONSE};

/// Expected response to the communication control disable request. No response is required,
/// as the ECU may go silent before it gets the chance to reply
pub const COM_CONT_RESPONSE: [u8; 0] = [];

/// What the ECU should do with its normal receive and transmit paths
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ControlType {
    /// Normal operation
    EnableRxAndTx = 0x00,
    /// Keep listening, stop transmitting
    EnableRxDisableTx = 0x01,
    /// Stop listening, keep transmitting
    DisableRxEnableTx = 0x02,
    /// Stop listening and transmitting
    DisableRxAndTx = 0x03,
}

impl ControlType {
    /// Returns true if the ECU stops transmitting its normal messages
    pub fn disables_tx(&self) -> bool {
        matches!(self, Self::EnableRxDisableTx | Self::DisableRxAndTx)
    }
}

impl TryFrom<u8> for ControlType {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0x00 => Ok(Self::EnableRxAndTx),
            0x01 => Ok(Self::EnableRxDisableTx),
            0x02 => Ok(Self::DisableRxEnableTx),
            0x03 => Ok(Self::DisableRxAndTx),
            x => Err(x),
        }
    }
}

/// Which class of messages the control type applies to
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CommunicationType {
    /// Application messages
    NormalCommunication = 0x01,
    /// Network management messages
    NetworkManagement = 0x02,
    /// Both application and network management messages
    NormalAndNetworkManagement = 0x03,
}

impl TryFrom<u8> for CommunicationType {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0x01 => Ok(Self::NormalCommunication),
            0x02 => Ok(Self::NetworkManagement),
            0x03 => Ok(Self::NormalAndNetworkManagement),
            x => Err(x),
        }
    }
}

/// A communication control (0x28) request.
///
/// The default request is `28 83 01`: disable Rx and Tx of normal communication, without
/// a positive response.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommunicationControlRequest {
    /// Control type (Sub function)
    pub control_type: ControlType,
    /// Communication layer to modify
    pub communication_type: CommunicationType,
    /// Ask the ECU not to send a positive response
    pub suppress_positive_response: bool,
}

impl Default for CommunicationControlRequest {
    fn default() -> Self {
        Self {
            control_type: ControlType::DisableRxAndTx,
            communication_type: CommunicationType::NormalCommunication,
            suppress_positive_response: true,
        }
    }
}

impl CommunicationControlRequest {
    /// Encodes the request
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sub_function = self.control_type as u8;
        if self.suppress_positive_response {
            sub_function |= SUPPRESS_POSITIVE_RESPONSE;
        }
        vec![
            UdsCommand::CommunicationControl as u8,
            sub_function,
            self.communication_type as u8,
        ]
    }

    /// Decodes a request. Returns None if the payload is not a communication control request
    /// this crate understands
    pub fn from_bytes(payload: &[u8]) -> Option<Self> {
        match payload {
            [sid, sub_function, comm_type, ..]
                if *sid == UdsCommand::CommunicationControl as u8 =>
            {
                Some(Self {
                    control_type: ControlType::try_from(sub_function & !SUPPRESS_POSITIVE_RESPONSE)
                        .ok()?,
                    communication_type: CommunicationType::try_from(*comm_type).ok()?,
                    suppress_positive_response: sub_function & SUPPRESS_POSITIVE_RESPONSE != 0,
                })
            }
            _ => None,
        }
    }
}

/// Builds the exchange for a raw communication control request. The request is sent
/// without waiting for a response, so the expected response is empty
pub fn communication_control_exchange(request: &[u8]) -> DiagnosticExchange {
    DiagnosticExchange::new(request, &COM_CONT_RESPONSE)
}
