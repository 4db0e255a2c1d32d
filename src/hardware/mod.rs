//! The hardware module contains the bus transports and query engine used to
//! talk to ECUs, either over real adapters or a simulated bus for testing.
//!
//! * [software_isotp] - ISO-TP query engine running over any [BusTransport]
//! * [simulation] - Simulated bus, ECUs and clock
//! * `socketcan` - SocketCAN interfaces (Linux only, `socketcan` feature)
//! * [CallbackBus] - Wraps a pair of closures provided by the host application

pub mod simulation;
pub mod software_isotp;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub mod socketcan;

use std::fmt;

use crate::channel::{BusTransport, CanFrame, ChannelResult};

/// A [BusTransport] backed by a receive closure and a send closure.
///
/// This is useful when the host application already owns the CAN adapter, and only wants to
/// lend its frame I/O to the disable workflow.
///
/// ## Example
/// ```
/// use ecu_disable::hardware::CallbackBus;
/// use ecu_disable::channel::{BusTransport, CanFrame};
///
/// let mut sent = Vec::new();
/// let mut bus = CallbackBus::new(|| Ok(Vec::new()), |frames: &[CanFrame]| {
///     sent.extend_from_slice(frames);
///     Ok(())
/// });
/// assert!(bus.receive_batch().unwrap().is_empty());
/// ```
pub struct CallbackBus<R, S>
where
    R: FnMut() -> ChannelResult<Vec<CanFrame>>,
    S: FnMut(&[CanFrame]) -> ChannelResult<()>,
{
    receive: R,
    send: S,
}

impl<R, S> CallbackBus<R, S>
where
    R: FnMut() -> ChannelResult<Vec<CanFrame>>,
    S: FnMut(&[CanFrame]) -> ChannelResult<()>,
{
    /// Creates a new callback bus
    pub fn new(receive: R, send: S) -> Self {
        Self { receive, send }
    }
}

impl<R, S> fmt::Debug for CallbackBus<R, S>
where
    R: FnMut() -> ChannelResult<Vec<CanFrame>>,
    S: FnMut(&[CanFrame]) -> ChannelResult<()>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBus").finish_non_exhaustive()
    }
}

impl<R, S> BusTransport for CallbackBus<R, S>
where
    R: FnMut() -> ChannelResult<Vec<CanFrame>>,
    S: FnMut(&[CanFrame]) -> ChannelResult<()>,
{
    fn receive_batch(&mut self) -> ChannelResult<Vec<CanFrame>> {
        (self.receive)()
    }

    fn send(&mut self, frames: &[CanFrame]) -> ChannelResult<()> {
        (self.send)(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;

    #[test]
    fn callbacks_are_forwarded() {
        let mut sent = Vec::new();
        {
            let mut bus = CallbackBus::new(
                || Ok(vec![CanFrame::new(0x500, 0, &[0x01])]),
                |frames: &[CanFrame]| {
                    sent.extend_from_slice(frames);
                    Ok(())
                },
            );
            assert_eq!(bus.receive_batch().unwrap().len(), 1);
            bus.send(&[CanFrame::new(0x7D0, 0, &[0x02, 0x10, 0x03])])
                .unwrap();
        }
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_address(), 0x7D0);
    }

    #[test]
    fn callback_errors_are_returned() {
        let mut bus = CallbackBus::new(
            || Err(ChannelError::InterfaceNotOpen),
            |_: &[CanFrame]| Err(ChannelError::WriteTimeout),
        );
        assert!(matches!(
            bus.receive_batch(),
            Err(ChannelError::InterfaceNotOpen)
        ));
        assert!(matches!(bus.send(&[]), Err(ChannelError::WriteTimeout)));
    }
}
