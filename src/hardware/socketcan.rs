//! SocketCAN module
//!
//! Provides a [BusTransport] over one or more SocketCAN interfaces. The index of
//! each interface in the list given to [SocketCanBus::open] is its bus number.

use std::{
    io::ErrorKind,
    time::{Duration, Instant},
};

use log::debug;
use socketcan::{CanSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket, StandardId};

use crate::channel::{BusTransport, CanFrame, ChannelError, ChannelResult};

/// SocketCAN bus transport
#[derive(Debug)]
pub struct SocketCanBus {
    sockets: Vec<CanSocket>,
    read_timeout: Duration,
}

impl SocketCanBus {
    /// Opens every interface in `if_names` (EG: `["can0", "can1"]`)
    pub fn open(if_names: &[&str]) -> ChannelResult<Self> {
        let mut sockets = Vec::with_capacity(if_names.len());
        for name in if_names {
            let socket = CanSocket::open(name)?;
            socket.set_nonblocking(true)?;
            debug!("Opened SocketCAN interface {name} as bus {}", sockets.len());
            sockets.push(socket);
        }
        Ok(Self {
            sockets,
            read_timeout: Duration::from_millis(10),
        })
    }

    /// Sets how long [BusTransport::receive_batch] waits for frames when none are pending
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn drain(&self, into: &mut Vec<CanFrame>) -> ChannelResult<()> {
        for (bus, socket) in self.sockets.iter().enumerate() {
            loop {
                match socket.read_frame() {
                    Ok(frame) if frame.is_error_frame() => {
                        debug!("Error frame on bus {bus}: {frame:?}")
                    }
                    Ok(frame) => into.push(CanFrame::new(frame.raw_id(), bus as u8, frame.data())),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

impl BusTransport for SocketCanBus {
    fn receive_batch(&mut self) -> ChannelResult<Vec<CanFrame>> {
        if self.sockets.is_empty() {
            return Err(ChannelError::InterfaceNotOpen);
        }
        let start = Instant::now();
        let mut frames = Vec::new();
        loop {
            self.drain(&mut frames)?;
            if !frames.is_empty() || start.elapsed() >= self.read_timeout {
                return Ok(frames);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn send(&mut self, frames: &[CanFrame]) -> ChannelResult<()> {
        for f in frames {
            let socket = self
                .sockets
                .get(f.get_bus() as usize)
                .ok_or(ChannelError::UnknownBus(f.get_bus()))?;
            let id: Id = if f.is_extended() {
                ExtendedId::new(f.get_address())
                    .ok_or(ChannelError::UnsupportedRequest)?
                    .into()
            } else {
                StandardId::new(f.get_address() as u16)
                    .ok_or(ChannelError::UnsupportedRequest)?
                    .into()
            };
            let frame = socketcan::CanFrame::new(id, f.get_data())
                .ok_or(ChannelError::UnsupportedRequest)?;
            socket.write_frame(&frame)?;
        }
        Ok(())
    }
}
