//! Passive confirmation that an ECU has stopped transmitting.
//!
//! After communication control has been sent, the ECU's normal messages are watched on the bus.
//! Once none of them has been seen for a debounce period (The quiet duration), the ECU is
//! considered silent.

use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    DiagError, DiagResult,
    channel::{BusTransport, CanFrame},
    clock::Clock,
    helpers::hex_addresses,
};

/// Debounce configuration of a silence check
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SilenceSettings {
    /// How long no monitored frame may be seen before the ECU is considered silent
    pub quiet_duration: Duration,
    /// Pause between two reads of the bus
    pub poll_interval: Duration,
}

impl Default for SilenceSettings {
    fn default() -> Self {
        Self {
            quiet_duration: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// State of a single silence check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilenceWindow {
    monitored_addresses: BTreeSet<u32>,
    bus: u8,
    quiet_duration: Duration,
    overall_timeout: Duration,
    start_time: Instant,
    last_message_time: Instant,
}

impl SilenceWindow {
    /// Opens a window at `now`.
    ///
    /// Returns [DiagError::ParameterInvalid] if the quiet duration is not shorter than the
    /// timeout, as such a window could never report silence.
    pub fn open(
        bus: u8,
        monitored_addresses: BTreeSet<u32>,
        overall_timeout: Duration,
        settings: &SilenceSettings,
        now: Instant,
    ) -> DiagResult<Self> {
        if settings.quiet_duration >= overall_timeout {
            return Err(DiagError::ParameterInvalid);
        }
        Ok(Self {
            monitored_addresses,
            bus,
            quiet_duration: settings.quiet_duration,
            overall_timeout,
            start_time: now,
            last_message_time: now,
        })
    }

    /// Records a batch of frames received at `now`. Returns true if any of them
    /// came from a monitored address
    pub fn observe(&mut self, frames: &[CanFrame], now: Instant) -> bool {
        let seen = frames.iter().any(|f| {
            f.get_bus() == self.bus && self.monitored_addresses.contains(&f.get_address())
        });
        if seen {
            self.last_message_time = now;
        }
        seen
    }

    /// True once no monitored frame has been seen for the quiet duration
    pub fn is_quiet(&self, now: Instant) -> bool {
        now.duration_since(self.last_message_time) >= self.quiet_duration
    }

    /// True once the overall timeout has elapsed
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.start_time) >= self.overall_timeout
    }

    /// When a monitored frame was last seen (Or when the window was opened)
    pub fn last_message_time(&self) -> Instant {
        self.last_message_time
    }
}

/// Waits for the ECU transmitting on `addresses` to go quiet, using the default
/// [SilenceSettings].
///
/// ## Returns
/// * `Ok(true)` - No frame from `addresses` was seen on `bus` for 300ms
/// * `Ok(false)` - `timeout` elapsed without a long enough quiet period
/// * `Err` - The transport failed, or `timeout` is not longer than the quiet duration
pub fn verify_silence<T, C, I>(
    transport: &mut T,
    clock: &C,
    bus: u8,
    addresses: I,
    timeout: Duration,
) -> DiagResult<bool>
where
    T: BusTransport + ?Sized,
    C: Clock + ?Sized,
    I: IntoIterator<Item = u32>,
{
    verify_silence_with(
        transport,
        clock,
        bus,
        addresses,
        timeout,
        &SilenceSettings::default(),
    )
}

/// [verify_silence] with custom debounce settings
pub fn verify_silence_with<T, C, I>(
    transport: &mut T,
    clock: &C,
    bus: u8,
    addresses: I,
    timeout: Duration,
    settings: &SilenceSettings,
) -> DiagResult<bool>
where
    T: BusTransport + ?Sized,
    C: Clock + ?Sized,
    I: IntoIterator<Item = u32>,
{
    let addresses: BTreeSet<u32> = addresses.into_iter().collect();
    debug!(
        "Waiting {:?} for silence on bus {bus} from {}",
        settings.quiet_duration,
        hex_addresses(&addresses)
    );
    let mut window = SilenceWindow::open(bus, addresses, timeout, settings, clock.now())?;
    while !window.is_expired(clock.now()) {
        let frames = transport.receive_batch()?;
        let now = clock.now();
        window.observe(&frames, now);
        if window.is_quiet(now) {
            return Ok(true);
        }
        clock.sleep(settings.poll_interval);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(a: &[u32]) -> BTreeSet<u32> {
        a.iter().copied().collect()
    }

    #[test]
    fn window_rejects_unreachable_quiet_period() {
        let now = Instant::now();
        let settings = SilenceSettings::default();
        let open = |ms| SilenceWindow::open(0, addrs(&[0x7D0]), ms, &settings, now);
        assert!(matches!(
            open(Duration::from_millis(300)),
            Err(DiagError::ParameterInvalid)
        ));
        assert!(open(Duration::from_millis(301)).is_ok());
    }

    #[test]
    fn window_tracks_matching_frames_only() {
        let start = Instant::now();
        let mut window = SilenceWindow::open(
            1,
            addrs(&[0x500]),
            Duration::from_secs(1),
            &SilenceSettings::default(),
            start,
        )
        .unwrap();

        let later = start + Duration::from_millis(100);
        // Wrong bus, then wrong address
        assert!(!window.observe(&[CanFrame::new(0x500, 0, &[0x00])], later));
        assert!(!window.observe(&[CanFrame::new(0x501, 1, &[0x00])], later));
        assert_eq!(window.last_message_time(), start);

        assert!(window.observe(&[CanFrame::new(0x500, 1, &[0x00])], later));
        assert_eq!(window.last_message_time(), later);
        assert!(!window.is_quiet(later + Duration::from_millis(299)));
        assert!(window.is_quiet(later + Duration::from_millis(300)));
    }

    #[test]
    fn window_expiry() {
        let start = Instant::now();
        let window = SilenceWindow::open(
            0,
            addrs(&[0x500]),
            Duration::from_millis(1500),
            &SilenceSettings::default(),
            start,
        )
        .unwrap();
        assert!(!window.is_expired(start + Duration::from_millis(1499)));
        assert!(window.is_expired(start + Duration::from_millis(1500)));
    }
}
