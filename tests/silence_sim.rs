use std::time::Duration;

use ecu_disable::{
    CanFrame, DiagError,
    channel::ChannelError,
    clock::Clock,
    hardware::{
        CallbackBus,
        simulation::{SimClock, SimEcu, SimulatedBus},
    },
    silence::{SilenceSettings, verify_silence_with},
    verify_silence,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn already_silent_ecu_is_confirmed_after_quiet_duration() {
    init_logger();
    let clock = SimClock::new();
    let mut bus = SimulatedBus::new(clock.clone());
    let silent =
        verify_silence(&mut bus, &clock, 0, [0x500], Duration::from_millis(1500)).unwrap();
    assert!(silent);
    assert!(clock.elapsed() >= Duration::from_millis(300));
    assert!(clock.elapsed() <= Duration::from_millis(350));
}

#[test]
fn chatty_ecu_times_out() {
    init_logger();
    let clock = SimClock::new();
    let ecu = SimEcu::new(0, 0x7D0).with_periodic_frame(0x500, Duration::from_millis(250), &[0x01]);
    let mut bus = SimulatedBus::new(clock.clone()).with_ecu(ecu);
    let silent = verify_silence(&mut bus, &clock, 0, [0x500], Duration::from_secs(2)).unwrap();
    assert!(!silent);
    assert!(clock.elapsed() >= Duration::from_secs(2));
}

#[test]
fn other_buses_and_addresses_are_ignored() {
    init_logger();
    let clock = SimClock::new();
    let period = Duration::from_millis(10);
    let other_bus = SimEcu::new(1, 0x7D0).with_periodic_frame(0x500, period, &[0x01]);
    let other_address = SimEcu::new(0, 0x7E0).with_periodic_frame(0x501, period, &[0x01]);
    let mut bus = SimulatedBus::new(clock.clone())
        .with_ecu(other_bus)
        .with_ecu(other_address);
    let silent =
        verify_silence(&mut bus, &clock, 0, [0x500], Duration::from_millis(1500)).unwrap();
    assert!(silent);
    assert!(clock.elapsed() <= Duration::from_millis(350));
}

#[test]
fn quiet_period_restarts_on_each_frame() {
    init_logger();
    let clock = SimClock::new();
    let mut bus = SimulatedBus::new(clock.clone());
    bus.schedule_frame(Duration::from_millis(200), CanFrame::new(0x500, 0, &[0x01]));
    let timeout = Duration::from_millis(1500);
    let silent = verify_silence(&mut bus, &clock, 0, [0x500, 0x501], timeout).unwrap();
    assert!(silent);
    assert!(clock.elapsed() >= Duration::from_millis(500));
    assert!(clock.elapsed() <= Duration::from_millis(550));
}

#[test]
fn custom_debounce() {
    init_logger();
    let clock = SimClock::new();
    let mut bus = SimulatedBus::new(clock.clone());
    let settings = SilenceSettings {
        quiet_duration: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
    };
    let silent = verify_silence_with(
        &mut bus,
        &clock,
        0,
        [0x500],
        Duration::from_millis(200),
        &settings,
    )
    .unwrap();
    assert!(silent);
    assert!(clock.elapsed() < Duration::from_millis(150));
}

#[test]
fn quiet_duration_must_be_shorter_than_timeout() {
    init_logger();
    let clock = SimClock::new();
    let mut bus = SimulatedBus::new(clock.clone());
    let res = verify_silence(&mut bus, &clock, 0, [0x500], Duration::from_millis(300));
    assert!(matches!(res, Err(DiagError::ParameterInvalid)));
    // Nothing was read
    assert_eq!(clock.elapsed(), Duration::ZERO);
}

#[test]
fn transport_errors_are_returned() {
    init_logger();
    let clock = SimClock::new();
    let mut bus = CallbackBus::new(|| Err(ChannelError::ReadTimeout), |_: &[CanFrame]| Ok(()));
    let start = clock.now();
    let res = verify_silence(&mut bus, &clock, 0, [0x500], Duration::from_millis(1500));
    assert!(matches!(
        res,
        Err(DiagError::ChannelError(ChannelError::ReadTimeout))
    ));
    assert_eq!(clock.now(), start);
}
