//! Taking an ECU off the bus.
//!
//! The ECU is first moved into the extended diagnostic session, then sent a communication
//! control request which stops its normal transmissions. Afterwards, the bus is either watched
//! until the ECU's own messages stop (See [crate::silence]), or a fixed delay is waited out.
//!
//! The whole sequence is retried from the start a bounded number of times.
//!
//! ## Example
//! ```
//! use std::time::Duration;
//! use ecu_disable::{DisableOptions, EcuDisabler, EcuTarget};
//! use ecu_disable::hardware::simulation::{SimClock, SimEcu, SimulatedBus};
//!
//! let clock = SimClock::new();
//! let ecu = SimEcu::uds(0, 0x7D0).with_periodic_frame(0x7D0, Duration::from_millis(20), &[0x00]);
//! let mut bus = SimulatedBus::new(clock.clone()).with_ecu(ecu);
//!
//! let mut options = DisableOptions::new(EcuTarget::new(0x7D0));
//! options.verify_silence_addrs = Some([0x7D0].into_iter().collect());
//!
//! let mut disabler = EcuDisabler::new(options, clock);
//! assert!(disabler.disable(&mut bus));
//! ```

use std::{collections::BTreeSet, time::Duration};

use log::{debug, error, warn};

use crate::{
    DiagError, DiagResult,
    channel::{BusTransport, EcuTarget, IsoTPSettings, QueryEngine},
    clock::{Clock, SystemClock},
    hardware::software_isotp::IsoTpQuery,
    helpers::hex_addresses,
    silence::{SilenceSettings, verify_silence_with},
    uds::{
        CommunicationControlRequest, UdsCommand, check_pos_response_id,
        communication_control_exchange, extended_session_exchange,
    },
};

/// Delay waited after the disable request, when neither silence verification nor
/// an explicit delay was requested
pub const DEFAULT_DISABLE_DELAY: Duration = Duration::from_millis(500);

/// Longest timeout or delay accepted for any one phase of a disable operation
pub const MAX_PHASE_DURATION: Duration = Duration::from_secs(60 * 60);

/// Parameters of a disable operation
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DisableOptions {
    /// Bus the ECU is on
    pub bus: u8,
    /// ECU to disable
    pub target: EcuTarget,
    /// Raw communication control request. Defaults to `28 83 01`
    pub com_cont_request: Vec<u8>,
    /// How long to wait for the extended session response on each attempt
    pub timeout: Duration,
    /// Maximum number of attempts
    pub retry: u32,
    /// Addresses the ECU normally transmits on. If set, these are monitored after the
    /// disable request until they go quiet
    pub verify_silence_addrs: Option<BTreeSet<u32>>,
    /// How long silence verification may take
    pub verify_silence_timeout: Duration,
    /// Delay after the disable request when not verifying silence.
    /// [DEFAULT_DISABLE_DELAY] is used if this is not set either
    pub post_disable_delay: Option<Duration>,
    /// Silence verification debounce
    pub silence: SilenceSettings,
}

impl Default for DisableOptions {
    fn default() -> Self {
        Self {
            bus: 0,
            target: EcuTarget::default(),
            com_cont_request: CommunicationControlRequest::default().to_bytes(),
            timeout: Duration::from_millis(100),
            retry: 10,
            verify_silence_addrs: None,
            verify_silence_timeout: Duration::from_millis(1500),
            post_disable_delay: None,
            silence: SilenceSettings::default(),
        }
    }
}

impl DisableOptions {
    /// Default options for a specific target
    pub fn new(target: EcuTarget) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    /// Monitored addresses, if silence verification is enabled. An empty set counts as disabled
    pub fn silence_addresses(&self) -> Option<&BTreeSet<u32>> {
        self.verify_silence_addrs.as_ref().filter(|a| !a.is_empty())
    }

    /// Checks the options can ever succeed
    pub fn validate(&self) -> DiagResult<()> {
        if self.com_cont_request.is_empty() {
            return Err(DiagError::ParameterInvalid);
        }
        let phases = [
            Some(self.timeout),
            Some(self.verify_silence_timeout),
            self.post_disable_delay,
        ];
        if phases.into_iter().flatten().any(|d| d > MAX_PHASE_DURATION) {
            return Err(DiagError::ParameterInvalid);
        }
        if self.silence_addresses().is_some()
            && self.silence.quiet_duration >= self.verify_silence_timeout
        {
            return Err(DiagError::ParameterInvalid);
        }
        Ok(())
    }
}

/// How the post-disable phase of a [DisableOutcome] ended
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SilenceCheck {
    /// The ECU was never disabled
    NotReached,
    /// The ECU went quiet
    Confirmed,
    /// The ECU was still transmitting when verification timed out
    TimedOut,
    /// No verification was done, a fixed delay was waited instead
    FixedDelay(Duration),
}

/// Result of [EcuDisabler::run]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DisableOutcome {
    /// Communication control was sent after a successful session change
    pub disabled: bool,
    /// Attempts made
    pub attempts: u32,
    /// Post-disable phase
    pub silence: SilenceCheck,
}

/// Disables an ECU over a [QueryEngine]
#[derive(Debug)]
pub struct EcuDisabler<Q: QueryEngine, C: Clock> {
    options: DisableOptions,
    query: Q,
    clock: C,
}

impl<C: Clock + Clone> EcuDisabler<IsoTpQuery<C>, C> {
    /// Creates a disabler using the software ISO-TP query engine with default settings
    pub fn new(options: DisableOptions, clock: C) -> Self {
        let query = IsoTpQuery::new(IsoTPSettings::default(), clock.clone());
        Self::with_query_engine(options, query, clock)
    }
}

impl<Q: QueryEngine, C: Clock> EcuDisabler<Q, C> {
    /// Creates a disabler with a custom query engine
    pub fn with_query_engine(options: DisableOptions, query: Q, clock: C) -> Self {
        Self {
            options,
            query,
            clock,
        }
    }

    /// Returns the disable options
    pub fn options(&self) -> &DisableOptions {
        &self.options
    }

    /// Disables the ECU. Returns true if communication control was sent
    pub fn disable<T: BusTransport>(&mut self, transport: &mut T) -> bool {
        self.run(transport).disabled
    }

    /// Disables the ECU, returning the full outcome
    pub fn run<T: BusTransport>(&mut self, transport: &mut T) -> DisableOutcome {
        let target = self.options.target;
        warn!("ecu disable {target} ...");

        if let Err(e) = self.options.validate() {
            error!("ecu disable options rejected: {e}");
            return DisableOutcome {
                disabled: false,
                attempts: 0,
                silence: SilenceCheck::NotReached,
            };
        }

        for attempt in 1..=self.options.retry {
            match self.attempt(transport) {
                Ok(silence) => {
                    return DisableOutcome {
                        disabled: true,
                        attempts: attempt,
                        silence,
                    };
                }
                Err(DiagError::EmptyResponse) => debug!("No response from {target}"),
                Err(e) => error!("ecu disable exception: {e}"),
            }
            error!("ecu disable retry ({attempt}) ...");
        }
        error!("ecu disable failed");
        DisableOutcome {
            disabled: false,
            attempts: self.options.retry,
            silence: SilenceCheck::NotReached,
        }
    }

    fn attempt<T: BusTransport>(&mut self, transport: &mut T) -> DiagResult<SilenceCheck> {
        self.request_extended_session(transport)?;

        warn!("communication control disable tx/rx ...");
        self.query.query(
            transport,
            self.options.bus,
            &[self.options.target],
            &[communication_control_exchange(&self.options.com_cont_request)],
            Duration::ZERO,
        )?;
        warn!("ecu disabled");

        self.confirm_silence(transport)
    }

    fn request_extended_session<T: BusTransport>(&mut self, transport: &mut T) -> DiagResult<()> {
        let mut results = self.query.query(
            transport,
            self.options.bus,
            &[self.options.target],
            &[extended_session_exchange()],
            self.options.timeout,
        )?;
        let response = results
            .remove(&self.options.target)
            .ok_or(DiagError::EmptyResponse)??;
        check_pos_response_id(UdsCommand::DiagnosticSessionControl as u8, &response)
    }

    fn confirm_silence<T: BusTransport>(&mut self, transport: &mut T) -> DiagResult<SilenceCheck> {
        match self.options.silence_addresses() {
            Some(addrs) => {
                let timeout = self.options.verify_silence_timeout;
                warn!(
                    "verifying ECU silence on addrs {} ...",
                    hex_addresses(addrs)
                );
                let quiet = verify_silence_with(
                    transport,
                    &self.clock,
                    self.options.bus,
                    addrs.iter().copied(),
                    timeout,
                    &self.options.silence,
                )?;
                if quiet {
                    warn!("ECU silence verified");
                    Ok(SilenceCheck::Confirmed)
                } else {
                    warn!(
                        "ECU silence verification timed out after {timeout:?}, proceeding anyway"
                    );
                    Ok(SilenceCheck::TimedOut)
                }
            }
            None => {
                let delay = self
                    .options
                    .post_disable_delay
                    .unwrap_or(DEFAULT_DISABLE_DELAY);
                warn!("waiting {delay:?} for ECU to stop transmitting ...");
                self.clock.sleep(delay);
                Ok(SilenceCheck::FixedDelay(delay))
            }
        }
    }
}

/// Disables an ECU in real time, using the software ISO-TP query engine.
///
/// Returns true if the ECU accepted the extended session and communication control was sent.
/// Errors are only reported through the log.
pub fn disable_ecu<T: BusTransport>(transport: &mut T, options: DisableOptions) -> bool {
    EcuDisabler::new(options, SystemClock).disable(transport)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        channel::{CanFrame, ChannelResult, QueryResults},
        hardware::simulation::SimClock,
        uds::DiagnosticExchange,
    };

    /// Query engine returning scripted results, recording every request
    struct ScriptedQuery {
        session_results: Vec<DiagResult<QueryResults>>,
        requests: Vec<(Vec<u8>, Duration)>,
    }

    impl QueryEngine for ScriptedQuery {
        fn query(
            &mut self,
            _transport: &mut dyn BusTransport,
            _bus: u8,
            _targets: &[EcuTarget],
            exchanges: &[DiagnosticExchange],
            timeout: Duration,
        ) -> DiagResult<QueryResults> {
            self.requests
                .push((exchanges[0].request_payload.clone(), timeout));
            if timeout.is_zero() {
                return Ok(QueryResults::new());
            }
            if self.session_results.is_empty() {
                Ok(QueryResults::new())
            } else {
                self.session_results.remove(0)
            }
        }
    }

    struct NullBus;

    impl BusTransport for NullBus {
        fn receive_batch(&mut self) -> ChannelResult<Vec<CanFrame>> {
            Ok(Vec::new())
        }

        fn send(&mut self, _frames: &[CanFrame]) -> ChannelResult<()> {
            Ok(())
        }
    }

    fn answered(target: EcuTarget, resp: DiagResult<Vec<u8>>) -> DiagResult<QueryResults> {
        let mut map = HashMap::new();
        map.insert(target, resp);
        Ok(map)
    }

    fn disabler(
        options: DisableOptions,
        session_results: Vec<DiagResult<QueryResults>>,
    ) -> EcuDisabler<ScriptedQuery, SimClock> {
        let query = ScriptedQuery {
            session_results,
            requests: Vec::new(),
        };
        EcuDisabler::with_query_engine(options, query, SimClock::new())
    }

    #[test]
    fn default_options() {
        let options = DisableOptions::default();
        assert_eq!(options.target, EcuTarget::new(0x7D0));
        assert_eq!(options.com_cont_request, vec![0x28, 0x83, 0x01]);
        assert_eq!(options.timeout, Duration::from_millis(100));
        assert_eq!(options.retry, 10);
        assert_eq!(options.verify_silence_timeout, Duration::from_millis(1500));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn quiet_period_must_fit_in_verification_timeout() {
        let mut options = DisableOptions {
            verify_silence_addrs: Some([0x7D0].into_iter().collect()),
            verify_silence_timeout: Duration::from_millis(300),
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(DiagError::ParameterInvalid)
        ));
        // Not verifying, so the timeout is irrelevant
        options.verify_silence_addrs = Some(BTreeSet::new());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        let options = DisableOptions {
            timeout: Duration::MAX,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(DiagError::ParameterInvalid)
        ));
        let options = DisableOptions {
            post_disable_delay: Some(MAX_PHASE_DURATION + Duration::from_millis(1)),
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(DiagError::ParameterInvalid)
        ));
        let options = DisableOptions {
            verify_silence_timeout: MAX_PHASE_DURATION,
            ..Default::default()
        };
        assert!(options.validate().is_ok());

        let mut d = disabler(
            DisableOptions {
                timeout: Duration::MAX,
                ..Default::default()
            },
            Vec::new(),
        );
        let outcome = d.run(&mut NullBus);
        assert!(!outcome.disabled);
        assert_eq!(outcome.attempts, 0);
        assert!(d.query.requests.is_empty());
    }

    #[test]
    fn disable_sequence() {
        let target = EcuTarget::new(0x7D0);
        let mut d = disabler(
            DisableOptions::new(target),
            vec![answered(target, Ok(vec![0x50, 0x03]))],
        );
        let outcome = d.run(&mut NullBus);
        assert_eq!(
            outcome,
            DisableOutcome {
                disabled: true,
                attempts: 1,
                silence: SilenceCheck::FixedDelay(DEFAULT_DISABLE_DELAY)
            }
        );
        assert_eq!(
            d.query.requests,
            vec![
                (vec![0x10, 0x03], Duration::from_millis(100)),
                (vec![0x28, 0x83, 0x01], Duration::ZERO)
            ]
        );
        assert_eq!(d.clock.elapsed(), DEFAULT_DISABLE_DELAY);
    }

    #[test]
    fn failed_handshakes_are_retried() {
        let target = EcuTarget::new(0x7D0);
        let mut options = DisableOptions::new(target);
        options.retry = 5;
        options.post_disable_delay = Some(Duration::from_millis(50));
        let mut d = disabler(
            options,
            vec![
                Ok(QueryResults::new()),
                answered(
                    target,
                    Err(DiagError::ECUError {
                        code: 0x22,
                        def: None,
                    }),
                ),
                Err(DiagError::ChannelError(
                    crate::channel::ChannelError::WriteTimeout,
                )),
                answered(target, Ok(vec![0x7E, 0x00])),
                answered(target, Ok(vec![0x50, 0x03])),
            ],
        );
        let outcome = d.run(&mut NullBus);
        assert!(outcome.disabled);
        assert_eq!(outcome.attempts, 5);
        assert_eq!(
            outcome.silence,
            SilenceCheck::FixedDelay(Duration::from_millis(50))
        );
        let comm_controls = d
            .query
            .requests
            .iter()
            .filter(|(req, _)| req[0] == 0x28)
            .count();
        assert_eq!(comm_controls, 1);
    }

    #[test]
    fn exhausted_retries() {
        let mut options = DisableOptions::default();
        options.retry = 3;
        let mut d = disabler(options, Vec::new());
        let outcome = d.run(&mut NullBus);
        assert_eq!(
            outcome,
            DisableOutcome {
                disabled: false,
                attempts: 3,
                silence: SilenceCheck::NotReached
            }
        );
        assert_eq!(d.query.requests.len(), 3);
    }

    #[test]
    fn zero_retries_never_queries() {
        let mut options = DisableOptions::default();
        options.retry = 0;
        let mut d = disabler(options, Vec::new());
        assert!(!d.disable(&mut NullBus));
        assert!(d.query.requests.is_empty());
    }
}
