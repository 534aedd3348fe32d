//! The device context and its boot-to-restart state machine.
//!
//! ```text
//! ResetGate --not held / released--> load credentials
//!   not provisioned --------------------------> Provisioning
//!   provisioned --> Joining --connected-------> Connected (heartbeats)
//!                   Joining --timed out-------> Provisioning
//! ResetGate --held >= threshold--> clear store --> Restarting
//! Provisioning --saved submission-------------> restart
//! ```
//!
//! [`Device::tick`] advances one step and never blocks. A restart is the only
//! way to leave Provisioning or Connected; the caller rebuilds the device.

use crate::clock::Clock;
use crate::config::{Credentials, DeviceConfig};
use crate::heartbeat::{self, HeartbeatOutcome, HeartbeatScheduler, HeartbeatTransport};
use crate::network::{JoinAttempt, JoinPoll, NetworkProvider};
use crate::portal::{PortalHandler, PortalPoll, ProvisioningController, Reply, Request, Response};
use crate::reset::{FactoryResetMonitor, HoldState, ResetButton};
use crate::storage::CredentialStore;
use log::{debug, error, info, warn};
use std::net::Ipv4Addr;

/// Delay between clearing the store and restarting.
pub const FACTORY_RESET_RESTART_MS: u64 = 100;

/// Delay before restarting when the access point cannot be started.
pub const AP_FAILURE_RESTART_MS: u64 = 5_000;

/// Externally visible mode, once the boot decision has been made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Provisioning,
    Connected,
}

/// What the caller should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// Restart the device (or rebuild it, on a host).
    Restart,
}

/// Boot phase.
#[derive(Debug)]
pub enum Phase {
    /// Sampling the reset button before anything else.
    ResetGate(FactoryResetMonitor),
    /// Joining with stored credentials.
    Joining(JoinAttempt),
    /// Serving the setup portal.
    Provisioning(ProvisioningController),
    /// Joined; sending heartbeats.
    Connected(HeartbeatScheduler),
    /// Waiting to restart.
    Restarting { at_ms: u64 },
}

enum Transition {
    Stay,
    PassGate,
    FactoryReset,
    Joined,
    JoinFailed,
    Restart,
}

/// Owns every collaborator and the current [`Phase`].
pub struct Device<S, N, B, T, C> {
    config: DeviceConfig,
    store: S,
    network: N,
    button: B,
    transport: T,
    clock: C,
    credentials: Credentials,
    phase: Phase,
    /// Last reconnect attempt while connected mode has no link.
    reconnect_ms: Option<u64>,
}

impl<S, N, B, T, C> Device<S, N, B, T, C>
where
    S: CredentialStore,
    N: NetworkProvider,
    B: ResetButton,
    T: HeartbeatTransport,
    C: Clock,
{
    /// Create a device at the start of boot.
    pub fn new(config: DeviceConfig, store: S, network: N, button: B, transport: T, clock: C) -> Self {
        let monitor = FactoryResetMonitor::new(config.factory_hold_ms);
        Self {
            config,
            store,
            network,
            button,
            transport,
            clock,
            credentials: Credentials::default(),
            phase: Phase::ResetGate(monitor),
            reconnect_ms: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// `None` until the boot decision has been made.
    pub fn mode(&self) -> Option<DeviceMode> {
        match self.phase {
            Phase::Provisioning(_) => Some(DeviceMode::Provisioning),
            Phase::Connected(_) => Some(DeviceMode::Connected),
            _ => None,
        }
    }

    /// Address of the setup access point while provisioning.
    pub fn portal_address(&self) -> Option<Ipv4Addr> {
        match &self.phase {
            Phase::Provisioning(controller) => Some(controller.address()),
            _ => None,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Credentials loaded at boot.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Credential store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Network provider.
    pub fn network(&self) -> &N {
        &self.network
    }

    /// Advance one step.
    pub fn tick(&mut self) -> Control {
        let now = self.clock.now_ms();

        let transition = match &mut self.phase {
            Phase::ResetGate(monitor) => {
                let was = monitor.state();
                match monitor.poll(self.button.is_active(), now) {
                    HoldState::Idle => Transition::PassGate,
                    HoldState::Holding { .. } => {
                        if was == HoldState::Idle {
                            warn!(
                                "Reset button held, keep holding for {} s to factory reset",
                                self.config.factory_hold_ms / 1000
                            );
                        }
                        Transition::Stay
                    }
                    HoldState::Triggered => Transition::FactoryReset,
                }
            }
            Phase::Joining(attempt) => match attempt.poll(&mut self.network, now) {
                JoinPoll::Pending => Transition::Stay,
                JoinPoll::Connected => Transition::Joined,
                JoinPoll::TimedOut => Transition::JoinFailed,
            },
            Phase::Provisioning(controller) => {
                match controller.poll(&mut self.store, &mut self.network, now) {
                    PortalPoll::Serving => Transition::Stay,
                    PortalPoll::Restart => Transition::Restart,
                }
            }
            Phase::Connected(scheduler) => {
                maintain_link(
                    &mut self.network,
                    &mut self.reconnect_ms,
                    now,
                    self.config.reconnect_interval_ms,
                );
                if scheduler.poll(now) {
                    let outcome = heartbeat::dispatch(
                        &self.credentials.endpoint,
                        &self.config.device_tag,
                        now,
                        &self.network,
                        &mut self.transport,
                    );
                    if let HeartbeatOutcome::Skipped(reason) = outcome {
                        debug!("Heartbeat skipped: {:?}", reason);
                    }
                }
                Transition::Stay
            }
            Phase::Restarting { at_ms } => {
                if now >= *at_ms {
                    Transition::Restart
                } else {
                    Transition::Stay
                }
            }
        };

        match transition {
            Transition::Stay => {}
            Transition::PassGate => self.boot(now),
            Transition::FactoryReset => {
                warn!("Factory reset requested, clearing credentials and restarting");
                if let Err(e) = self.store.clear() {
                    error!("Failed to clear credentials: {}", e);
                }
                self.phase = Phase::Restarting {
                    at_ms: now + FACTORY_RESET_RESTART_MS,
                };
            }
            Transition::Joined => {
                info!(
                    "Connected. IP: {}",
                    self.network
                        .ip_addr()
                        .map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
                );
                self.phase = Phase::Connected(HeartbeatScheduler::new(
                    self.config.heartbeat_interval_ms,
                    now,
                ));
            }
            Transition::JoinFailed => {
                warn!(
                    "Could not join '{}' within {} ms, entering setup mode",
                    self.credentials.ssid, self.config.boot_join_timeout_ms
                );
                self.network.abort_join();
                self.enter_provisioning(now);
            }
            Transition::Restart => return Control::Restart,
        }
        Control::Continue
    }

    fn boot(&mut self, now_ms: u64) {
        self.credentials = self.store.load();
        if !self.credentials.is_provisioned() {
            info!("No credentials/API found, entering setup mode");
            self.enter_provisioning(now_ms);
            return;
        }

        info!("Connecting to SSID: {}", self.credentials.ssid);
        match JoinAttempt::start(
            &mut self.network,
            self.credentials.clone(),
            now_ms,
            self.config.boot_join_timeout_ms,
        ) {
            Ok(attempt) => self.phase = Phase::Joining(attempt),
            Err(e) => {
                warn!("Could not start join: {}, entering setup mode", e);
                self.enter_provisioning(now_ms);
            }
        }
    }

    fn enter_provisioning(&mut self, now_ms: u64) {
        match self.network.start_access_point(&self.config.access_point) {
            Ok(address) => {
                info!("Setup portal running at http://{}", address);
                self.phase = Phase::Provisioning(ProvisioningController::new(address, &self.config));
            }
            Err(e) => {
                error!("Could not start access point: {}", e);
                self.phase = Phase::Restarting {
                    at_ms: now_ms + AP_FAILURE_RESTART_MS,
                };
            }
        }
    }
}

/// Ask the driver to rejoin when the link is down, at most once per `interval_ms`.
fn maintain_link<N: NetworkProvider>(
    network: &mut N,
    last_attempt_ms: &mut Option<u64>,
    now_ms: u64,
    interval_ms: u64,
) {
    if network.is_connected() {
        if last_attempt_ms.take().is_some() {
            info!("Link restored");
        }
        return;
    }
    match *last_attempt_ms {
        None => warn!("Link lost, reconnecting"),
        Some(at) if now_ms.saturating_sub(at) < interval_ms => return,
        Some(_) => debug!("Still no link, reconnecting"),
    }
    *last_attempt_ms = Some(now_ms);
    if let Err(e) = network.reconnect() {
        warn!("Reconnect failed: {}", e);
    }
}

impl<S, N, B, T, C> PortalHandler for Device<S, N, B, T, C>
where
    S: CredentialStore,
    N: NetworkProvider,
    B: ResetButton,
    T: HeartbeatTransport,
    C: Clock,
{
    fn handle(&mut self, request: &Request) -> Reply {
        let now = self.clock.now_ms();
        match &mut self.phase {
            Phase::Provisioning(controller) => controller.handle(request, &mut self.network, now),
            _ => Reply::Now(Response::text(503, "setup portal not active")),
        }
    }

    fn take_deferred_response(&mut self) -> Option<Response> {
        match &mut self.phase {
            Phase::Provisioning(controller) => controller.take_deferred_response(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::heartbeat::{RecordingTransport, TransportError};
    use crate::network::SimNetwork;
    use crate::reset::StaticButton;
    use crate::storage::MemoryStore;

    type TestDevice = Device<MemoryStore, SimNetwork, StaticButton, RecordingTransport, ManualClock>;

    const STEP_MS: u64 = 10;

    struct Rig {
        clock: ManualClock,
        net: SimNetwork,
        store: MemoryStore,
        button: StaticButton,
        transport: RecordingTransport,
    }

    impl Rig {
        fn new(store: MemoryStore) -> Self {
            let clock = ManualClock::new();
            let mut net = SimNetwork::new(clock.clone());
            net.add_network("Home", "secret", -42, 5_000);
            Self {
                clock,
                net,
                store,
                button: StaticButton::released(),
                transport: RecordingTransport::new(),
            }
        }

        /// A fresh boot sharing the same store, radio and clock.
        fn boot(&self) -> TestDevice {
            self.net.state().joining = None;
            self.net.state().connected = None;
            Device::new(
                DeviceConfig::default(),
                self.store.clone(),
                self.net.clone(),
                self.button.clone(),
                self.transport.clone(),
                self.clock.clone(),
            )
        }

        /// Tick every `STEP_MS` for `ms`; stops early on restart.
        fn run(&self, device: &mut TestDevice, ms: u64) -> Control {
            let end = self.clock.now_ms() + ms;
            loop {
                if device.tick() == Control::Restart {
                    return Control::Restart;
                }
                if self.clock.now_ms() >= end {
                    return Control::Continue;
                }
                self.clock.advance(STEP_MS);
            }
        }
    }

    fn home() -> Credentials {
        Credentials::new("Home", "secret", "https://x/hb")
    }

    fn local(request: Request) -> Request {
        request.with_host("192.168.4.1")
    }

    fn immediate(reply: Reply) -> Response {
        match reply {
            Reply::Now(response) => response,
            Reply::Deferred => panic!("expected immediate reply"),
        }
    }

    #[test]
    fn test_empty_store_boots_into_provisioning() {
        let rig = Rig::new(MemoryStore::new());
        let mut device = rig.boot();
        assert_eq!(device.mode(), None);

        device.tick();
        assert_eq!(device.mode(), Some(DeviceMode::Provisioning));
        assert_eq!(device.portal_address(), Some(Ipv4Addr::new(192, 168, 4, 1)));
        assert!(rig.net.join_log().is_empty());
        assert_eq!(rig.net.state().access_point_starts, 1);

        let page = immediate(device.handle(&local(Request::get("/"))));
        assert_eq!(page.status, 200);
        assert!(page.body.contains("<form"));
    }

    #[test]
    fn test_partial_record_never_joins() {
        for partial in [
            Credentials::new("Home", "secret", ""),
            Credentials::new("", "secret", "https://x/hb"),
        ] {
            let rig = Rig::new(MemoryStore::with(partial));
            let mut device = rig.boot();
            rig.run(&mut device, 1_000);
            assert_eq!(device.mode(), Some(DeviceMode::Provisioning));
            assert!(rig.net.join_log().is_empty());
        }
    }

    #[test]
    fn test_submission_persists_restarts_and_rejoins() {
        let rig = Rig::new(MemoryStore::new());
        let mut device = rig.boot();
        device.tick();

        let reply = device.handle(&local(Request::post(
            "/save",
            "ssid=Home&pass=secret&api=https%3A%2F%2Fx%2Fhb",
        )));
        assert_eq!(reply, Reply::Deferred);

        // Joined after 5 s; not saved a tick earlier
        rig.run(&mut device, 4_990);
        assert_eq!(rig.store.write_count(), 0);
        rig.run(&mut device, 10);
        assert_eq!(rig.store.load(), home());

        let page = device.take_deferred_response().unwrap();
        assert!(page.body.contains("Connected!"));
        assert_eq!(device.mode(), Some(DeviceMode::Provisioning));
        assert_eq!(rig.run(&mut device, 1_000), Control::Restart);

        // Next boot joins with exactly the saved values
        let mut device = rig.boot();
        device.tick();
        assert!(matches!(device.phase(), Phase::Joining(_)));
        assert_eq!(rig.net.join_log().last(), Some(&home()));

        rig.run(&mut device, 5_000);
        assert_eq!(device.mode(), Some(DeviceMode::Connected));
    }

    #[test]
    fn test_failed_submission_keeps_prior_record() {
        let prior = Credentials::new("Old", "oldpass", "");
        let rig = Rig::new(MemoryStore::with(prior.clone()));
        let mut device = rig.boot();
        device.tick();

        assert_eq!(
            device.handle(&local(Request::post(
                "/save",
                "ssid=Home&pass=wrong&api=https%3A%2F%2Fx%2Fhb",
            ))),
            Reply::Deferred
        );
        rig.run(&mut device, 19_990);
        assert!(device.take_deferred_response().is_none());
        rig.run(&mut device, 10);

        let page = device.take_deferred_response().unwrap();
        assert!(page.body.contains("Failed to connect."));
        assert_eq!(rig.store.load(), prior);
        assert_eq!(device.mode(), Some(DeviceMode::Provisioning));
        assert_eq!(rig.run(&mut device, 60_000), Control::Continue);
    }

    #[test]
    fn test_malformed_submission_is_client_error() {
        let rig = Rig::new(MemoryStore::with(Credentials::new("Old", "", "")));
        let mut device = rig.boot();
        device.tick();

        for body in [
            "ssid=&pass=secret&api=https%3A%2F%2Fx%2Fhb",
            "ssid=Home&pass=secret&api=",
            "pass=secret",
        ] {
            let response = immediate(device.handle(&local(Request::post("/save", body))));
            assert_eq!(response.status, 400, "{}", body);
        }
        assert!(rig.net.join_log().is_empty());
        assert_eq!(rig.store.load(), Credentials::new("Old", "", ""));
    }

    #[test]
    fn test_boot_join_timeout_falls_back_without_clearing() {
        let stale = Credentials::new("Home", "changed", "https://x/hb");
        let rig = Rig::new(MemoryStore::with(stale.clone()));
        let mut device = rig.boot();
        device.tick();
        assert!(matches!(device.phase(), Phase::Joining(_)));

        rig.run(&mut device, 29_990);
        assert!(matches!(device.phase(), Phase::Joining(_)));
        rig.run(&mut device, 10);
        assert_eq!(device.mode(), Some(DeviceMode::Provisioning));
        assert_eq!(rig.store.load(), stale);
        assert_eq!(rig.store.write_count(), 0);
    }

    #[test]
    fn test_heartbeat_request_and_cadence() {
        let rig = Rig::new(MemoryStore::with(home()));
        rig.net.state().networks[0].latency_ms = 0;
        rig.clock.set(63_456);
        let mut device = rig.boot();
        device.tick();
        device.tick();
        assert_eq!(device.mode(), Some(DeviceMode::Connected));

        rig.transport.respond_with(Ok(500));
        rig.clock.set(123_455);
        device.tick();
        assert!(rig.transport.requests().is_empty());

        rig.clock.set(123_456);
        device.tick();
        assert_eq!(
            rig.transport.requests(),
            vec![(
                "https://x/hb?device=ESP32&ip=10.0.0.5&rssi=-42&uptime_ms=123456".to_string(),
                true
            )]
        );

        // Failures do not change the cadence
        rig.transport.respond_with(Err(TransportError::Connect("refused".into())));
        rig.run(&mut device, 59_990);
        assert_eq!(rig.transport.requests().len(), 1);
        rig.run(&mut device, 10);
        assert_eq!(rig.transport.requests().len(), 2);
        rig.run(&mut device, 60_000);
        assert_eq!(rig.transport.requests().len(), 3);
        assert_eq!(device.mode(), Some(DeviceMode::Connected));
    }

    #[test]
    fn test_heartbeat_skipped_while_link_down() {
        let rig = Rig::new(MemoryStore::with(home()));
        rig.net.state().networks[0].latency_ms = 0;
        let mut device = rig.boot();
        device.tick();
        device.tick();

        rig.net.set_in_range("Home", false);
        rig.run(&mut device, 120_000);
        assert!(rig.transport.requests().is_empty());
        assert_eq!(device.mode(), Some(DeviceMode::Connected));
    }

    #[test]
    fn test_link_restored_after_drop_resumes_heartbeats() {
        let rig = Rig::new(MemoryStore::with(home()));
        rig.net.state().networks[0].latency_ms = 2_000;
        let mut device = rig.boot();
        rig.run(&mut device, 2_000);
        assert_eq!(device.mode(), Some(DeviceMode::Connected));

        // Router goes away: first retry right away, then one per interval
        rig.net.set_in_range("Home", false);
        rig.run(&mut device, 90_000);
        assert!(rig.transport.requests().is_empty());
        assert_eq!(rig.net.state().reconnects, 10);

        rig.net.set_in_range("Home", true);
        rig.run(&mut device, 60_000);
        assert!(rig.net.is_connected());
        assert!(!rig.transport.requests().is_empty());
        assert_eq!(rig.net.join_log().len(), 1);
        assert_eq!(device.mode(), Some(DeviceMode::Connected));
    }

    #[test]
    fn test_dropped_link_rejoined_by_reconnect() {
        let rig = Rig::new(MemoryStore::with(home()));
        rig.net.state().networks[0].latency_ms = 0;
        let mut device = rig.boot();
        device.tick();
        device.tick();

        rig.net.drop_link();
        assert!(!rig.net.is_connected());
        device.tick();
        assert_eq!(rig.net.state().reconnects, 1);
        assert!(rig.net.is_connected());
    }

    #[test]
    fn test_factory_reset_after_full_hold() {
        let mut rig = Rig::new(MemoryStore::with(home()));
        rig.button = StaticButton::held();
        let mut device = rig.boot();

        rig.run(&mut device, 29_990);
        assert!(matches!(device.phase(), Phase::ResetGate(_)));
        assert_eq!(rig.store.load(), home());

        assert_eq!(rig.run(&mut device, 1_000), Control::Restart);
        assert_eq!(rig.store.load(), Credentials::default());
        assert!(rig.net.join_log().is_empty());
    }

    #[test]
    fn test_short_hold_then_release_boots_normally() {
        let mut rig = Rig::new(MemoryStore::with(home()));
        rig.button = StaticButton::held();
        let mut device = rig.boot();

        rig.run(&mut device, 29_990);
        rig.button.set_active(false);
        rig.run(&mut device, 10);
        assert!(matches!(device.phase(), Phase::Joining(_)));
        assert_eq!(rig.store.load(), home());
    }

    #[test]
    fn test_access_point_failure_restarts() {
        let rig = Rig::new(MemoryStore::new());
        rig.net.state().fail_access_point = true;
        let mut device = rig.boot();
        device.tick();
        assert!(matches!(device.phase(), Phase::Restarting { .. }));
        assert_eq!(rig.run(&mut device, AP_FAILURE_RESTART_MS), Control::Restart);
    }

    #[test]
    fn test_portal_inactive_when_connected() {
        let rig = Rig::new(MemoryStore::with(home()));
        rig.net.state().networks[0].latency_ms = 0;
        let mut device = rig.boot();
        device.tick();
        device.tick();

        let response = immediate(device.handle(&Request::get("/")));
        assert_eq!(response.status, 503);
        assert!(device.take_deferred_response().is_none());
        assert_eq!(device.portal_address(), None);
    }
}
