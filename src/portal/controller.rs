//! Provisioning controller.
//!
//! ```text
//! ServingPortal --valid POST /save--> Validating(JoinAttempt)
//! Validating --joined, saved--> Rebooting { at_ms } (terminal)
//! Validating --timed out / save failed--> ServingPortal
//! ```
//!
//! The answer to a submission is not known when the request arrives. The
//! controller returns [`Reply::Deferred`] and the server parks the request
//! until [`ProvisioningController::take_deferred_response`] yields the page.

use super::form::{self, Submission};
use super::http::{Action, Method, PortalView, Request, Response, Router};
use super::page;
use crate::config::DeviceConfig;
use crate::network::{JoinAttempt, JoinPoll, NetworkProvider, ScanEntry};
use crate::storage::CredentialStore;
use log::{error, info, warn};
use std::net::Ipv4Addr;

/// Controller state.
#[derive(Debug)]
pub enum PortalState {
    /// Waiting for a submission.
    ServingPortal,
    /// Trying the submitted credentials.
    Validating(JoinAttempt),
    /// Saved; restart once `at_ms` is reached.
    Rebooting { at_ms: u64 },
}

/// How a request was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send this now.
    Now(Response),
    /// Hold the request; the response comes from `take_deferred_response`.
    Deferred,
}

/// Result of [`ProvisioningController::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalPoll {
    /// Keep serving.
    Serving,
    /// The restart delay after a successful submission has passed.
    Restart,
}

/// Runs the setup portal while the device is its own access point.
#[derive(Debug)]
pub struct ProvisioningController {
    address: Ipv4Addr,
    port: u16,
    join_timeout_ms: u64,
    scan_cache_ms: u64,
    restart_grace_ms: u64,
    router: Router,
    state: PortalState,
    scan_cache: Option<(u64, Vec<ScanEntry>)>,
    deferred: Option<Response>,
}

fn serve_page(_request: &Request, view: &PortalView<'_>) -> Action {
    Action::Respond(Response::html(200, page::config_page(view.networks)))
}

fn save(request: &Request, _view: &PortalView<'_>) -> Action {
    match form::submission_from(&request.body, &request.query) {
        Ok(submission) => Action::Validate(submission),
        Err(e) => {
            warn!("Rejected submission: {}", e);
            Action::Respond(Response::text(400, &e.to_string()))
        }
    }
}

/// Routing table of the portal. Unmatched requests get the setup page.
pub fn portal_router() -> Router {
    Router::new(serve_page, true)
        .route(Method::Get, "/", true, serve_page)
        .route(Method::Post, "/save", false, save)
}

impl ProvisioningController {
    /// Create a controller for an access point reachable at `address`.
    pub fn new(address: Ipv4Addr, config: &DeviceConfig) -> Self {
        Self {
            address,
            port: config.http_port,
            join_timeout_ms: config.provisioning_join_timeout_ms,
            scan_cache_ms: config.scan_cache_ms,
            restart_grace_ms: config.restart_grace_ms,
            router: portal_router(),
            state: PortalState::ServingPortal,
            scan_cache: None,
            deferred: None,
        }
    }

    /// Access point address.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Current state.
    pub fn state(&self) -> &PortalState {
        &self.state
    }

    /// True while a submission is being tried.
    pub fn is_validating(&self) -> bool {
        matches!(self.state, PortalState::Validating(_))
    }

    /// Answer one request.
    pub fn handle<N: NetworkProvider + ?Sized>(
        &mut self,
        request: &Request,
        network: &mut N,
        now_ms: u64,
    ) -> Reply {
        let base = PortalView {
            address: self.address,
            port: self.port,
            networks: &[],
        };
        if !base.is_local(request) {
            return Reply::Now(Response::redirect(&base.base_url()));
        }

        let route = *self.router.lookup(request);
        let networks = if route.scans {
            self.networks(network, now_ms)
        } else {
            Vec::new()
        };
        let view = PortalView {
            networks: &networks,
            ..base
        };

        match (route.handler)(request, &view) {
            Action::Respond(response) => Reply::Now(response),
            Action::Validate(submission) => self.begin_validation(submission, network, now_ms),
        }
    }

    /// Advance a running validation or the restart delay.
    pub fn poll<S, N>(&mut self, store: &mut S, network: &mut N, now_ms: u64) -> PortalPoll
    where
        S: CredentialStore + ?Sized,
        N: NetworkProvider + ?Sized,
    {
        let outcome = match &self.state {
            PortalState::ServingPortal => return PortalPoll::Serving,
            PortalState::Rebooting { at_ms } => {
                return if now_ms >= *at_ms {
                    PortalPoll::Restart
                } else {
                    PortalPoll::Serving
                };
            }
            PortalState::Validating(attempt) => attempt.poll(network, now_ms),
        };
        if outcome == JoinPoll::Pending {
            return PortalPoll::Serving;
        }

        let PortalState::Validating(attempt) =
            std::mem::replace(&mut self.state, PortalState::ServingPortal)
        else {
            return PortalPoll::Serving;
        };
        let credentials = attempt.into_credentials();

        if outcome == JoinPoll::TimedOut {
            warn!(
                "Could not join '{}' within {} ms, staying in setup mode",
                credentials.ssid, self.join_timeout_ms
            );
            network.abort_join();
            self.deferred = Some(Response::html(200, page::failure_page()));
            return PortalPoll::Serving;
        }

        match store.save(&credentials) {
            Ok(()) => {
                let ip = network.ip_addr();
                info!("Joined '{}' (IP {:?}), credentials saved", credentials.ssid, ip);
                self.deferred = Some(Response::html(200, page::success_page(ip)));
                self.state = PortalState::Rebooting {
                    at_ms: now_ms + self.restart_grace_ms,
                };
            }
            Err(e) => {
                error!("Joined '{}' but saving failed: {}", credentials.ssid, e);
                network.abort_join();
                self.deferred = Some(Response::html(500, page::store_error_page(&e.to_string())));
            }
        }
        PortalPoll::Serving
    }

    /// Response for the request parked by the last [`Reply::Deferred`], once known.
    pub fn take_deferred_response(&mut self) -> Option<Response> {
        self.deferred.take()
    }

    fn begin_validation<N: NetworkProvider + ?Sized>(
        &mut self,
        submission: Submission,
        network: &mut N,
        now_ms: u64,
    ) -> Reply {
        if !matches!(self.state, PortalState::ServingPortal) || self.deferred.is_some() {
            return Reply::Now(Response::text(503, "validation in progress"));
        }

        info!("Validating submission: {:?}", submission.credentials);
        match JoinAttempt::start(
            network,
            submission.credentials,
            now_ms,
            self.join_timeout_ms,
        ) {
            Ok(attempt) => {
                self.state = PortalState::Validating(attempt);
                Reply::Deferred
            }
            Err(e) => {
                warn!("Could not start join: {}", e);
                Reply::Now(Response::html(200, page::failure_page()))
            }
        }
    }

    /// Scan results, refreshed when the cache is older than the scan cache window.
    ///
    /// No scan is started while a submission is being tried.
    fn networks<N: NetworkProvider + ?Sized>(&mut self, network: &mut N, now_ms: u64) -> Vec<ScanEntry> {
        let fresh = self
            .scan_cache
            .as_ref()
            .is_some_and(|(at, _)| now_ms.saturating_sub(*at) < self.scan_cache_ms);
        if fresh || self.is_validating() {
            return self
                .scan_cache
                .as_ref()
                .map(|(_, networks)| networks.clone())
                .unwrap_or_default();
        }

        match network.scan() {
            Ok(networks) => {
                info!("Scan found {} networks", networks.len());
                self.scan_cache = Some((now_ms, networks.clone()));
                networks
            }
            Err(e) => {
                warn!("Scan failed: {}", e);
                self.scan_cache
                    .as_ref()
                    .map(|(_, networks)| networks.clone())
                    .unwrap_or_default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::Credentials;
    use crate::network::SimNetwork;
    use crate::storage::MemoryStore;

    const AP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

    struct Rig {
        clock: ManualClock,
        net: SimNetwork,
        store: MemoryStore,
        portal: ProvisioningController,
    }

    impl Rig {
        fn new() -> Self {
            let clock = ManualClock::new();
            let mut net = SimNetwork::new(clock.clone());
            net.add_network("Home", "secret", -42, 5_000);
            Self {
                clock,
                net,
                store: MemoryStore::new(),
                portal: ProvisioningController::new(AP, &DeviceConfig::default()),
            }
        }

        fn handle(&mut self, request: Request) -> Reply {
            let now = self.clock.now_ms();
            self.portal.handle(&request, &mut self.net, now)
        }

        fn poll(&mut self) -> PortalPoll {
            let now = self.clock.now_ms();
            self.portal.poll(&mut self.store, &mut self.net, now)
        }

        fn run_until_answer(&mut self, step_ms: u64, limit_ms: u64) -> Response {
            let start = self.clock.now_ms();
            loop {
                self.poll();
                if let Some(response) = self.portal.take_deferred_response() {
                    return response;
                }
                assert!(self.clock.now_ms() - start <= limit_ms, "no answer");
                self.clock.advance(step_ms);
            }
        }
    }

    fn submit(body: &str) -> Request {
        Request::post("/save", body).with_host("192.168.4.1")
    }

    #[test]
    fn test_get_root_serves_form_with_scan() {
        let mut rig = Rig::new();
        let Reply::Now(response) = rig.handle(Request::get("/").with_host("192.168.4.1")) else {
            panic!("expected immediate reply");
        };
        assert_eq!(response.status, 200);
        assert!(response.body.contains("<form"));
        assert!(response.body.contains("Home (-42 dBm)"));
        assert_eq!(rig.net.state().scans, 1);
    }

    #[test]
    fn test_scan_cache_expires() {
        let mut rig = Rig::new();
        rig.handle(Request::get("/"));
        rig.clock.advance(9_999);
        rig.handle(Request::get("/"));
        assert_eq!(rig.net.state().scans, 1);

        rig.clock.advance(1);
        rig.handle(Request::get("/"));
        assert_eq!(rig.net.state().scans, 2);
    }

    #[test]
    fn test_foreign_host_redirected() {
        let mut rig = Rig::new();
        for path in ["/", "/generate_204", "/hotspot-detect.html", "/save"] {
            let request = Request::get(path).with_host("connectivitycheck.gstatic.com");
            assert_eq!(
                rig.handle(request),
                Reply::Now(Response::redirect("http://192.168.4.1/"))
            );
        }
        assert_eq!(rig.net.state().scans, 0);
    }

    #[test]
    fn test_unknown_local_path_serves_page() {
        let mut rig = Rig::new();
        let Reply::Now(response) = rig.handle(Request::get("/anything").with_host("192.168.4.1"))
        else {
            panic!("expected immediate reply");
        };
        assert_eq!(response.status, 200);
        assert!(response.body.contains("action=\"/save\""));
    }

    #[test]
    fn test_malformed_submission_is_400_without_join() {
        let mut rig = Rig::new();
        let Reply::Now(response) = rig.handle(submit("ssid=&pass=x&api=https%3A%2F%2Fx%2Fhb"))
        else {
            panic!("expected immediate reply");
        };
        assert_eq!(response.status, 400);
        assert!(rig.net.join_log().is_empty());
        assert!(matches!(rig.portal.state(), PortalState::ServingPortal));
        assert_eq!(rig.store.write_count(), 0);
    }

    #[test]
    fn test_successful_submission_saves_then_restarts() {
        let mut rig = Rig::new();
        let reply = rig.handle(submit("ssid=Home&pass=secret&api=https%3A%2F%2Fx%2Fhb"));
        assert_eq!(reply, Reply::Deferred);
        assert!(rig.portal.is_validating());

        let response = rig.run_until_answer(250, 20_000);
        assert_eq!(response.status, 200);
        assert!(response.body.contains("Connected!"));
        assert!(response.body.contains("10.0.0.5"));
        assert_eq!(
            rig.store.load(),
            Credentials::new("Home", "secret", "https://x/hb")
        );

        // Grace period before the restart
        assert_eq!(rig.poll(), PortalPoll::Serving);
        rig.clock.advance(800);
        assert_eq!(rig.poll(), PortalPoll::Restart);
    }

    #[test]
    fn test_wrong_password_reverts_without_saving() {
        let mut rig = Rig::new();
        let before = Credentials::new("Old", "oldpass", "http://old/");
        rig.store = MemoryStore::with(before.clone());

        assert_eq!(
            rig.handle(submit("ssid=Home&pass=wrong&api=https%3A%2F%2Fx%2Fhb")),
            Reply::Deferred
        );

        rig.clock.advance(19_999);
        assert_eq!(rig.poll(), PortalPoll::Serving);
        assert!(rig.portal.take_deferred_response().is_none());

        rig.clock.advance(1);
        rig.poll();
        let response = rig.portal.take_deferred_response().unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body.contains("Failed to connect."));
        assert!(matches!(rig.portal.state(), PortalState::ServingPortal));
        assert_eq!(rig.store.load(), before);
        assert_eq!(rig.store.write_count(), 0);
    }

    #[test]
    fn test_second_submission_while_validating_is_503() {
        let mut rig = Rig::new();
        assert_eq!(
            rig.handle(submit("ssid=Home&pass=secret&api=http%3A%2F%2Fx%2F")),
            Reply::Deferred
        );
        let Reply::Now(response) = rig.handle(submit("ssid=Home&pass=secret&api=http%3A%2F%2Fx%2F"))
        else {
            panic!("expected immediate reply");
        };
        assert_eq!(response.status, 503);
        assert_eq!(rig.net.join_log().len(), 1);

        // The page is still served, from the cache only
        let Reply::Now(page) = rig.handle(Request::get("/")) else {
            panic!("expected immediate reply");
        };
        assert_eq!(page.status, 200);
        assert_eq!(rig.net.state().scans, 0);
    }

    #[test]
    fn test_store_failure_after_join_is_500_and_portal_continues() {
        let mut rig = Rig::new();
        rig.store.set_fail_writes(true);
        rig.handle(submit("ssid=Home&pass=secret&api=http%3A%2F%2Fx%2F"));

        let response = rig.run_until_answer(250, 20_000);
        assert_eq!(response.status, 500);
        assert!(matches!(rig.portal.state(), PortalState::ServingPortal));
        assert!(!rig.net.is_connected());

        rig.clock.advance(60_000);
        assert_eq!(rig.poll(), PortalPoll::Serving);
    }

    #[test]
    fn test_retry_after_failure() {
        let mut rig = Rig::new();
        rig.handle(submit("ssid=Home&pass=wrong&api=http%3A%2F%2Fx%2F"));
        rig.run_until_answer(1_000, 20_000);

        assert_eq!(
            rig.handle(submit("ssid=Home&pass=secret&api=http%3A%2F%2Fx%2F")),
            Reply::Deferred
        );
        let response = rig.run_until_answer(1_000, 20_000);
        assert!(response.body.contains("Connected!"));
        assert_eq!(rig.store.load().password, "secret");
    }
}
