//! The scheduling loop shared by the firmware and the host binary.
//!
//! One thread: tick the device, serve whatever portal traffic is waiting,
//! sleep one scheduler tick. The portal sockets are opened the first time the
//! device enters Provisioning and closed when the loop returns.

use crate::clock::Clock;
use crate::config::DeviceConfig;
use crate::device::{Control, Device};
use crate::heartbeat::HeartbeatTransport;
use crate::network::NetworkProvider;
use crate::portal::{DnsResponder, PortalServer};
use crate::reset::ResetButton;
use crate::storage::CredentialStore;
use log::error;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Portal sockets, opened on demand.
#[derive(Default)]
pub struct PortalIo {
    server: Option<PortalServer>,
    dns: Option<DnsResponder>,
    opened: bool,
}

impl PortalIo {
    /// No sockets yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the HTTP server and, if enabled, the DNS responder.
    ///
    /// Only the first call does anything; a failed bind is logged and not retried.
    pub fn open(&mut self, address: Ipv4Addr, config: &DeviceConfig) {
        if self.opened {
            return;
        }
        self.opened = true;

        match PortalServer::bind(Ipv4Addr::UNSPECIFIED, config.http_port) {
            Ok(server) => self.server = Some(server),
            Err(e) => error!("Portal HTTP server failed to start: {}", e),
        }
        if let Some(port) = config.dns_port {
            match DnsResponder::bind(Ipv4Addr::UNSPECIFIED, port, address) {
                Ok(dns) => self.dns = Some(dns),
                Err(e) => error!("Captive DNS failed to start on port {}: {}", port, e),
            }
        }
    }

    /// Port of the HTTP server, once bound.
    pub fn http_port(&self) -> Option<u16> {
        self.server.as_ref().and_then(PortalServer::port)
    }

    /// Serve pending DNS and HTTP traffic. Returns the number of HTTP responses sent.
    pub fn poll<S, N, B, T, C>(&mut self, device: &mut Device<S, N, B, T, C>) -> usize
    where
        S: CredentialStore,
        N: NetworkProvider,
        B: ResetButton,
        T: HeartbeatTransport,
        C: Clock,
    {
        if let Some(dns) = &self.dns {
            if let Err(e) = dns.poll() {
                error!("Captive DNS error: {}", e);
            }
        }
        match &mut self.server {
            Some(server) => server.poll(device),
            None => 0,
        }
    }
}

/// Drive `device` until it asks for a restart.
pub fn run_until_restart<S, N, B, T, C>(device: &mut Device<S, N, B, T, C>)
where
    S: CredentialStore,
    N: NetworkProvider,
    B: ResetButton,
    T: HeartbeatTransport,
    C: Clock,
{
    let tick = Duration::from_millis(device.config().tick_ms);
    let mut io = PortalIo::new();

    loop {
        if device.tick() == Control::Restart {
            return;
        }
        if let Some(address) = device.portal_address() {
            io.open(address, device.config());
            io.poll(device);
        }
        std::thread::sleep(tick);
    }
}
