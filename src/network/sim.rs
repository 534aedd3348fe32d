//! Simulated radio.
//!
//! Each known network has a password and a join latency measured on a
//! [`ManualClock`]. A join with a wrong password or an unknown SSID never
//! completes, which is how a real driver behaves until the caller gives up.

use super::{JoinStatus, NetworkError, NetworkProvider, ScanEntry};
use crate::clock::{Clock, ManualClock};
use crate::config::{AccessPointConfig, Credentials};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};

/// A network the simulation knows about.
#[derive(Debug, Clone)]
pub struct SimAccessPoint {
    /// Network name.
    pub ssid: String,
    /// Password the network accepts.
    pub password: String,
    /// Signal strength reported by scans and while connected.
    pub rssi: i8,
    /// Time from `begin_join` until the join completes.
    pub latency_ms: u64,
    /// Visible to scans and joinable.
    pub in_range: bool,
}

/// Shared simulation state, inspectable from tests.
#[derive(Debug)]
pub struct SimState {
    /// Networks in range.
    pub networks: Vec<SimAccessPoint>,
    /// Every `begin_join`, in order.
    pub join_log: Vec<Credentials>,
    /// Join in progress and when it started.
    pub joining: Option<(Credentials, u64)>,
    /// SSID the station is connected to.
    pub connected: Option<String>,
    /// Credentials of the last completed join, used by `reconnect`.
    pub last_joined: Option<Credentials>,
    /// Number of `reconnect` calls.
    pub reconnects: usize,
    /// Address handed out when connected.
    pub station_ip: Ipv4Addr,
    /// Number of `start_access_point` calls.
    pub access_point_starts: usize,
    /// Number of scans.
    pub scans: usize,
    /// Make `start_access_point` fail.
    pub fail_access_point: bool,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            join_log: Vec::new(),
            joining: None,
            connected: None,
            last_joined: None,
            reconnects: 0,
            station_ip: Ipv4Addr::new(10, 0, 0, 5),
            access_point_starts: 0,
            scans: 0,
            fail_access_point: false,
        }
    }
}

impl SimState {
    fn refresh(&mut self, now_ms: u64) {
        let Some((creds, started_ms)) = &self.joining else {
            return;
        };
        let ready = self.networks.iter().any(|n| {
            n.in_range
                && n.ssid == creds.ssid
                && n.password == creds.password
                && now_ms.saturating_sub(*started_ms) >= n.latency_ms
        });
        if ready {
            self.connected = Some(creds.ssid.clone());
            self.last_joined = Some(creds.clone());
            self.joining = None;
        }
    }

    fn connected_network(&self) -> Option<&SimAccessPoint> {
        let ssid = self.connected.as_ref()?;
        self.networks.iter().find(|n| &n.ssid == ssid)
    }
}

/// Scripted radio for tests. Clones share state.
#[derive(Debug, Clone)]
pub struct SimNetwork {
    clock: ManualClock,
    state: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    /// Create a simulation with no networks in range.
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Put a network in range.
    pub fn add_network(&mut self, ssid: &str, password: &str, rssi: i8, latency_ms: u64) {
        self.state().networks.push(SimAccessPoint {
            ssid: ssid.to_string(),
            password: password.to_string(),
            rssi,
            latency_ms,
            in_range: true,
        });
    }

    /// Drop the station link. Any join still in flight is dropped too.
    pub fn drop_link(&self) {
        let mut state = self.state();
        state.joining = None;
        state.connected = None;
    }

    /// Move a network in or out of range. Leaving range drops a link to it.
    pub fn set_in_range(&self, ssid: &str, in_range: bool) {
        let mut state = self.refreshed();
        for network in state.networks.iter_mut().filter(|n| n.ssid == ssid) {
            network.in_range = in_range;
        }
        if !in_range && state.connected.as_deref() == Some(ssid) {
            state.connected = None;
        }
    }

    /// Lock the shared state.
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every `begin_join` so far.
    pub fn join_log(&self) -> Vec<Credentials> {
        self.state().join_log.clone()
    }

    fn refreshed(&self) -> MutexGuard<'_, SimState> {
        let mut state = self.state();
        state.refresh(self.clock.now_ms());
        state
    }
}

impl NetworkProvider for SimNetwork {
    fn begin_join(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        let now = self.clock.now_ms();
        let mut state = self.refreshed();
        if state.joining.is_some() {
            return Err(NetworkError::JoinInProgress);
        }
        state.connected = None;
        state.join_log.push(credentials.clone());
        state.joining = Some((credentials.clone(), now));
        Ok(())
    }

    fn join_status(&mut self) -> JoinStatus {
        let state = self.refreshed();
        if state.connected.is_some() {
            JoinStatus::Connected
        } else if state.joining.is_some() {
            JoinStatus::Connecting
        } else {
            JoinStatus::Idle
        }
    }

    fn reconnect(&mut self) -> Result<(), NetworkError> {
        let now = self.clock.now_ms();
        let mut state = self.refreshed();
        state.reconnects += 1;
        if state.connected.is_some() || state.joining.is_some() {
            return Ok(());
        }
        let credentials = state.last_joined.clone().ok_or(NetworkError::NotConfigured)?;
        state.joining = Some((credentials, now));
        Ok(())
    }

    fn abort_join(&mut self) {
        let mut state = self.state();
        state.joining = None;
        state.connected = None;
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<Ipv4Addr, NetworkError> {
        let mut state = self.state();
        if state.fail_access_point {
            return Err(NetworkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated access point failure",
            )));
        }
        state.access_point_starts += 1;
        Ok(config.address)
    }

    fn scan(&mut self) -> Result<Vec<ScanEntry>, NetworkError> {
        let mut state = self.state();
        state.scans += 1;
        Ok(state
            .networks
            .iter()
            .filter(|n| n.in_range)
            .map(|n| ScanEntry {
                ssid: n.ssid.clone(),
                rssi: n.rssi,
            })
            .collect())
    }

    fn is_connected(&self) -> bool {
        self.refreshed().connected.is_some()
    }

    fn ip_addr(&self) -> Option<Ipv4Addr> {
        let state = self.refreshed();
        state.connected.as_ref().map(|_| state.station_ip)
    }

    fn rssi(&self) -> Option<i8> {
        self.refreshed().connected_network().map(|n| n.rssi)
    }
}
