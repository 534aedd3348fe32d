//! Host-based onboarding device for development and testing.
//!
//! Runs the same boot/provisioning/heartbeat state machine as the firmware,
//! with a JSON file for credentials and the host's own network connection.
//! A restart rebuilds the device from the stored record, like a reboot.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin host-device
//! ONBOARD_STORE_PATH=/tmp/creds.json ONBOARD_HTTP_PORT=8080 cargo run --bin host-device
//! ONBOARD_FACTORY_RESET=1 cargo run --bin host-device   # hold the button on first boot
//! ```

use esp32_onboarding::heartbeat::ReqwestTransport;
use esp32_onboarding::network::HostNetwork;
use esp32_onboarding::reset::StaticButton;
use esp32_onboarding::storage::FileStore;
use esp32_onboarding::{run_until_restart, Device, DeviceConfig, SystemClock};
use log::{error, info, warn};
use std::net::Ipv4Addr;

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== Onboarding host device starting ===");

    let mut base = DeviceConfig::default();
    base.access_point.address = Ipv4Addr::LOCALHOST;
    base.http_port = 8080;
    base.dns_port = Some(5353);
    let config = DeviceConfig::from_env(base);

    let store_path = match &config.store_path {
        Some(path) => path.clone(),
        None => match FileStore::open_default() {
            Ok(store) => store.path().to_path_buf(),
            Err(e) => {
                error!("No credential file location: {}", e);
                std::process::exit(1);
            }
        },
    };
    info!("Credentials file: {}", store_path.display());

    if config.allow_insecure_https {
        warn!("HTTPS heartbeats do not validate server certificates");
    }

    let mut first_boot = true;
    loop {
        let transport =
            match ReqwestTransport::new(config.heartbeat_timeout_ms, config.allow_insecure_https) {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to build HTTP client: {}", e);
                    std::process::exit(1);
                }
            };

        let button = if first_boot && config.simulate_reset_hold {
            info!("Simulating a held reset button");
            StaticButton::held()
        } else {
            StaticButton::released()
        };
        first_boot = false;

        let mut device = Device::new(
            config.clone(),
            FileStore::new(store_path.clone()),
            HostNetwork::new(),
            button,
            transport,
            SystemClock::new(),
        );

        info!(
            "Setup portal (when active) at http://{}:{}/",
            config.access_point.address, config.http_port
        );
        run_until_restart(&mut device);
        info!("Restarting...");
    }
}
