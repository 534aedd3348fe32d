//! ESP32 onboarding firmware binary.
//!
//! Boots through the factory-reset gate, joins with stored credentials or
//! serves the setup portal, and sends heartbeats once connected.

#[cfg(feature = "esp32")]
fn main() {
    use esp32_onboarding::heartbeat::EspHttpTransport;
    use esp32_onboarding::network::WifiNetwork;
    use esp32_onboarding::reset::GpioButton;
    use esp32_onboarding::storage::NvsStore;
    use esp32_onboarding::{run_until_restart, Device, DeviceConfig, SystemClock};
    use esp_idf_hal::gpio::IOPin;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{error, info, warn};

    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    // Initialize ESP-IDF logger for log crate integration
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("=== ESP32 onboarding starting ===");

    let config = DeviceConfig::default();
    if config.allow_insecure_https {
        warn!("HTTPS heartbeats do not validate server certificates");
    }

    let result = (|| -> Result<(), Box<dyn std::error::Error>> {
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let partition = EspDefaultNvsPartition::take()?;

        let store = NvsStore::new(partition.clone())?;
        let network = WifiNetwork::new(
            peripherals.modem,
            sysloop,
            Some(partition),
            &config.hostname,
        )?;
        let button = GpioButton::new(peripherals.pins.gpio0.downgrade())?;
        let transport =
            EspHttpTransport::new(config.heartbeat_timeout_ms, config.allow_insecure_https);

        let mut device = Device::new(
            config,
            store,
            network,
            button,
            transport,
            SystemClock::new(),
        );
        run_until_restart(&mut device);
        Ok(())
    })();

    if let Err(e) = result {
        error!("Startup failed: {}", e);
        std::thread::sleep(std::time::Duration::from_secs(5));
    }

    info!("Restarting");
    esp_idf_hal::reset::restart();
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-device' to run the state machine on this machine,");
    println!("or 'cargo test --no-default-features' for host testing.");
}
