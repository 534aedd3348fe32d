//! Credential configuration utility for ESP32.
//!
//! Writes a credential record to NVS so the device joins on its next boot
//! without going through the setup portal.
//!
//! Usage:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" REPORT_ENDPOINT="http://host/api" cargo configure-device
//!
//! For open networks (no password):
//!   WIFI_SSID="OpenNetwork" WIFI_PASSWORD="" REPORT_ENDPOINT="http://host/api" cargo configure-device
//!
//! The record is stored as-is; nothing checks that the network is reachable.

/// WiFi SSID - set via WIFI_SSID environment variable at compile time.
#[cfg(feature = "esp32")]
const WIFI_SSID: Option<&str> = option_env!("WIFI_SSID");

/// WiFi password - set via WIFI_PASSWORD environment variable at compile time.
/// Empty string for open networks.
#[cfg(feature = "esp32")]
const WIFI_PASSWORD: Option<&str> = option_env!("WIFI_PASSWORD");

/// Heartbeat endpoint - set via REPORT_ENDPOINT environment variable at compile time.
#[cfg(feature = "esp32")]
const REPORT_ENDPOINT: Option<&str> = option_env!("REPORT_ENDPOINT");

/// Print error message and halt. On ESP32, we pause briefly then return
/// so the process terminates cleanly (espflash monitor will show the output).
#[cfg(feature = "esp32")]
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    // Brief pause to ensure serial output is flushed before process exits
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

#[cfg(feature = "esp32")]
fn main() {
    use esp32_onboarding::config::{ConfigError, Credentials};
    use esp32_onboarding::storage::{CredentialStore, NvsStore};
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    println!("\n=== Device Configuration Utility ===\n");

    let (ssid, endpoint) = match (WIFI_SSID, REPORT_ENDPOINT) {
        (Some(s), Some(e)) if !s.is_empty() && !e.is_empty() => (s, e),
        _ => {
            halt_with_error(
                "Error: WIFI_SSID and REPORT_ENDPOINT must be set at compile time.\n\n\
                 Usage:\n  \
                 WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" \
                 REPORT_ENDPOINT=\"http://host/api\" cargo configure-device",
            );
        }
    };

    let password = WIFI_PASSWORD.unwrap_or("");

    println!("SSID: {}", ssid);
    println!(
        "Password: {} ({} chars)",
        if password.is_empty() {
            "(none)"
        } else {
            "****"
        },
        password.len()
    );
    println!("Endpoint: {}", endpoint);

    let credentials = Credentials::new(ssid, password, endpoint);
    match credentials.validate() {
        Ok(()) => {}
        Err(ConfigError::SsidTooLong { len, max }) => {
            halt_with_error(&format!(
                "Error: SSID too long ({} bytes, max {})",
                len, max
            ));
        }
        Err(ConfigError::PasswordTooLong { len, max }) => {
            halt_with_error(&format!(
                "Error: Password too long ({} bytes, max {})",
                len, max
            ));
        }
        Err(e) => {
            halt_with_error(&format!("Error: {}", e));
        }
    }

    let partition = match EspDefaultNvsPartition::take() {
        Ok(p) => p,
        Err(e) => halt_with_error(&format!("Error initializing NVS: {:?}", e)),
    };
    match NvsStore::new(partition) {
        Ok(mut store) => match store.save(&credentials) {
            Ok(()) => {
                println!("\n=== Credentials saved to NVS ===");
                println!("\nThe device will join this network on its next boot.");
            }
            Err(e) => {
                halt_with_error(&format!("Error saving to NVS: {}", e));
            }
        },
        Err(e) => {
            halt_with_error(&format!("Error opening NVS namespace: {}", e));
        }
    }

    println!("\n=== Done - you can disconnect the device ===\n");

    // Brief pause to ensure serial output is visible, then exit cleanly
    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    eprintln!("This binary must be built for ESP32.");
    eprintln!();
    eprintln!("Usage:");
    eprintln!(
        "  WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" \
         REPORT_ENDPOINT=\"http://host/api\" cargo configure-device"
    );
    std::process::exit(1);
}
