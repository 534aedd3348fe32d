//! ESP32 Wi-Fi onboarding library.
//!
//! This library contains the provisioning state machine and everything it
//! needs, split so the platform-independent parts can be tested on the host
//! machine without ESP32 hardware. ESP-IDF drivers sit behind the `esp32`
//! feature.

pub mod clock;
pub mod config;
pub mod device;
pub mod heartbeat;
pub mod network;
pub mod portal;
pub mod reset;
pub mod runtime;
pub mod storage;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AccessPointConfig, ConfigError, Credentials, DeviceConfig};
pub use device::{Control, Device, DeviceMode, Phase};
pub use heartbeat::{HeartbeatOutcome, HeartbeatScheduler, HeartbeatTransport, TransportError};
pub use network::{JoinAttempt, JoinPoll, JoinStatus, NetworkError, NetworkProvider, ScanEntry};
pub use portal::{PortalHandler, ProvisioningController};
pub use reset::{FactoryResetMonitor, HoldState, ResetButton};
pub use runtime::run_until_restart;
pub use storage::{CredentialStore, MemoryStore, StoreError};
