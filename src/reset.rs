//! Factory reset by holding the reset button at boot.
//!
//! The button level is sampled raw, without debouncing: any bounce while
//! holding restarts the count from zero.
//!
//! ```text
//! Idle --active--> Holding --released--> Idle
//!                  Holding --held >= threshold--> Triggered (terminal)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A physical control input.
pub trait ResetButton {
    /// Raw level: `true` while the button is pressed.
    fn is_active(&mut self) -> bool;
}

/// Button whose level is set in software. Clones share the level.
#[derive(Debug, Clone, Default)]
pub struct StaticButton {
    active: Arc<AtomicBool>,
}

impl StaticButton {
    /// Create a released button.
    pub fn released() -> Self {
        Self::default()
    }

    /// Create a button that is already held.
    pub fn held() -> Self {
        let button = Self::default();
        button.set_active(true);
        button
    }

    /// Press or release the button.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

impl ResetButton for StaticButton {
    fn is_active(&mut self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Hold detection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    /// Button released.
    Idle,
    /// Button held since `since_ms`.
    Holding { since_ms: u64 },
    /// Held for at least the threshold. Terminal.
    Triggered,
}

/// Tracks a continuous button hold against a threshold.
#[derive(Debug, Clone)]
pub struct FactoryResetMonitor {
    threshold_ms: u64,
    state: HoldState,
}

impl FactoryResetMonitor {
    /// Create a monitor in [`HoldState::Idle`].
    pub fn new(threshold_ms: u64) -> Self {
        Self {
            threshold_ms,
            state: HoldState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> HoldState {
        self.state
    }

    /// Feed one sample of the input level taken at `now_ms`.
    pub fn poll(&mut self, active: bool, now_ms: u64) -> HoldState {
        self.state = match (self.state, active) {
            (HoldState::Triggered, _) => HoldState::Triggered,
            (HoldState::Idle, false) => HoldState::Idle,
            (HoldState::Idle, true) => self.check(now_ms, now_ms),
            (HoldState::Holding { .. }, false) => HoldState::Idle,
            (HoldState::Holding { since_ms }, true) => self.check(since_ms, now_ms),
        };
        self.state
    }

    fn check(&self, since_ms: u64, now_ms: u64) -> HoldState {
        if now_ms.saturating_sub(since_ms) >= self.threshold_ms {
            HoldState::Triggered
        } else {
            HoldState::Holding { since_ms }
        }
    }
}

/// Reset button on a GPIO with internal pull-up, pressed = low.
#[cfg(feature = "esp32")]
pub struct GpioButton<'d> {
    pin: esp_idf_hal::gpio::PinDriver<'d, esp_idf_hal::gpio::AnyIOPin, esp_idf_hal::gpio::Input>,
}

#[cfg(feature = "esp32")]
impl<'d> GpioButton<'d> {
    /// Configure `pin` as a pulled-up input.
    pub fn new(pin: esp_idf_hal::gpio::AnyIOPin) -> Result<Self, esp_idf_sys::EspError> {
        let mut pin = esp_idf_hal::gpio::PinDriver::input(pin)?;
        pin.set_pull(esp_idf_hal::gpio::Pull::Up)?;
        Ok(Self { pin })
    }
}

#[cfg(feature = "esp32")]
impl ResetButton for GpioButton<'_> {
    fn is_active(&mut self) -> bool {
        self.pin.is_low()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: u64 = 30_000;

    #[test]
    fn test_idle_without_press() {
        let mut monitor = FactoryResetMonitor::new(THRESHOLD);
        assert_eq!(monitor.poll(false, 0), HoldState::Idle);
        assert_eq!(monitor.poll(false, 60_000), HoldState::Idle);
    }

    #[test]
    fn test_continuous_hold_triggers_at_threshold() {
        let mut monitor = FactoryResetMonitor::new(THRESHOLD);
        assert_eq!(monitor.poll(true, 1_000), HoldState::Holding { since_ms: 1_000 });
        assert_eq!(
            monitor.poll(true, 30_999),
            HoldState::Holding { since_ms: 1_000 }
        );
        assert_eq!(monitor.poll(true, 31_000), HoldState::Triggered);
    }

    #[test]
    fn test_hold_just_below_threshold_does_not_trigger() {
        let mut monitor = FactoryResetMonitor::new(THRESHOLD);
        monitor.poll(true, 0);
        assert_eq!(monitor.poll(true, 29_999), HoldState::Holding { since_ms: 0 });
        assert_eq!(monitor.poll(false, 30_000), HoldState::Idle);
    }

    #[test]
    fn test_release_resets_accumulated_time() {
        let mut monitor = FactoryResetMonitor::new(THRESHOLD);
        monitor.poll(true, 0);
        monitor.poll(true, 29_999);
        assert_eq!(monitor.poll(false, 29_999), HoldState::Idle);

        // Fresh hold needs the full threshold again
        assert_eq!(
            monitor.poll(true, 30_000),
            HoldState::Holding { since_ms: 30_000 }
        );
        assert_eq!(
            monitor.poll(true, 59_999),
            HoldState::Holding { since_ms: 30_000 }
        );
        assert_eq!(monitor.poll(true, 60_000), HoldState::Triggered);
    }

    #[test]
    fn test_bounce_restarts_count() {
        let mut monitor = FactoryResetMonitor::new(THRESHOLD);
        monitor.poll(true, 0);
        monitor.poll(false, 20_000); // single bounce
        monitor.poll(true, 20_010);
        assert_eq!(
            monitor.poll(true, 30_000),
            HoldState::Holding { since_ms: 20_010 }
        );
    }

    #[test]
    fn test_triggered_is_terminal() {
        let mut monitor = FactoryResetMonitor::new(THRESHOLD);
        monitor.poll(true, 0);
        monitor.poll(true, THRESHOLD);
        assert_eq!(monitor.poll(false, THRESHOLD + 1), HoldState::Triggered);
        assert_eq!(monitor.state(), HoldState::Triggered);
    }

    #[test]
    fn test_static_button_shared_level() {
        let button = StaticButton::released();
        let mut probe = button.clone();
        assert!(!probe.is_active());
        button.set_active(true);
        assert!(probe.is_active());
        assert!(StaticButton::held().is_active());
    }
}
