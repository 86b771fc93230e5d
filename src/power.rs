//! Link power management hooks
//!
//! usb-device has no say over U1/U2 or L1 states, that is up to the peripheral driver.
//! [BulkOnly] calls these hooks so the application can forward them to its HAL.
//!
//! [BulkOnly]: crate::transport::bbb::BulkOnly

/// Link power control of the underlying USB peripheral
///
/// Every method defaults to doing nothing.
pub trait LinkPower {
    /// The bus has been suspended by the host
    fn suspend(&mut self) {}

    /// Low power link states are forbidden while a command is in progress
    fn set_lpm_enabled(&mut self, enabled: bool) {
        let _ = enabled;
    }

    /// Brings the link back to the active state before the device talks to the host
    fn wake_link(&mut self) {}
}

/// No link power control
impl LinkPower for () {}
