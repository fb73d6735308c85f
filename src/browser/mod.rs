//! Browser automation module
//!
//! Handles launching and controlling a single mobile-emulated Chrome/Chromium
//! instance over the DevTools protocol.

mod device;
mod errors;
mod session;

pub use device::DeviceProfile;
pub use errors::BrowserError;
pub use session::{BrowserSession, LaunchOptions};
