//! Command handlers
//!
//! The presentation boundary: actions behind the recorder UI's buttons and
//! checkboxes, plus host and device queries.

pub mod session;
pub mod system;

pub use session::SessionController;
pub use system::{get_system_info, list_devices, DeviceList, SystemInfo};
