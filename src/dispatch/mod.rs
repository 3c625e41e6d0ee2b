//! Host hardware profile consulted by the planner.

pub mod device_profile;
pub mod hw_info;

pub use device_profile::{DeviceProfile, IsaLevel};

use std::sync::OnceLock;

static PROFILE: OnceLock<DeviceProfile> = OnceLock::new();

/// Get the global device profile (detected once, cached for process lifetime).
pub fn device_profile() -> &'static DeviceProfile {
    PROFILE.get_or_init(|| {
        let profile = DeviceProfile::detect();
        log::debug!("device profile: {profile}");
        profile
    })
}
