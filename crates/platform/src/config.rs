//! Device identity constants.
//!
//! All naming and version reporting should reference these constants rather
//! than hardcoding values.

/// The device name
pub const APP_NAME: &str = "DMF Controller";

/// Package name used in the device identification string.
pub const PACKAGE_NAME: &str = "dmf-controller";

/// Firmware version (synchronized with Cargo.toml)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Board hardware revision reported to the host.
pub const HARDWARE_VERSION: &str = "0.3";

/// Length of the per-device unique identifier.
pub const UUID_LEN: usize = 16;

/// Identification string returned to the host: `"<package>::<version>"`.
pub const fn device_id_response() -> &'static str {
    concat!("dmf-controller::", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_response_names_package_and_version() {
        let id = device_id_response();
        assert!(id.starts_with(PACKAGE_NAME));
        assert!(id.ends_with(APP_VERSION));
    }
}
