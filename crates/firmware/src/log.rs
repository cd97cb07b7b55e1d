//! Logging macros
//!
//! One set of macros for every build:
//! - feature `defmt`: `defmt` over RTT on the target
//! - feature `std`: `tracing` on the host
//! - neither: arguments are evaluated for type checking only
//!
//! Format strings must stick to plain `{}` placeholders so they are valid for
//! both backends.

macro_rules! log_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::trace!($($arg)*);
        #[cfg(feature = "std")]
        ::tracing::trace!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "std")))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        #[cfg(feature = "std")]
        ::tracing::debug!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "std")))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        #[cfg(feature = "std")]
        ::tracing::info!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "std")))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        #[cfg(feature = "std")]
        ::tracing::warn!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "std")))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);
        #[cfg(feature = "std")]
        ::tracing::error!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "std")))]
        let _ = ::core::format_args!($($arg)*);
    }};
}
