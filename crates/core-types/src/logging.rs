//! Centralized logging macros for the GPS engine
//!
//! These macros give every component the same log shape:
//! - Output goes through `tracing`, so the binary picks the subscriber
//! - Each macro defaults to the `nmea_gps` target; pass `target: "..."`
//!   first to log under a component-specific target

/// Log debug-level message
///
/// # Example
/// ```
/// use core_types::gps_debug;
/// gps_debug!("pattern at offset {}", 71);
/// gps_debug!(target: "nmea_parser", "decoded {}", "GGA");
/// ```
#[macro_export]
macro_rules! gps_debug {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__tracing::debug!(target: $target, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__tracing::debug!(target: "nmea_gps", $($arg)+)
    };
}

/// Log info-level message
///
/// Use for lifecycle milestones (init OK, deinit)
#[macro_export]
macro_rules! gps_info {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__tracing::info!(target: $target, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__tracing::info!(target: "nmea_gps", $($arg)+)
    };
}

/// Log warning-level message
///
/// Use for recovered faults and dropped records
#[macro_export]
macro_rules! gps_warn {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__tracing::warn!(target: $target, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__tracing::warn!(target: "nmea_gps", $($arg)+)
    };
}

/// Log error-level message
///
/// Use for line faults and failed resource acquisition
#[macro_export]
macro_rules! gps_error {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__tracing::error!(target: $target, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__tracing::error!(target: "nmea_gps", $($arg)+)
    };
}
