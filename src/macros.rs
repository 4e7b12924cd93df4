#![allow(unused_macros)]

/// Helper macro for locking items
///
/// A poisoned lock is recovered instead of propagated. The guarded data is only ever replaced
/// as a whole, so a panicking holder can not leave it half-written.
///
/// ```rust, ignore
///  let mut cache = lock!(self.cache);
///  cache.insert(method, &bytes);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}

/// Helper macro for diagnostics gated by the per-call debug flag
///
/// Expands to a `tracing` event at the given level when `$enabled` is true and to nothing
/// observable otherwise.
///
/// ```rust, ignore
///  debug_log!(config.debug, "Initializing CLR runtime host");
///  debug_log!(config.debug, warn, "could not redirect stdout/stderr: {}", error);
/// ```
macro_rules! debug_log {
    ($enabled:expr, warn, $($arg:tt)+) => {
        if $enabled {
            tracing::warn!($($arg)+);
        }
    };
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::debug!($($arg)+);
        }
    };
}
