//! Runtime selection and diagnostics settings.
//!
//! [`ClrConfig`] carries the two knobs every lifecycle call takes: which CLR version to host and
//! whether lifecycle diagnostics are emitted. The runtime selector is passed through to the
//! native backend uninterpreted; it is only consulted by the call that starts the host.

/// Configuration for hosting the Common Language Runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClrConfig {
    /// Runtime version selector, matched against installed runtime versions (default: `"v4"`)
    pub runtime: String,

    /// Emit a diagnostic line around every native lifecycle step (default: false)
    pub debug: bool,
}

impl Default for ClrConfig {
    fn default() -> Self {
        Self::v4()
    }
}

impl ClrConfig {
    /// Creates a configuration hosting the 4.x runtime line (`v4.0.30319`)
    #[must_use]
    pub fn v4() -> Self {
        Self {
            runtime: "v4".to_string(),
            debug: false,
        }
    }

    /// Creates a configuration hosting the legacy 2.x runtime line (`v2.0.50727`)
    #[must_use]
    pub fn v2() -> Self {
        Self {
            runtime: "v2".to_string(),
            debug: false,
        }
    }

    /// Replaces the runtime version selector.
    ///
    /// # Arguments
    ///
    /// * `runtime` - Any substring of the version string of an installed runtime
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Enables or disables lifecycle diagnostics.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let default = ClrConfig::default();
        assert_eq!(default, ClrConfig::v4());
        assert_eq!(default.runtime, "v4");
        assert!(!default.debug);
    }

    #[test]
    fn test_builder() {
        let config = ClrConfig::v2().with_debug(true);
        assert_eq!(config.runtime, "v2");
        assert!(config.debug);

        let config = ClrConfig::default().with_runtime("v4.0.30319");
        assert_eq!(config.runtime, "v4.0.30319");
        assert!(!config.debug);
    }
}
