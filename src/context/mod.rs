//! The runtime context: one hosted runtime and the assemblies loaded into it.
//!
//! [`RuntimeContext`] is the explicitly constructed owner of everything that would otherwise be
//! process-wide state: the native backend, the lazily started host handle and the assembly
//! cache. Loads borrow the context shared, teardown borrows it exclusively, which makes
//! "no teardown while a load or invocation is in flight" a property the borrow checker enforces.
//!
//! # Lifecycle
//!
//! ```text
//! new ──► acquire_host ──► load* ──► teardown ──► (uninitialized again)
//! ```
//!
//! - [`RuntimeContext::acquire_host`] - starts the runtime once and redirects its output
//! - [`RuntimeContext::load`] - loads (or reuses) an assembly and invokes its entry point
//! - [`RuntimeContext::teardown`] - releases every native handle in a fixed order
//!
//! # Examples
//!
//! ```rust,ignore
//! use clrloader::{ClrConfig, RuntimeContext, WindowsBackend};
//!
//! let mut context = RuntimeContext::new(WindowsBackend::new());
//! let config = ClrConfig::v4().with_debug(true);
//!
//! let bytes = std::fs::read("Seatbelt.exe")?;
//! let output = context.load(&bytes, &["-group=system"], &config)?;
//! println!("{}", output);
//!
//! context.teardown(&config);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod loader;
mod teardown;

use std::sync::Mutex;

pub use loader::normalize_arguments;
pub use teardown::{TeardownReport, TeardownStep};

use crate::{
    backend::ClrBackend,
    cache::{AssemblyCache, ContentHash},
    config::ClrConfig,
    host::RuntimeHost,
    Error, Result,
};

/// Owner of one hosted runtime, its assembly cache and the backend that drives both.
pub struct RuntimeContext<B: ClrBackend> {
    backend: B,
    host: RuntimeHost<B::Host>,
    assemblies: Mutex<AssemblyCache<B::Method>>,
}

impl<B: ClrBackend> RuntimeContext<B> {
    /// Creates a context around `backend`; no native call is made until the first load
    pub fn new(backend: B) -> Self {
        RuntimeContext {
            backend,
            host: RuntimeHost::new(),
            assemblies: Mutex::new(AssemblyCache::new()),
        }
    }

    /// Returns the backend this context drives
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the runtime host, starting it on first use.
    ///
    /// The first caller starts the runtime selected by `config.runtime` and then tries to
    /// redirect standard output and error; a failed redirection is logged and otherwise ignored.
    /// Concurrent callers wait for that single start-up and all observe the same handle. A
    /// failed start is remembered: every later call fails the same way until teardown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostUnavailable`] if the runtime could not be started.
    pub fn acquire_host(&self, config: &ClrConfig) -> Result<&B::Host> {
        self.host
            .get_or_init(|| self.start_host(config))
            .ok_or_else(|| Error::HostUnavailable {
                runtime: config.runtime.clone(),
            })
    }

    /// Returns true while a successfully started host is held
    pub fn is_initialized(&self) -> bool {
        self.host.get().is_some()
    }

    /// Returns the number of cached assemblies
    pub fn cached_assemblies(&self) -> usize {
        lock!(self.assemblies).len()
    }

    /// Returns true if bytes with digest `hash` are already loaded
    pub fn is_cached(&self, hash: &ContentHash) -> bool {
        lock!(self.assemblies).find(hash).is_some()
    }

    fn start_host(&self, config: &ClrConfig) -> Option<B::Host> {
        debug_log!(config.debug, runtime = %config.runtime, "Initializing CLR runtime host");

        let host = match self.backend.start_runtime(&config.runtime) {
            Ok(host) => host,
            Err(error) => {
                debug_log!(config.debug, warn, %error, "could not start CLR runtime host");
                return None;
            }
        };

        if let Err(error) = self.backend.redirect_output() {
            debug_log!(config.debug, warn, %error, "could not redirect stdout/stderr");
        }

        Some(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{Call, Failures, RecordingBackend};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lazy_start() {
        let context = RuntimeContext::new(RecordingBackend::new());
        assert!(!context.is_initialized());
        assert!(context.backend().calls().is_empty());

        let host = *context.acquire_host(&ClrConfig::v4()).unwrap();
        assert!(context.is_initialized());
        assert_eq!(
            context.backend().calls(),
            vec![Call::StartRuntime("v4".into()), Call::Redirect]
        );

        assert_eq!(*context.acquire_host(&ClrConfig::v4()).unwrap(), host);
        assert_eq!(context.backend().starts(), 1);
    }

    #[test]
    fn test_concurrent_acquire_starts_once() {
        let backend = RecordingBackend::new().with_start_delay(Duration::from_millis(20));
        let context = RuntimeContext::new(backend);
        let barrier = Barrier::new(8);
        let config = ClrConfig::v4();

        let hosts: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        *context.acquire_host(&config).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(context.backend().starts(), 1);
        assert!(hosts.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn test_failed_start_is_not_retried() {
        let backend = RecordingBackend::with_failures(Failures {
            start: true,
            ..Failures::default()
        });
        let context = RuntimeContext::new(backend);

        for _ in 0..3 {
            let err = context.acquire_host(&ClrConfig::v4()).unwrap_err();
            assert!(matches!(err, Error::HostUnavailable { ref runtime } if runtime == "v4"));
        }
        assert_eq!(context.backend().starts(), 1);
        assert!(!context.is_initialized());
        assert!(!context.backend().calls().contains(&Call::Redirect));
    }

    #[test]
    fn test_failed_redirect_is_not_fatal() {
        let backend = RecordingBackend::with_failures(Failures {
            redirect: true,
            ..Failures::default()
        });
        let context = RuntimeContext::new(backend);

        assert!(context
            .acquire_host(&ClrConfig::v4().with_debug(true))
            .is_ok());
        assert!(context.is_initialized());
    }
}
