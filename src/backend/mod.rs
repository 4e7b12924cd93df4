//! Native runtime backends.
//!
//! This module defines the [`ClrBackend`] trait, the single seam between the lifecycle core
//! ([`crate::RuntimeContext`]) and the native calls that actually start a runtime, load bytes
//! into it and invoke managed code. The core never touches a native handle directly; it only
//! moves the backend's associated handle types between the backend's own methods.
//!
//! # Handle Ownership
//!
//! Every handle type is released by a method that takes it by value. Once a handle has been
//! handed to its `release_*` method it can not be used or released again, so the release order
//! chosen by teardown is the only order in which handles can ever be given back.
//!
//! # Key Components
//!
//! - [`ClrBackend`] - The native operations the core depends on
//! - [`CapturedOutput`] - Standard output and error text of one invocation
//! - `WindowsBackend` - `mscoree.dll` COM hosting (Windows only)

use crate::Result;

pub(crate) mod capture;

#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use windows::WindowsBackend;

/// Standard output and standard error text produced by one invocation.
///
/// Both fields are empty when stream redirection was never established.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Text written to standard output
    pub stdout: String,
    /// Text written to standard error
    pub stderr: String,
}

impl CapturedOutput {
    /// Creates a new capture from the two stream texts
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        CapturedOutput {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Renders the capture the way a load returns it: stdout, a newline, then stderr
    #[must_use]
    pub fn joined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Native operations required to host a runtime and run assemblies in it.
///
/// Implementations must be thread-safe; the core calls into the backend from whichever thread
/// performs a load. Handle types are opaque to the core.
pub trait ClrBackend: Send + Sync {
    /// Handle to a started runtime host
    type Host: Send + Sync;
    /// Handle to the application domain assemblies are loaded into
    type AppDomain;
    /// Handle to the resolved entry point of a loaded assembly
    type Method: Send + Sync;
    /// Handle to the metadata host used to locate and create runtimes
    type MetaHost;

    /// Starts the runtime matching `version` and returns its host handle.
    ///
    /// # Errors
    ///
    /// Returns an error if no matching runtime exists or it fails to start.
    fn start_runtime(&self, version: &str) -> Result<Self::Host>;

    /// Redirects the standard output and error of the process into capture buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if the streams could not be redirected. Invocations still work
    /// afterwards, they just capture nothing.
    fn redirect_output(&self) -> Result<()>;

    /// Loads `bytes` as an assembly into `host` and resolves its entry point.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a loadable assembly or have no entry point.
    fn load_assembly(&self, host: &Self::Host, bytes: &[u8]) -> Result<Self::Method>;

    /// Invokes `method` with `args` and returns whatever it wrote to the captured streams.
    ///
    /// Faults raised by the invoked code are reported inside the captured text; an invocation
    /// itself has no failure mode at this layer.
    fn invoke(&self, method: &Self::Method, args: &[String]) -> CapturedOutput;

    /// Resolves the application domain currently associated with `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host has no resolvable domain.
    fn app_domain(&self, host: &Self::Host) -> Result<Self::AppDomain>;

    /// Obtains the metadata host used to locate and create runtimes.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata host can not be created.
    fn meta_host(&self) -> Result<Self::MetaHost>;

    /// Releases an application domain handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the native release call failed.
    fn release_app_domain(&self, domain: Self::AppDomain) -> Result<()>;

    /// Releases the runtime host handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the native release call failed.
    fn release_host(&self, host: Self::Host) -> Result<()>;

    /// Releases an entry point handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the native release call failed.
    fn release_method(&self, method: Self::Method) -> Result<()>;

    /// Releases the metadata host handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the native release call failed.
    fn release_meta_host(&self, meta_host: Self::MetaHost) -> Result<()>;
}
