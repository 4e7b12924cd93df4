use thiserror::Error;

#[allow(unused_macros)]
macro_rules! hresult_error {
    // Call name only
    ($call:expr, $hr:expr) => {
        crate::Error::Hresult {
            call: $call,
            hresult: $hr,
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants mirror the lifecycle of a hosted runtime: starting the host, loading an
/// assembly into it, redirecting its standard streams and releasing the native handles again.
/// Only [`Error::HostUnavailable`] and [`Error::LoadFailure`] ever reach the caller of
/// [`crate::RuntimeContext::load`]; redirection and release failures are logged and swallowed
/// at the point where they happen.
///
/// # Error Categories
///
/// ## Lifecycle Errors
/// - [`Error::HostUnavailable`] - The runtime host could not be started
/// - [`Error::LoadFailure`] - The bytes could not be loaded as an assembly
/// - [`Error::Redirect`] - Standard output/error could not be captured
/// - [`Error::Release`] - A native handle could not be released
///
/// ## Native Errors
/// - [`Error::Runtime`] - The requested runtime version is missing or not loadable
/// - [`Error::Hresult`] - A COM call returned a failing `HRESULT`
///
/// # Examples
///
/// ```rust,ignore
/// use clrloader::{ClrConfig, Error};
///
/// match context.load(&bytes, &["--help"], &ClrConfig::default()) {
///     Ok(output) => println!("{}", output),
///     Err(Error::HostUnavailable { runtime }) => eprintln!("no CLR for '{}'", runtime),
///     Err(Error::LoadFailure(message)) => eprintln!("not an assembly: {}", message),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The runtime host could not be started.
    ///
    /// Either the CLR failed to start during the first acquisition, or an earlier acquisition
    /// failed and the failure was remembered. No retry happens until the context is torn down.
    #[error("Could not load CLR runtime host for '{runtime}'")]
    HostUnavailable {
        /// The runtime version selector that was requested
        runtime: String,
    },

    /// The byte buffer could not be loaded as an assembly.
    ///
    /// Covers buffers that are not valid assemblies as well as assemblies without a resolvable
    /// entry point. Nothing is cached for a buffer that failed to load.
    #[error("Could not load assembly - {0}")]
    LoadFailure(String),

    /// Redirecting the standard streams of the hosted runtime failed.
    ///
    /// Never returned from a load; the invocation simply runs without captured output.
    #[error("Could not redirect stdout/stderr - {0}")]
    Redirect(String),

    /// The requested runtime version is not installed or can not be loaded.
    #[error("Runtime '{runtime}' is not usable - {message}")]
    Runtime {
        /// The runtime version selector that was requested
        runtime: String,
        /// Why the runtime was rejected
        message: String,
    },

    /// A native COM call returned a failing `HRESULT`.
    ///
    /// # Fields
    ///
    /// * `call` - Name of the native call that failed
    /// * `hresult` - The raw `HRESULT` value
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("{call} failed with HRESULT 0x{hresult:08X} - {file}:{line}")]
    Hresult {
        /// The native call which failed
        call: &'static str,
        /// The returned status code
        hresult: u32,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Releasing a native handle failed.
    #[error("Release failed - {0}")]
    Release(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
