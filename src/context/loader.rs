//! Loading assembly bytes and invoking their entry point.

use crate::{backend::ClrBackend, config::ClrConfig, Result};

use super::RuntimeContext;

/// Normalizes an argument list before it is handed to an entry point.
///
/// A list holding exactly one empty string is replaced by a list holding one space. The native
/// invocation treats a lone empty argument as "no arguments" and then fails to bind to
/// `Main(string[])`. Every other list, including the empty one, passes through unchanged.
///
/// # Examples
///
/// ```rust
/// use clrloader::normalize_arguments;
///
/// assert_eq!(normalize_arguments(&[""]), vec![" "]);
/// assert!(normalize_arguments::<&str>(&[]).is_empty());
/// assert_eq!(normalize_arguments(&["x", "y"]), vec!["x", "y"]);
/// ```
pub fn normalize_arguments<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    match args {
        [only] if only.as_ref().is_empty() => vec![" ".to_string()],
        _ => args.iter().map(|arg| arg.as_ref().to_string()).collect(),
    }
}

impl<B: ClrBackend> RuntimeContext<B> {
    /// Loads `bytes` as an assembly, invokes its entry point with `args` and returns the
    /// captured output.
    ///
    /// Byte-identical buffers are loaded only once: later calls reuse the cached entry point.
    /// A freshly loaded assembly is cached before it is invoked. The returned text is the
    /// captured standard output, a newline and the captured standard error; both are empty when
    /// redirection never succeeded. The exit behaviour of the invoked program does not turn
    /// into an error here.
    ///
    /// # Arguments
    ///
    /// * `bytes` - The raw assembly image
    /// * `args` - Arguments for the entry point, see [`normalize_arguments`]
    /// * `config` - Runtime selector used if the host is not started yet, and the debug flag
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::HostUnavailable`] if the runtime can not be started, or the
    /// backend's error unchanged if `bytes` could not be loaded. Nothing is cached in either case.
    pub fn load<S: AsRef<str>>(
        &self,
        bytes: &[u8],
        args: &[S],
        config: &ClrConfig,
    ) -> Result<String> {
        let host = self.acquire_host(config)?;

        let (record, loaded) = lock!(self.assemblies).get_or_try_insert_with(bytes, || {
            debug_log!(config.debug, size = bytes.len(), "Loading assembly");
            self.backend
                .load_assembly(host, bytes)
                .inspect_err(|error| {
                    debug_log!(config.debug, warn, %error, "could not load assembly");
                })
        })?;

        let args = normalize_arguments(args);
        debug_log!(config.debug, hash = %record.hash(), loaded, "Assembly loaded");
        debug_log!(config.debug, ?args, "Calling assembly with args");

        let output = self.backend.invoke(record.method(), &args);
        debug_log!(
            config.debug,
            stdout = %output.stdout,
            stderr = %output.stderr,
            "Got output"
        );

        Ok(output.joined())
    }
}
