// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
//#![deny(unsafe_code)]
// - 'backend/windows' talks to mscoree.dll, oleaut32.dll and kernel32.dll through raw FFI

//! # clrloader
//!
//! Load and run .NET assemblies straight from memory by hosting the Common Language Runtime
//! inside the current process. An assembly is handed over as a byte buffer, its entry point is
//! invoked with string arguments, and whatever it printed to standard output and error comes
//! back as text. Nothing is written to disk.
//!
//! ## Features
//!
//! - **🧠 Lazy runtime start** - The CLR is started on first use, exactly once, no matter how many
//!   threads race for it
//! - **♻️ Content-addressed reuse** - Byte-identical assemblies are loaded only once; the SHA-256
//!   of the buffer identifies them
//! - **🧹 Ordered teardown** - Every native handle is released in a fixed, parent-last order, and a
//!   failing release never stops the others
//! - **🔌 Pluggable backend** - All native calls sit behind [`ClrBackend`], so the lifecycle logic is
//!   testable anywhere
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use clrloader::prelude::*;
//!
//! let mut context = RuntimeContext::new(WindowsBackend::new());
//! let config = ClrConfig::v4();
//!
//! let bytes = std::fs::read("hello.exe")?;
//! let output = context.load(&bytes, &["world"], &config)?;
//! println!("{}", output);
//!
//! // The second load of the same bytes reuses the cached entry point
//! let output = context.load(&bytes, &[""], &config)?;
//!
//! context.teardown(&config);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`RuntimeContext`] - Owns the backend, the lazily started host and the assembly cache
//! - [`host`] - The start-once host cell
//! - [`cache`] - Assemblies keyed by the SHA-256 of their bytes
//! - [`backend`] - The native seam and the Windows implementation
//! - [`config`] - Runtime selection and diagnostics switch
//! - [`Error`] and [`Result`] - Error handling
//!
//! ### Loading
//!
//! [`RuntimeContext::load`] acquires the host (starting it on first use), looks the bytes up in
//! the cache, loads them on a miss, normalizes the arguments with [`normalize_arguments`] and
//! invokes the entry point. The returned text is stdout, a newline, then stderr.
//!
//! ### Teardown
//!
//! [`RuntimeContext::teardown`] releases the application domain, the runtime host, every cached
//! entry point and finally the metadata host. It needs `&mut self`, so no load can be running
//! while it happens. Afterwards the context is as good as new.
//!
//! ## Logging
//!
//! Lifecycle diagnostics are emitted through [`tracing`] when [`ClrConfig::debug`] is set. Install
//! any subscriber to see them; with the flag off nothing is emitted.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result):
//!
//! ```rust,ignore
//! use clrloader::{ClrConfig, Error};
//!
//! match context.load(&bytes, &["-h"], &ClrConfig::default()) {
//!     Ok(output) => println!("{}", output),
//!     Err(Error::HostUnavailable { runtime }) => println!("No runtime for {}", runtime),
//!     Err(Error::LoadFailure(message)) => println!("Not loadable: {}", message),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,ignore
/// use clrloader::prelude::*;
///
/// let context = RuntimeContext::new(WindowsBackend::new());
/// let output = context.load(&bytes, &["world"], &ClrConfig::v4())?;
/// ```
pub mod prelude;

/// Native runtime backends
///
/// The [`backend::ClrBackend`] trait lists every native operation the lifecycle core needs:
/// starting a runtime, redirecting its output, loading and invoking assemblies and releasing
/// each kind of handle. On Windows, `WindowsBackend` implements it on top of `mscoree.dll`.
pub mod backend;

/// Content-addressed cache of loaded assemblies
///
/// # Key Types
///
/// - [`cache::ContentHash`] - SHA-256 digest of an assembly buffer
/// - [`cache::AssemblyRecord`] - An entry point handle and its digest
/// - [`cache::AssemblyCache`] - Insertion-ordered records, no two with the same digest
pub mod cache;

/// Runtime selection and diagnostics configuration
pub mod config;

/// The runtime context: loading, invoking and tearing down
pub mod context;

/// The start-once runtime host cell
pub mod host;

/// `clrloader` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `clrloader` Error type
///
/// The main error type for all operations in this crate. Only host start-up and assembly
/// loading failures are ever returned from a load; everything else is logged.
pub use error::Error;

/// The runtime context owning host, cache and backend.
pub use context::{normalize_arguments, RuntimeContext, TeardownReport, TeardownStep};

/// The native backend seam and its invocation output.
pub use backend::{CapturedOutput, ClrBackend};

/// The Windows `mscoree.dll` backend.
#[cfg(windows)]
pub use backend::WindowsBackend;

/// Cache and host building blocks.
pub use cache::{AssemblyCache, AssemblyRecord, ContentHash};
pub use config::ClrConfig;
pub use host::RuntimeHost;
