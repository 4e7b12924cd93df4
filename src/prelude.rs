//! # clrloader Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the clrloader library. Import this module to get quick access to everything needed to
//! load and run an assembly.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all clrloader operations
pub use crate::Error;

/// The result type used throughout clrloader
pub use crate::Result;

/// Runtime version selection and diagnostics
pub use crate::ClrConfig;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The runtime context and its teardown outcome
pub use crate::{RuntimeContext, TeardownReport, TeardownStep};

/// Argument list normalization applied before every invocation
pub use crate::normalize_arguments;

// ================================================================================================
// Backends
// ================================================================================================

/// The native seam and the output of one invocation
pub use crate::{CapturedOutput, ClrBackend};

/// Hosting through mscoree.dll
#[cfg(windows)]
pub use crate::WindowsBackend;

// ================================================================================================
// Cache
// ================================================================================================

/// Content digest identifying an assembly buffer
pub use crate::ContentHash;
