//! Lane body selection module.
//!
//! This module defines which implementation of the numeric lane operations
//! executes a bound routine, and reports optional capabilities of the build.
//!
//! # Supported Backends
//!
//! - `Portable` — Plain Rust 16-lane bodies that the compiler auto-vectorizes.
//! - `Simd` — Hand-written AVX2 bodies (when built with the `simd` feature for
//!   an `avx2` target); otherwise identical to `Portable`.
//!
//! Both backends produce bit-identical results. The backend is stored globally
//! using an `AtomicU8` and read once per kernel `run` call.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of lane body implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Backend {
    /// Portable Rust lane bodies.
    Portable = 0,
    /// Explicit SIMD lane bodies where compiled in (default).
    #[default]
    Simd,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Portable),
            1 => Ok(Self::Simd),
            _ => Err(()),
        }
    }
}

/// Internal global state for the active backend.
static GLOBAL_BACKEND: AtomicU8 = AtomicU8::new(Backend::Simd as u8);

/// Sets the lane body implementation used by subsequent `run` calls.
///
/// # Example
///
/// ```
/// use briny_arith::backend::{set_backend, Backend};
/// set_backend(Backend::Portable);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the currently active backend.
///
/// If the stored value is invalid, defaults to [`Backend::Simd`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

/// Whether explicit SIMD lane bodies were compiled into this build.
pub const fn simd_compiled() -> bool {
    cfg!(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))
}

/// Whether half-precision subtraction routines are available.
///
/// Controlled by the `fp16` feature; when it is off the F16 rows are absent
/// from the dispatch matrix and configuring them fails.
pub const fn fp16_supported() -> bool {
    cfg!(feature = "fp16")
}
