//! # Subtraction Operation Layer
//!
//! This module holds the two halves of the elementwise subtraction core.
//!
//! ## Submodules
//!
//! - [`dispatch`] — the static Type Dispatch Matrix: `(dtype1, dtype2, dtype_out,
//!   policy)` to routine
//! - [`cpu`] — the numeric lane operations behind each routine, portable and SIMD
//!
//! ## Extending the Matrix
//!
//! 1. Add a lane body to `cpu::portable` (and `cpu::simd` when intrinsics help)
//! 2. Add a `SubRoutine` variant and launch it in `SubRoutine::execute`
//! 3. Add its keys to the dispatch table, one per policy
//!
//! ## Feature Flags
//!
//! - `simd` — Enables AVX2 lane bodies (on `avx2` targets)
//! - `fp16` — Adds the half-precision rows to the dispatch matrix

pub mod cpu;
pub mod dispatch;
