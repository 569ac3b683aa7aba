//! briny_arith: elementwise tensor subtraction for CPU backends.
//!
//! Computes `output = input1 - input2` over tensors of identical shape, with
//! a configurable overflow policy and a fixed matrix of supported element
//! type combinations.
//!
//! # Features
//!
//! - Wrap and saturate policies for 8- and 16-bit integer and fixed-point types
//! - Mixed-width routines that widen `u8` operands to `i16`
//! - Half and single precision floats (both policies are plain IEEE subtraction)
//! - 16-lane bodies, with AVX2 versions behind the `simd` feature
//! - Kernels that can be run concurrently over disjoint sub-windows
//!
//! # Modules
//!
//! - [`tensors`] — Tensor metadata and storage.
//! - [`window`] — Iteration windows, valid regions and access patterns.
//! - [`ops`] — Lane operations and the type dispatch matrix.
//! - [`kernel`] — Configuration and execution of the subtraction kernel.
//! - [`scheduler`] — Rayon-backed parallel execution.
//! - [`backend`] — Portable/SIMD selection and capability queries.
//! - [`error`] — The crate's error type.
//!
//! # Example
//!
//! ```rust
//! use briny_arith::prelude::*;
//!
//! let info = TensorInfo::new(TensorShape::new(&[3]), DataType::U8);
//! let a = Tensor::from_slice(info.clone(), &[5u8, 0, 255]).unwrap();
//! let b = Tensor::from_slice(info, &[10u8, 1, 255]).unwrap();
//! let mut out = Tensor::new(TensorInfo::new(TensorShape::new(&[3]), DataType::U8)).unwrap();
//!
//! let mut kernel = ArithmeticSubtractionKernel::new();
//! kernel.configure(&a, &b, &mut out, ConvertPolicy::Saturate).unwrap();
//! Scheduler::default().schedule(&mut kernel, Window::DIM_Y).unwrap();
//! drop(kernel);
//!
//! assert_eq!(out.to_vec::<u8>().unwrap(), vec![0, 0, 0]);
//! ```

pub mod backend;
pub mod error;
pub mod kernel;
pub mod ops;
pub mod scheduler;
pub mod tensors;
pub mod window;

/// The types needed to configure and run a kernel.
pub mod prelude {
    pub use crate::error::{KernelError, Result};
    pub use crate::kernel::{ArithmeticSubtractionKernel, CpuKernel};
    pub use crate::ops::dispatch::{ConvertPolicy, DispatchKey};
    pub use crate::scheduler::Scheduler;
    pub use crate::tensors::{DataType, Tensor, TensorInfo, TensorShape};
    pub use crate::window::Window;
}
