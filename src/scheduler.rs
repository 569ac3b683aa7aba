//! Parallel execution of configured kernels.
//!
//! The [`Scheduler`] cuts a kernel's window into disjoint slices along one
//! dimension and runs each slice on the rayon thread pool. Slices never share
//! output coordinates, which is the condition [`CpuKernel::run`] needs for
//! concurrent calls.
//!
//! ```rust
//! use briny_arith::kernel::ArithmeticSubtractionKernel;
//! use briny_arith::ops::dispatch::ConvertPolicy;
//! use briny_arith::scheduler::Scheduler;
//! use briny_arith::tensors::{DataType, Tensor, TensorInfo, TensorShape};
//! use briny_arith::window::Window;
//!
//! let info = TensorInfo::new(TensorShape::new(&[40, 8]), DataType::F32);
//! let a = Tensor::from_slice(info.clone(), &[3.0f32; 320]).unwrap();
//! let b = Tensor::from_slice(info, &[0.5f32; 320]).unwrap();
//! let mut out = Tensor::empty();
//!
//! let mut kernel = ArithmeticSubtractionKernel::new();
//! kernel.configure(&a, &b, &mut out, ConvertPolicy::Wrap).unwrap();
//! Scheduler::new(4).schedule(&mut kernel, Window::DIM_Y).unwrap();
//! drop(kernel);
//!
//! assert!(out.to_vec::<f32>().unwrap().iter().all(|&v| v == 2.5));
//! ```

use log::{debug, warn};
use rayon::prelude::*;

use crate::error::{KernelError, Result};
use crate::kernel::CpuKernel;
use crate::tensors::MAX_DIMS;
use crate::window::ThreadInfo;

/// Splits kernel windows across a fixed number of workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    num_threads: usize,
}

impl Default for Scheduler {
    /// One worker per thread of the current rayon pool.
    fn default() -> Self {
        Self::new(rayon::current_num_threads())
    }
}

impl Scheduler {
    /// A scheduler using at most `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    /// Upper bound on the number of slices one `schedule` call runs.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `kernel` over its whole window, split along `split_dim`.
    ///
    /// The kernel is borrowed mutably so that no other run can overlap with
    /// the ones started here. A window with a single iteration along
    /// `split_dim` is run inline on the calling thread.
    ///
    /// # Errors
    /// - [`KernelError::InvalidSplitDimension`] if `split_dim` is not below
    ///   [`MAX_DIMS`]
    /// - the kernel's own error if it is not configured
    /// - otherwise the first error reported by any slice
    pub fn schedule(&self, kernel: &mut dyn CpuKernel, split_dim: usize) -> Result<()> {
        let kernel: &dyn CpuKernel = kernel;
        if split_dim >= MAX_DIMS {
            warn!("{}: split dimension {split_dim} out of range", kernel.name());
            return Err(KernelError::InvalidSplitDimension { dim: split_dim });
        }
        let window = *kernel.window()?;
        let parts = self.num_threads.min(window.num_iterations(split_dim));

        if parts <= 1 {
            // SAFETY: the kernel is borrowed exclusively and run once.
            return unsafe { kernel.run(&window, &ThreadInfo::default()) };
        }

        debug!(
            "{}: splitting {window} along dimension {split_dim} into {parts} slices",
            kernel.name()
        );
        (0..parts).into_par_iter().try_for_each(|id| {
            let slice = window.split_window(split_dim, id, parts);
            let info = ThreadInfo {
                thread_id: id,
                num_threads: parts,
            };
            // SAFETY: slices of one split are disjoint, and nothing outside
            // this call can run the exclusively borrowed kernel meanwhile.
            unsafe { kernel.run(&slice, &info) }
        })
    }
}
