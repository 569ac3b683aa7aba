//! Elementwise subtraction kernel
//!
//! # Kernel Lifecycle
//!
//! An [`ArithmeticSubtractionKernel`] goes through two phases:
//!
//! 1. `configure` validates the three tensors, completes the output's
//!    metadata where it is unset, binds exactly one [`SubRoutine`] from the
//!    dispatch matrix and fixes the maximal iteration window
//! 2. `run` executes the bound routine over any sub-window of that window,
//!    as many times as needed, possibly from several workers at once
//!
//! Configuration happens once per kernel. A failed `configure` leaves the
//! kernel unconfigured, so a later `run` fails with
//! [`KernelError::NotConfigured`].
//!
//! ## Output auto-initialisation
//!
//! | inputs | unset output becomes |
//! |---|---|
//! | either is S16 or QS16 | S16 |
//! | else either is F16 | F16 |
//! | else either is F32 | F32 |
//! | otherwise | left unset (rejected) |
//!
//! An unset shape is taken from `input1`.
//!
//! QS16 counts as 16-bit in the first row, so a QS16 pair derives an S16
//! output, which the fixed-point rule then rejects. QS16 outputs must be set
//! explicitly.
//!
//! ## Concurrency
//!
//! The output is borrowed mutably for the kernel's lifetime, so nothing else
//! can touch it while the kernel exists. [`CpuKernel::run`] takes `&self` and
//! may be called from several threads as long as their windows write
//! disjoint output coordinates; [`crate::scheduler::Scheduler`] does exactly
//! that.
//!
//! ## Example
//!
//! ```rust
//! use briny_arith::kernel::ArithmeticSubtractionKernel;
//! use briny_arith::ops::dispatch::ConvertPolicy;
//! use briny_arith::tensors::{DataType, Tensor, TensorInfo, TensorShape};
//!
//! let info = TensorInfo::new(TensorShape::new(&[4]), DataType::U8);
//! let a = Tensor::from_slice(info.clone(), &[5u8, 10, 200, 0]).unwrap();
//! let b = Tensor::from_slice(info, &[10u8, 5, 100, 1]).unwrap();
//! let mut out = Tensor::new(TensorInfo::new(TensorShape::new(&[4]), DataType::U8)).unwrap();
//!
//! let mut kernel = ArithmeticSubtractionKernel::default();
//! kernel.configure(&a, &b, &mut out, ConvertPolicy::Wrap).unwrap();
//! let window = *kernel.configured_window().unwrap();
//! kernel.run_exclusive(&window).unwrap();
//! drop(kernel);
//!
//! assert_eq!(out.to_vec::<u8>().unwrap(), vec![251, 5, 100, 255]);
//! ```

use briny::prelude::Validate;
use log::{debug, trace, warn};

use crate::backend::{get_backend, simd_compiled};
use crate::error::{KernelError, Result};
use crate::ops::cpu::LANES;
use crate::ops::dispatch::{ConvertPolicy, DispatchKey, SubRoutine, lookup};
use crate::tensors::{DataType, Tensor, TensorInfo};
use crate::window::{
    AccessWindowHorizontal, Steps, ThreadInfo, Window, calculate_max_window,
    intersect_valid_regions,
};

/// A kernel that a scheduler can partition and run.
pub trait CpuKernel: Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// The window fixed at configuration time; schedulers may only run
    /// sub-windows of it.
    fn window(&self) -> Result<&Window>;

    /// Executes the kernel over `window`.
    ///
    /// # Errors
    /// - [`KernelError::NotConfigured`] before a successful configuration
    /// - [`KernelError::InvalidSubWindow`] if `window` is not a sub-window of
    ///   [`CpuKernel::window`]
    ///
    /// # Safety
    /// Calls that overlap in time must use windows whose output coordinates
    /// are disjoint.
    unsafe fn run(&self, window: &Window, info: &ThreadInfo) -> Result<()>;
}

/// Everything fixed by a successful `configure`.
#[derive(Debug)]
struct Binding<'a> {
    input1: &'a Tensor,
    input2: &'a Tensor,
    output: &'a mut Tensor,
    key: DispatchKey,
    routine: SubRoutine,
    window: Window,
}

/// Computes `output = input1 - input2` elementwise under a [`ConvertPolicy`].
#[derive(Debug, Default)]
pub struct ArithmeticSubtractionKernel<'a> {
    binding: Option<Binding<'a>>,
}

impl<'a> ArithmeticSubtractionKernel<'a> {
    const NAME: &'static str = "ArithmeticSubtractionKernel";

    /// An unconfigured kernel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the tensors and binds the matching subtraction routine.
    ///
    /// Unset output metadata is completed first (see the module docs). The
    /// output padding is grown so full 16-element runs fit, unless its
    /// storage already exists; in that case the last run of each row is
    /// narrowed instead.
    ///
    /// # Errors
    /// - [`KernelError::AlreadyConfigured`] on a second call
    /// - every error of [`validate`]
    /// - [`KernelError::InvalidTensorInfo`] if the output needs new metadata
    ///   but its storage is already materialized
    pub fn configure(
        &mut self,
        input1: &'a Tensor,
        input2: &'a Tensor,
        output: &'a mut Tensor,
        policy: ConvertPolicy,
    ) -> Result<()> {
        if self.binding.is_some() {
            warn!("{}: configure called twice", Self::NAME);
            return Err(KernelError::AlreadyConfigured);
        }
        match bind(input1, input2, output, policy) {
            Ok(binding) => {
                debug!(
                    "{}: bound {} over {} (explicit SIMD compiled: {})",
                    Self::NAME,
                    binding.key,
                    binding.window,
                    simd_compiled()
                );
                self.binding = Some(binding);
                Ok(())
            }
            Err(e) => {
                warn!("{}: configure failed: {e}", Self::NAME);
                Err(e)
            }
        }
    }

    /// Whether `configure` has succeeded.
    pub fn is_configured(&self) -> bool {
        self.binding.is_some()
    }

    /// Key of the bound routine, once configured.
    pub fn dispatch_key(&self) -> Option<DispatchKey> {
        self.binding.as_ref().map(|b| b.key)
    }

    /// The routine bound by `configure`, if any.
    pub fn routine(&self) -> Option<SubRoutine> {
        self.binding.as_ref().map(|b| b.routine)
    }

    /// The maximal window computed by `configure`.
    pub fn configured_window(&self) -> Result<&Window> {
        self.binding
            .as_ref()
            .map(|b| &b.window)
            .ok_or(KernelError::NotConfigured)
    }

    /// Runs over `window` from the only caller there can be.
    pub fn run_exclusive(&mut self, window: &Window) -> Result<()> {
        // SAFETY: `&mut self` rules out any overlapping `run`.
        unsafe { self.run(window, &ThreadInfo::default()) }
    }
}

impl CpuKernel for ArithmeticSubtractionKernel<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn window(&self) -> Result<&Window> {
        self.configured_window()
    }

    unsafe fn run(&self, window: &Window, info: &ThreadInfo) -> Result<()> {
        let Some(binding) = &self.binding else {
            warn!("{}: run called before configure", Self::NAME);
            return Err(KernelError::NotConfigured);
        };
        if !window.is_sub_window_of(&binding.window) {
            warn!(
                "{}: window {window} is outside the configured {}",
                Self::NAME,
                binding.window
            );
            return Err(KernelError::InvalidSubWindow {
                window: *window,
                configured: binding.window,
            });
        }
        trace!(
            "{}: {} over {window} (worker {}/{})",
            Self::NAME,
            binding.key,
            info.thread_id,
            info.num_threads
        );
        if window.is_empty() {
            return Ok(());
        }
        // SAFETY: the window is inside the configured one, the tensors carry
        // the types the routine was bound for, and overlapping callers write
        // disjoint coordinates per this method's contract.
        unsafe {
            binding.routine.execute(
                binding.input1,
                binding.input2,
                &*binding.output,
                window,
                get_backend(),
            );
        }
        Ok(())
    }
}

/// Checks that the three tensors can be subtracted under `policy` and
/// returns the routine `configure` would bind.
///
/// Works on copies: `output` is auto-initialised the same way `configure`
/// does it, but nothing is written back.
///
/// # Errors
/// - [`KernelError::MissingMetadata`] if an input has no shape or data type
/// - [`KernelError::InvalidTensorInfo`] if a fixed-point position does not
///   fit its data type (the check `Tensor::new` applies)
/// - [`KernelError::ShapeMismatch`] if the three shapes differ
/// - [`KernelError::UnsupportedDataType`] for any type outside
///   `QS8, U8, QS16, S16, F16, F32`
/// - [`KernelError::InvalidNarrowing`] for a U8 output with a non-U8 input
/// - [`KernelError::FixedPointMismatch`] if fixed-point types or positions
///   disagree
/// - [`KernelError::UnsupportedCombination`] or
///   [`KernelError::CapabilityUnavailable`] from the dispatch lookup
pub fn validate(
    input1: &TensorInfo,
    input2: &TensorInfo,
    output: &TensorInfo,
    policy: ConvertPolicy,
) -> Result<SubRoutine> {
    prepare(input1, input2, output, policy).map(|(_, _, routine)| routine)
}

/// Output metadata after auto-initialisation, plus the bound key and routine.
fn prepare(
    input1: &TensorInfo,
    input2: &TensorInfo,
    output: &TensorInfo,
    policy: ConvertPolicy,
) -> Result<(TensorInfo, DispatchKey, SubRoutine)> {
    for (tensor, info) in [("input1", input1), ("input2", input2)] {
        if !info.is_initialized() {
            return Err(KernelError::MissingMetadata { tensor });
        }
    }
    for info in [input1, input2, output] {
        info.validate()
            .map_err(|_| KernelError::InvalidTensorInfo("fixed-point position out of range"))?;
    }

    let mut output = output.clone();
    auto_initialise(&mut output, input1, input2);

    if input1.shape() != input2.shape() || input1.shape() != output.shape() {
        return Err(KernelError::ShapeMismatch {
            input1: *input1.shape(),
            input2: *input2.shape(),
            output: *output.shape(),
        });
    }

    for (tensor, info) in [("input1", input1), ("input2", input2), ("output", &output)] {
        if !is_supported(info.data_type()) {
            return Err(KernelError::UnsupportedDataType {
                tensor,
                data_type: info.data_type(),
            });
        }
    }

    let (t1, t2, to) = (input1.data_type(), input2.data_type(), output.data_type());
    if to == DataType::U8 && (t1 != DataType::U8 || t2 != DataType::U8) {
        return Err(KernelError::InvalidNarrowing {
            input1: t1,
            input2: t2,
        });
    }

    let fixed = [input1, input2, &output].iter().any(|i| i.data_type().is_fixed_point());
    if fixed {
        let (p1, p2, po) = (
            input1.fixed_point_position(),
            input2.fixed_point_position(),
            output.fixed_point_position(),
        );
        if t1 != t2 || t1 != to || p1 != p2 || p1 != po {
            return Err(KernelError::FixedPointMismatch {
                input1: t1,
                pos1: p1,
                input2: t2,
                pos2: p2,
                output: to,
                pos_out: po,
            });
        }
    }

    let key = DispatchKey::new(t1, t2, to, policy);
    let routine = lookup(&key)?;
    Ok((output, key, routine))
}

fn auto_initialise(output: &mut TensorInfo, input1: &TensorInfo, input2: &TensorInfo) {
    output.set_shape_if_empty(input1.shape());

    let either = |dt: DataType| input1.data_type() == dt || input2.data_type() == dt;
    if either(DataType::S16) || either(DataType::QS16) {
        output.set_data_type_if_unknown(DataType::S16);
    } else if either(DataType::F16) {
        output.set_data_type_if_unknown(DataType::F16);
    } else if either(DataType::F32) {
        output.set_data_type_if_unknown(DataType::F32);
    }
}

fn is_supported(dt: DataType) -> bool {
    matches!(
        dt,
        DataType::QS8 | DataType::U8 | DataType::QS16 | DataType::S16 | DataType::F16 | DataType::F32
    )
}

fn bind<'a>(
    input1: &'a Tensor,
    input2: &'a Tensor,
    output: &'a mut Tensor,
    policy: ConvertPolicy,
) -> Result<Binding<'a>> {
    let (info, key, routine) = prepare(input1.info(), input2.info(), output.info(), policy)?;
    if *output.info() != info {
        let slot = output.info_mut().ok_or(KernelError::InvalidTensorInfo(
            "output storage exists but its shape or data type is unset",
        ))?;
        *slot = info;
    }

    let window = calculate_max_window(input1.info().shape(), &Steps::x(LANES));
    let access = AccessWindowHorizontal::new(0, LANES);

    for (name, tensor) in [("input1", input1), ("input2", input2)] {
        if !access.fits(tensor.info(), &window) {
            debug!("{name} has too little right padding for full runs; narrowing row tails");
        }
    }
    if !access.update_padding_if_needed(output, &window) {
        debug!("output storage is materialized without full-run padding; narrowing row tails");
    }

    let region = intersect_valid_regions(
        input1.info().valid_region(),
        input2.info().valid_region(),
    );
    access.set_valid_region(output, &window, &region);

    Ok(Binding {
        input1,
        input2,
        output,
        key,
        routine,
        window,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensors::{PaddingSize, TensorShape};
    use crate::window::{Coordinates, Dimension, ValidRegion};

    fn info(dims: &[usize], dt: DataType) -> TensorInfo {
        TensorInfo::new(TensorShape::new(dims), dt)
    }

    #[test]
    fn output_metadata_is_completed() {
        let mut out = Tensor::empty();
        let a = Tensor::new(info(&[20, 3], DataType::U8)).unwrap();
        let b = Tensor::new(info(&[20, 3], DataType::S16)).unwrap();
        let mut kernel = ArithmeticSubtractionKernel::new();
        kernel.configure(&a, &b, &mut out, ConvertPolicy::Saturate).unwrap();
        assert_eq!(kernel.routine(), Some(SubRoutine::U8S16S16Saturate));
        assert_eq!(
            kernel.dispatch_key().unwrap().to_string(),
            "sub_saturate_U8_S16_S16"
        );
        let window = *kernel.configured_window().unwrap();
        assert_eq!(window.x(), Dimension::new(0, 32, 16));
        drop(kernel);

        assert_eq!(out.info().shape(), &TensorShape::new(&[20, 3]));
        assert_eq!(out.info().data_type(), DataType::S16);
        assert_eq!(out.info().padding().right, 12);
    }

    #[test]
    fn u8_inputs_leave_unset_output_unset() {
        let a = info(&[4], DataType::U8);
        let err = validate(&a, &a, &TensorInfo::default(), ConvertPolicy::Wrap).unwrap_err();
        assert_eq!(
            err,
            KernelError::UnsupportedDataType {
                tensor: "output",
                data_type: DataType::Unknown
            }
        );
    }

    #[test]
    fn qs16_inputs_derive_s16_and_are_rejected() {
        let a = info(&[4], DataType::QS16).with_fixed_point_position(3);
        let err = validate(&a, &a, &TensorInfo::default(), ConvertPolicy::Wrap).unwrap_err();
        assert!(matches!(err, KernelError::FixedPointMismatch { output: DataType::S16, .. }));

        let out = a.clone();
        assert_eq!(
            validate(&a, &a, &out, ConvertPolicy::Wrap),
            Ok(SubRoutine::S16Wrap)
        );
    }

    #[test]
    fn inputs_need_metadata() {
        let a = info(&[4], DataType::F32);
        let err = validate(&TensorInfo::default(), &a, &a, ConvertPolicy::Wrap).unwrap_err();
        assert_eq!(err, KernelError::MissingMetadata { tensor: "input1" });
        let err = validate(&a, &info(&[4], DataType::Unknown), &a, ConvertPolicy::Wrap).unwrap_err();
        assert_eq!(err, KernelError::MissingMetadata { tensor: "input2" });
    }

    #[test]
    fn fixed_point_position_must_fit_its_type() {
        let good = info(&[4], DataType::QS8).with_fixed_point_position(4);
        for position in [0, 8, 9] {
            let bad = info(&[4], DataType::QS8).with_fixed_point_position(position);
            for (a, b, o) in [(&bad, &good, &good), (&good, &bad, &good), (&good, &good, &bad)] {
                assert_eq!(
                    validate(a, b, o, ConvertPolicy::Wrap),
                    Err(KernelError::InvalidTensorInfo("fixed-point position out of range"))
                );
            }
        }
        let stray = info(&[4], DataType::F32).with_fixed_point_position(2);
        let f = info(&[4], DataType::F32);
        assert!(matches!(
            validate(&stray, &f, &f, ConvertPolicy::Wrap),
            Err(KernelError::InvalidTensorInfo(_))
        ));
        assert_eq!(validate(&good, &good, &good, ConvertPolicy::Wrap), Ok(SubRoutine::Qs8Wrap));
    }

    #[test]
    fn shape_checked_before_types() {
        let a = info(&[4], DataType::F64);
        let b = info(&[5], DataType::F64);
        let err = validate(&a, &b, &a, ConvertPolicy::Wrap).unwrap_err();
        assert!(matches!(err, KernelError::ShapeMismatch { .. }));
        let err = validate(&a, &a, &a, ConvertPolicy::Wrap).unwrap_err();
        assert!(matches!(err, KernelError::UnsupportedDataType { tensor: "input1", .. }));
    }

    #[test]
    fn second_configure_is_rejected() {
        let a = Tensor::new(info(&[8], DataType::F32)).unwrap();
        let mut out = Tensor::empty();
        let mut again = Tensor::empty();
        let mut kernel = ArithmeticSubtractionKernel::new();
        kernel.configure(&a, &a, &mut out, ConvertPolicy::Wrap).unwrap();
        assert_eq!(
            kernel.configure(&a, &a, &mut again, ConvertPolicy::Saturate),
            Err(KernelError::AlreadyConfigured)
        );
        assert_eq!(kernel.routine(), Some(SubRoutine::F32));
    }

    #[test]
    fn failed_configure_leaves_kernel_unusable() {
        let a = Tensor::new(info(&[8], DataType::F32)).unwrap();
        let mut out = Tensor::new(info(&[8], DataType::U8)).unwrap();
        let mut kernel = ArithmeticSubtractionKernel::new();
        let err = kernel.configure(&a, &a, &mut out, ConvertPolicy::Wrap);
        assert_eq!(
            err,
            Err(KernelError::InvalidNarrowing {
                input1: DataType::F32,
                input2: DataType::F32
            })
        );
        assert!(!kernel.is_configured());
        let window = Window::default();
        assert_eq!(kernel.run_exclusive(&window), Err(KernelError::NotConfigured));
        assert_eq!(kernel.window().unwrap_err(), KernelError::NotConfigured);
    }

    #[test]
    fn output_valid_region_is_input_intersection() {
        let mut a = Tensor::new(info(&[20, 4], DataType::F32)).unwrap();
        a.set_valid_region(ValidRegion::new(
            Coordinates::new(&[2, 0]),
            TensorShape::new(&[18, 4]),
        ));
        let mut b = Tensor::new(info(&[20, 4], DataType::F32)).unwrap();
        b.set_valid_region(ValidRegion::new(
            Coordinates::new(&[0, 1]),
            TensorShape::new(&[20, 2]),
        ));
        let mut out = Tensor::empty();
        let mut kernel = ArithmeticSubtractionKernel::new();
        kernel.configure(&a, &b, &mut out, ConvertPolicy::Wrap).unwrap();
        drop(kernel);

        let region = out.info().valid_region();
        assert_eq!(region.anchor, Coordinates::new(&[2, 1]));
        assert_eq!(region.shape, TensorShape::new(&[18, 2]));
    }

    #[test]
    fn materialized_output_keeps_its_layout() {
        let shape = [20];
        let a = Tensor::from_slice(info(&shape, DataType::U8), &[7u8; 20]).unwrap();
        let b = Tensor::from_slice(info(&shape, DataType::U8), &[2u8; 20]).unwrap();
        let padded = info(&shape, DataType::U8).with_padding(PaddingSize {
            left: 3,
            ..PaddingSize::default()
        });
        let mut out = Tensor::from_slice(padded, &[0u8; 20]).unwrap();

        let mut kernel = ArithmeticSubtractionKernel::new();
        kernel.configure(&a, &b, &mut out, ConvertPolicy::Wrap).unwrap();
        let window = *kernel.configured_window().unwrap();
        kernel.run_exclusive(&window).unwrap();
        drop(kernel);

        assert_eq!(out.info().padding().right, 0);
        assert_eq!(out.to_vec::<u8>().unwrap(), vec![5u8; 20]);
    }
}
