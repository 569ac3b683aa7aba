//! Numeric lane operations for elementwise subtraction
//!
//! # CPU Lane Ops
//!
//! Every routine bound by the dispatch matrix is made of two parts:
//!
//! - a lane body: a pure function from two 16-lane arrays to one 16-lane array,
//!   implementing wrap or saturate semantics for one type combination
//! - the window driver [`run_binary`], which walks a window, loads one run of
//!   up to 16 elements from each input, applies the body and stores the run
//!
//! ## Lane bodies
//!
//! - [`portable`] — plain Rust, auto-vectorized by the compiler
//! - [`simd`] — AVX2 intrinsics when built with `--features=simd` for an
//!   `avx2` target, otherwise re-exports of the portable bodies
//!
//! ## Semantics
//!
//! | body | result |
//! |---|---|
//! | `qs8_*`, `s16_*` | two's complement wrap, or clamp to the signed range |
//! | `u8_*` | mod 256, or clamp to `[0, 255]` |
//! | `u8_u8_s16_*`, `u8_s16_s16_*`, `s16_u8_s16_*` | `u8` operands zero-extended to `i16` first |
//! | `f16_sub`, `f32_sub` | IEEE subtraction, same for both policies |
//!
//! Fixed-point operands share their fractional bits, so Q-format subtraction is
//! plain integer subtraction of the stored values.
//!
//! ## Safety
//!
//! - SIMD bodies use `unsafe` loads/stores on the lane arrays only
//! - [`run_binary`] trusts the caller for window containment and for
//!   disjointness of concurrently written output coordinates

use core::ptr;

use half::f16;

use crate::backend::Backend;
use crate::ops::dispatch::SubRoutine;
use crate::tensors::{Element, Tensor};
use crate::window::{TensorIterator, Window};

/// Number of elements processed per vector operation.
pub const LANES: usize = 16;

/// One vector worth of elements.
pub type Lanes<T> = [T; LANES];

/// Largest element size handled by the lane loads and stores.
const MAX_ELEMENT_SIZE: usize = 4;

pub mod portable {
    //! Portable lane bodies.

    use super::{LANES, Lanes};
    use core::array;
    use half::f16;
    use half::slice::HalfFloatSliceExt;

    pub fn qs8_wrap(a: &Lanes<i8>, b: &Lanes<i8>) -> Lanes<i8> {
        array::from_fn(|i| a[i].wrapping_sub(b[i]))
    }

    pub fn qs8_saturate(a: &Lanes<i8>, b: &Lanes<i8>) -> Lanes<i8> {
        array::from_fn(|i| a[i].saturating_sub(b[i]))
    }

    pub fn u8_wrap(a: &Lanes<u8>, b: &Lanes<u8>) -> Lanes<u8> {
        array::from_fn(|i| a[i].wrapping_sub(b[i]))
    }

    pub fn u8_saturate(a: &Lanes<u8>, b: &Lanes<u8>) -> Lanes<u8> {
        array::from_fn(|i| a[i].saturating_sub(b[i]))
    }

    pub fn s16_wrap(a: &Lanes<i16>, b: &Lanes<i16>) -> Lanes<i16> {
        array::from_fn(|i| a[i].wrapping_sub(b[i]))
    }

    pub fn s16_saturate(a: &Lanes<i16>, b: &Lanes<i16>) -> Lanes<i16> {
        array::from_fn(|i| a[i].saturating_sub(b[i]))
    }

    pub fn u8_u8_s16_wrap(a: &Lanes<u8>, b: &Lanes<u8>) -> Lanes<i16> {
        array::from_fn(|i| i16::from(a[i]).wrapping_sub(i16::from(b[i])))
    }

    pub fn u8_u8_s16_saturate(a: &Lanes<u8>, b: &Lanes<u8>) -> Lanes<i16> {
        array::from_fn(|i| i16::from(a[i]).saturating_sub(i16::from(b[i])))
    }

    pub fn u8_s16_s16_wrap(a: &Lanes<u8>, b: &Lanes<i16>) -> Lanes<i16> {
        array::from_fn(|i| i16::from(a[i]).wrapping_sub(b[i]))
    }

    pub fn u8_s16_s16_saturate(a: &Lanes<u8>, b: &Lanes<i16>) -> Lanes<i16> {
        array::from_fn(|i| i16::from(a[i]).saturating_sub(b[i]))
    }

    pub fn s16_u8_s16_wrap(a: &Lanes<i16>, b: &Lanes<u8>) -> Lanes<i16> {
        array::from_fn(|i| a[i].wrapping_sub(i16::from(b[i])))
    }

    pub fn s16_u8_s16_saturate(a: &Lanes<i16>, b: &Lanes<u8>) -> Lanes<i16> {
        array::from_fn(|i| a[i].saturating_sub(i16::from(b[i])))
    }

    /// Half-precision subtraction, computed in `f32` and rounded once.
    ///
    /// `f32` carries more than twice the `f16` significand plus two bits, so
    /// the single rounding back to `f16` gives the correctly rounded result.
    pub fn f16_sub(a: &Lanes<f16>, b: &Lanes<f16>) -> Lanes<f16> {
        let mut fa = [0.0f32; LANES];
        let mut fb = [0.0f32; LANES];
        a.convert_to_f32_slice(&mut fa);
        b.convert_to_f32_slice(&mut fb);
        let diff: Lanes<f32> = array::from_fn(|i| fa[i] - fb[i]);
        let mut out = [f16::ZERO; LANES];
        out.convert_from_f32_slice(&diff);
        out
    }

    pub fn f32_sub(a: &Lanes<f32>, b: &Lanes<f32>) -> Lanes<f32> {
        array::from_fn(|i| a[i] - b[i])
    }
}

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
pub mod simd {
    //! AVX2 lane bodies.

    use super::{LANES, Lanes};
    use core::arch::x86_64::*;

    pub use super::portable::f16_sub;

    macro_rules! epi8_body {
        ($name:ident, $t:ty, $op:ident) => {
            pub fn $name(a: &Lanes<$t>, b: &Lanes<$t>) -> Lanes<$t> {
                let mut out = [0 as $t; LANES];
                // SAFETY: 16 one-byte lanes are exactly one unaligned __m128i.
                unsafe {
                    let va = _mm_loadu_si128(a.as_ptr() as *const __m128i);
                    let vb = _mm_loadu_si128(b.as_ptr() as *const __m128i);
                    _mm_storeu_si128(out.as_mut_ptr() as *mut __m128i, $op(va, vb));
                }
                out
            }
        };
    }

    epi8_body!(qs8_wrap, i8, _mm_sub_epi8);
    epi8_body!(qs8_saturate, i8, _mm_subs_epi8);
    epi8_body!(u8_wrap, u8, _mm_sub_epi8);
    epi8_body!(u8_saturate, u8, _mm_subs_epu8);

    pub fn s16_wrap(a: &Lanes<i16>, b: &Lanes<i16>) -> Lanes<i16> {
        let mut out = [0i16; LANES];
        // SAFETY: 16 two-byte lanes are exactly one unaligned __m256i.
        unsafe {
            let va = _mm256_loadu_si256(a.as_ptr() as *const __m256i);
            let vb = _mm256_loadu_si256(b.as_ptr() as *const __m256i);
            _mm256_storeu_si256(out.as_mut_ptr() as *mut __m256i, _mm256_sub_epi16(va, vb));
        }
        out
    }

    pub fn s16_saturate(a: &Lanes<i16>, b: &Lanes<i16>) -> Lanes<i16> {
        let mut out = [0i16; LANES];
        // SAFETY: as in `s16_wrap`.
        unsafe {
            let va = _mm256_loadu_si256(a.as_ptr() as *const __m256i);
            let vb = _mm256_loadu_si256(b.as_ptr() as *const __m256i);
            _mm256_storeu_si256(out.as_mut_ptr() as *mut __m256i, _mm256_subs_epi16(va, vb));
        }
        out
    }

    /// Zero-extends 16 `u8` lanes to 16 `i16` lanes.
    ///
    /// # Safety
    /// Requires AVX2, which this module is compiled for.
    unsafe fn widen_u8(a: &Lanes<u8>) -> __m256i {
        unsafe { _mm256_cvtepu8_epi16(_mm_loadu_si128(a.as_ptr() as *const __m128i)) }
    }

    /// # Safety
    /// Requires AVX2, which this module is compiled for.
    unsafe fn load_s16(a: &Lanes<i16>) -> __m256i {
        unsafe { _mm256_loadu_si256(a.as_ptr() as *const __m256i) }
    }

    fn store_s16(v: __m256i) -> Lanes<i16> {
        let mut out = [0i16; LANES];
        // SAFETY: `out` is exactly one __m256i wide.
        unsafe { _mm256_storeu_si256(out.as_mut_ptr() as *mut __m256i, v) };
        out
    }

    pub fn u8_u8_s16_wrap(a: &Lanes<u8>, b: &Lanes<u8>) -> Lanes<i16> {
        // SAFETY: AVX2 is enabled for this module.
        store_s16(unsafe { _mm256_sub_epi16(widen_u8(a), widen_u8(b)) })
    }

    pub fn u8_u8_s16_saturate(a: &Lanes<u8>, b: &Lanes<u8>) -> Lanes<i16> {
        // SAFETY: AVX2 is enabled for this module.
        store_s16(unsafe { _mm256_subs_epi16(widen_u8(a), widen_u8(b)) })
    }

    pub fn u8_s16_s16_wrap(a: &Lanes<u8>, b: &Lanes<i16>) -> Lanes<i16> {
        // SAFETY: AVX2 is enabled for this module.
        store_s16(unsafe { _mm256_sub_epi16(widen_u8(a), load_s16(b)) })
    }

    pub fn u8_s16_s16_saturate(a: &Lanes<u8>, b: &Lanes<i16>) -> Lanes<i16> {
        // SAFETY: AVX2 is enabled for this module.
        store_s16(unsafe { _mm256_subs_epi16(widen_u8(a), load_s16(b)) })
    }

    pub fn s16_u8_s16_wrap(a: &Lanes<i16>, b: &Lanes<u8>) -> Lanes<i16> {
        // SAFETY: AVX2 is enabled for this module.
        store_s16(unsafe { _mm256_sub_epi16(load_s16(a), widen_u8(b)) })
    }

    pub fn s16_u8_s16_saturate(a: &Lanes<i16>, b: &Lanes<u8>) -> Lanes<i16> {
        // SAFETY: AVX2 is enabled for this module.
        store_s16(unsafe { _mm256_subs_epi16(load_s16(a), widen_u8(b)) })
    }

    pub fn f32_sub(a: &Lanes<f32>, b: &Lanes<f32>) -> Lanes<f32> {
        let mut out = [0.0f32; LANES];
        // SAFETY: 16 f32 lanes are two unaligned __m256.
        unsafe {
            for half in 0..2 {
                let off = half * 8;
                let va = _mm256_loadu_ps(a.as_ptr().add(off));
                let vb = _mm256_loadu_ps(b.as_ptr().add(off));
                _mm256_storeu_ps(out.as_mut_ptr().add(off), _mm256_sub_ps(va, vb));
            }
        }
        out
    }
}

#[cfg(not(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2")))]
pub mod simd {
    //! No explicit SIMD in this build; the portable bodies are used.

    pub use super::portable::*;
}

/// Reads `len` elements starting at `src`; missing lanes are zero.
///
/// # Safety
/// `src` must be valid for reads of `len * T::SIZE` bytes.
unsafe fn load_lanes<T: Element>(src: *const u8, len: usize) -> Lanes<T> {
    let mut bytes = [0u8; LANES * MAX_ELEMENT_SIZE];
    // SAFETY: guaranteed by the caller; the stack buffer cannot overlap.
    unsafe { ptr::copy_nonoverlapping(src, bytes.as_mut_ptr(), len * T::SIZE) };
    core::array::from_fn(|i| T::read_ne(&bytes[i * T::SIZE..]))
}

/// Writes the first `len` lanes to `dst`.
///
/// # Safety
/// `dst` must be valid for writes of `len * T::SIZE` bytes and not be
/// accessed by anyone else meanwhile.
unsafe fn store_lanes<T: Element>(dst: *mut u8, lanes: &Lanes<T>, len: usize) {
    let mut bytes = [0u8; LANES * MAX_ELEMENT_SIZE];
    for (i, v) in lanes.iter().enumerate() {
        v.write_ne(&mut bytes[i * T::SIZE..]);
    }
    // SAFETY: guaranteed by the caller.
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, len * T::SIZE) };
}

/// Walks `window` and computes `out = body(in1, in2)` one run at a time.
///
/// Each run starts at a window coordinate and covers up to one window step
/// along dimension 0. A run is cut short where the window ends or where any
/// of the three tensors runs out of addressable row (shape plus right
/// padding), which makes the last run of an unpadded row a scalar-width tail.
///
/// # Safety
/// - `window` must lie inside the maximal window of the (equally shaped)
///   tensors, with dimension 0 starting at or after coordinate zero
/// - no other thread may access the output coordinates of `window` meanwhile
pub(crate) unsafe fn run_binary<A, B, O, F>(
    in1: &Tensor,
    in2: &Tensor,
    out: &Tensor,
    window: &Window,
    body: F,
) where
    A: Element,
    B: Element,
    O: Element,
    F: Fn(&Lanes<A>, &Lanes<B>) -> Lanes<O>,
{
    let it1 = TensorIterator::new(in1);
    let it2 = TensorIterator::new(in2);
    let ito = TensorIterator::new(out);

    let wx = window.x();
    let limit = in1
        .info()
        .accessible_x()
        .min(in2.info().accessible_x())
        .min(out.info().accessible_x()) as isize;
    let run = wx.step().min(LANES as isize);

    for id in window.iter() {
        let x = id[Window::DIM_X];
        let len = run.min(wx.end() - x).min(limit - x);
        if len <= 0 {
            continue;
        }
        let len = len as usize;
        // SAFETY: `id` is inside the tensors' shapes and `x + len` does not
        // pass the addressable row of any tensor, per the caller contract.
        unsafe {
            let a = load_lanes::<A>(it1.ptr(&id), len);
            let b = load_lanes::<B>(it2.ptr(&id), len);
            store_lanes::<O>(ito.ptr(&id), &body(&a, &b), len);
        }
    }
}

impl SubRoutine {
    /// Runs this routine over `window` with the lane bodies of `backend`.
    ///
    /// # Safety
    /// Same contract as [`run_binary`]; the tensors must also carry the data
    /// types this routine was selected for.
    pub(crate) unsafe fn execute(
        self,
        in1: &Tensor,
        in2: &Tensor,
        out: &Tensor,
        window: &Window,
        backend: Backend,
    ) {
        macro_rules! launch {
            ($a:ty, $b:ty, $o:ty, $body:ident) => {
                // SAFETY: forwarded from the caller.
                unsafe {
                    match backend {
                        Backend::Simd => {
                            run_binary::<$a, $b, $o, _>(in1, in2, out, window, simd::$body)
                        }
                        Backend::Portable => {
                            run_binary::<$a, $b, $o, _>(in1, in2, out, window, portable::$body)
                        }
                    }
                }
            };
        }

        match self {
            Self::Qs8Wrap => launch!(i8, i8, i8, qs8_wrap),
            Self::Qs8Saturate => launch!(i8, i8, i8, qs8_saturate),
            Self::U8Wrap => launch!(u8, u8, u8, u8_wrap),
            Self::U8Saturate => launch!(u8, u8, u8, u8_saturate),
            Self::U8U8S16Wrap => launch!(u8, u8, i16, u8_u8_s16_wrap),
            Self::U8U8S16Saturate => launch!(u8, u8, i16, u8_u8_s16_saturate),
            Self::U8S16S16Wrap => launch!(u8, i16, i16, u8_s16_s16_wrap),
            Self::U8S16S16Saturate => launch!(u8, i16, i16, u8_s16_s16_saturate),
            Self::S16U8S16Wrap => launch!(i16, u8, i16, s16_u8_s16_wrap),
            Self::S16U8S16Saturate => launch!(i16, u8, i16, s16_u8_s16_saturate),
            Self::S16Wrap => launch!(i16, i16, i16, s16_wrap),
            Self::S16Saturate => launch!(i16, i16, i16, s16_saturate),
            Self::F16 => launch!(f16, f16, f16, f16_sub),
            Self::F32 => launch!(f32, f32, f32, f32_sub),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs_u8() -> impl Iterator<Item = (Lanes<u8>, Lanes<u8>)> {
        (0..=255u8).map(|a| {
            let lhs = [a; LANES];
            let rhs = core::array::from_fn(|i| (i as u8).wrapping_mul(17).wrapping_add(a));
            (lhs, rhs)
        })
    }

    #[test]
    fn u8_policies_match_reference() {
        for (a, b) in pairs_u8() {
            let wrap = simd::u8_wrap(&a, &b);
            let sat = simd::u8_saturate(&a, &b);
            for i in 0..LANES {
                let exact = i32::from(a[i]) - i32::from(b[i]);
                assert_eq!(wrap[i], exact.rem_euclid(256) as u8);
                assert_eq!(sat[i], exact.clamp(0, 255) as u8);
            }
            assert_eq!(wrap, portable::u8_wrap(&a, &b));
            assert_eq!(sat, portable::u8_saturate(&a, &b));
        }
    }

    #[test]
    fn qs8_saturates_at_signed_bounds() {
        let a = [i8::MIN, i8::MAX, -1, 0, 5, -100, 100, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        let b = [1, -1, i8::MAX, i8::MIN, 10, 100, -100, 2, 0, 0, 0, 0, 0, 0, 0, 0];
        let sat = simd::qs8_saturate(&a, &b);
        assert_eq!(&sat[..8], &[i8::MIN, i8::MAX, -128, 127, -5, -128, 127, -1]);
        let wrap = simd::qs8_wrap(&a, &b);
        assert_eq!(&wrap[..4], &[i8::MAX, i8::MIN, -128, -128]);
        assert_eq!(sat, portable::qs8_saturate(&a, &b));
        assert_eq!(wrap, portable::qs8_wrap(&a, &b));
    }

    #[test]
    fn s16_saturates_at_signed_bounds() {
        let mut a = [0i16; LANES];
        let mut b = [0i16; LANES];
        a[0] = i16::MIN;
        b[0] = 1;
        a[1] = i16::MAX;
        b[1] = -1;
        a[2] = 1000;
        b[2] = 3000;
        assert_eq!(&simd::s16_saturate(&a, &b)[..3], &[i16::MIN, i16::MAX, -2000]);
        assert_eq!(&simd::s16_wrap(&a, &b)[..3], &[i16::MAX, i16::MIN, -2000]);
    }

    #[test]
    fn widening_zero_extends_u8() {
        let a = [200u8; LANES];
        let b = [50i16; LANES];
        assert_eq!(simd::u8_s16_s16_wrap(&a, &b), [150i16; LANES]);
        assert_eq!(simd::u8_s16_s16_saturate(&a, &b), [150i16; LANES]);

        let lo = [0u8; LANES];
        let hi = [255u8; LANES];
        assert_eq!(simd::u8_u8_s16_wrap(&lo, &hi), [-255i16; LANES]);
        assert_eq!(simd::u8_u8_s16_saturate(&hi, &lo), [255i16; LANES]);

        let big = [i16::MIN + 10; LANES];
        assert_eq!(simd::s16_u8_s16_saturate(&big, &hi), [i16::MIN; LANES]);
        assert_eq!(
            simd::s16_u8_s16_wrap(&big, &hi),
            [(i16::MIN + 10).wrapping_sub(255); LANES]
        );
        assert_eq!(simd::u8_s16_s16_saturate(&hi, &[i16::MIN; LANES]), [i16::MAX; LANES]);
    }

    #[test]
    fn f16_subtraction_is_correctly_rounded() {
        let a: Lanes<f16> = core::array::from_fn(|i| f16::from_f32(i as f32 * 0.75));
        let b: Lanes<f16> = core::array::from_fn(|i| f16::from_f32(1.5 - i as f32));
        let out = simd::f16_sub(&a, &b);
        for i in 0..LANES {
            let expected = f16::from_f64(a[i].to_f64() - b[i].to_f64());
            assert_eq!(out[i].to_bits(), expected.to_bits());
        }
        let overflow = portable::f16_sub(&[f16::MAX; LANES], &[-f16::MAX; LANES]);
        assert!(overflow[0].is_infinite());
    }

    #[test]
    fn f32_bodies_agree() {
        let a: Lanes<f32> = core::array::from_fn(|i| i as f32 * 1.25 - 3.0);
        let b: Lanes<f32> = core::array::from_fn(|i| (i * i) as f32 / 7.0);
        let expected: Lanes<f32> = core::array::from_fn(|i| a[i] - b[i]);
        assert_eq!(simd::f32_sub(&a, &b), expected);
        assert_eq!(portable::f32_sub(&a, &b), expected);
    }
}
