//! Type Dispatch Matrix
//!
//! Maps a [`DispatchKey`] — `(input1 type, input2 type, output type, policy)` —
//! to the [`SubRoutine`] that implements it.
//!
//! The table is built once on first use (via `lazy_static`) and never changes
//! afterwards, so the same key resolves to the same routine for the lifetime
//! of the process. Keys that are not in the table are configuration errors.
//!
//! # Example
//! ```rust
//! use briny_arith::ops::dispatch::{lookup, ConvertPolicy, DispatchKey, SubRoutine};
//! use briny_arith::tensors::DataType;
//!
//! let key = DispatchKey::new(DataType::U8, DataType::S16, DataType::S16, ConvertPolicy::Saturate);
//! assert_eq!(lookup(&key).unwrap(), SubRoutine::U8S16S16Saturate);
//! assert_eq!(key.to_string(), "sub_saturate_U8_S16_S16");
//! ```

use core::fmt;
use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::backend::fp16_supported;
use crate::error::{KernelError, Result};
use crate::tensors::DataType;

/// Overflow policy of the subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConvertPolicy {
    /// Modular (or plain IEEE) result.
    #[default]
    Wrap = 0,
    /// Clamped to the representable range of the output type.
    Saturate,
}

impl fmt::Display for ConvertPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wrap => "wrap",
            Self::Saturate => "saturate",
        })
    }
}

/// Selects exactly one subtraction routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    /// Data type of the minuend.
    pub input1: DataType,
    /// Data type of the subtrahend.
    pub input2: DataType,
    /// Data type of the difference.
    pub output: DataType,
    pub policy: ConvertPolicy,
}

impl DispatchKey {
    /// Builds the key for `input1 - input2 -> output` under `policy`.
    pub const fn new(
        input1: DataType,
        input2: DataType,
        output: DataType,
        policy: ConvertPolicy,
    ) -> Self {
        Self {
            input1,
            input2,
            output,
            policy,
        }
    }

    fn is_half_precision(&self) -> bool {
        self.input1 == DataType::F16 && self.input2 == DataType::F16 && self.output == DataType::F16
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sub_{}_{}_{}_{}",
            self.policy, self.input1, self.input2, self.output
        )
    }
}

/// The closed set of subtraction routines, one per distinct lane body.
///
/// QS16 keys share the S16 routines, and both policies of a float type share
/// one routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubRoutine {
    Qs8Wrap,
    Qs8Saturate,
    U8Wrap,
    U8Saturate,
    U8U8S16Wrap,
    U8U8S16Saturate,
    U8S16S16Wrap,
    U8S16S16Saturate,
    S16U8S16Wrap,
    S16U8S16Saturate,
    S16Wrap,
    S16Saturate,
    F16,
    F32,
}

use ConvertPolicy::{Saturate, Wrap};
use DataType::{F32, QS8, QS16, S16, U8};

/// Rows that are always present.
const ENTRIES: &[(DispatchKey, SubRoutine)] = &[
    (DispatchKey::new(QS8, QS8, QS8, Wrap), SubRoutine::Qs8Wrap),
    (DispatchKey::new(QS8, QS8, QS8, Saturate), SubRoutine::Qs8Saturate),
    (DispatchKey::new(U8, U8, U8, Wrap), SubRoutine::U8Wrap),
    (DispatchKey::new(U8, U8, U8, Saturate), SubRoutine::U8Saturate),
    (DispatchKey::new(U8, U8, S16, Wrap), SubRoutine::U8U8S16Wrap),
    (DispatchKey::new(U8, U8, S16, Saturate), SubRoutine::U8U8S16Saturate),
    (DispatchKey::new(U8, S16, S16, Wrap), SubRoutine::U8S16S16Wrap),
    (DispatchKey::new(U8, S16, S16, Saturate), SubRoutine::U8S16S16Saturate),
    (DispatchKey::new(S16, U8, S16, Wrap), SubRoutine::S16U8S16Wrap),
    (DispatchKey::new(S16, U8, S16, Saturate), SubRoutine::S16U8S16Saturate),
    (DispatchKey::new(QS16, QS16, QS16, Wrap), SubRoutine::S16Wrap),
    (DispatchKey::new(QS16, QS16, QS16, Saturate), SubRoutine::S16Saturate),
    (DispatchKey::new(S16, S16, S16, Wrap), SubRoutine::S16Wrap),
    (DispatchKey::new(S16, S16, S16, Saturate), SubRoutine::S16Saturate),
    (DispatchKey::new(F32, F32, F32, Wrap), SubRoutine::F32),
    (DispatchKey::new(F32, F32, F32, Saturate), SubRoutine::F32),
];

/// Rows that need half-precision support.
#[cfg(feature = "fp16")]
const FP16_ENTRIES: &[(DispatchKey, SubRoutine)] = &[
    (
        DispatchKey::new(DataType::F16, DataType::F16, DataType::F16, Wrap),
        SubRoutine::F16,
    ),
    (
        DispatchKey::new(DataType::F16, DataType::F16, DataType::F16, Saturate),
        SubRoutine::F16,
    ),
];

#[cfg(not(feature = "fp16"))]
const FP16_ENTRIES: &[(DispatchKey, SubRoutine)] = &[];

lazy_static! {
    static ref DISPATCH_TABLE: HashMap<DispatchKey, SubRoutine> =
        ENTRIES.iter().chain(FP16_ENTRIES).copied().collect();
}

/// Resolves `key` to its routine.
///
/// # Errors
/// - [`KernelError::CapabilityUnavailable`] for the F16 keys when this build
///   has no half-precision support
/// - [`KernelError::UnsupportedCombination`] for every other missing key
pub fn lookup(key: &DispatchKey) -> Result<SubRoutine> {
    match DISPATCH_TABLE.get(key) {
        Some(routine) => Ok(*routine),
        None if key.is_half_precision() && !fp16_supported() => {
            Err(KernelError::CapabilityUnavailable(*key))
        }
        None => Err(KernelError::UnsupportedCombination(*key)),
    }
}

/// Every key of the matrix with its routine, in no particular order.
pub fn entries() -> impl Iterator<Item = (DispatchKey, SubRoutine)> {
    DISPATCH_TABLE.iter().map(|(k, r)| (*k, *r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensors::DataType::F16;

    const SUPPORTED: [DataType; 6] = [QS8, U8, QS16, S16, F16, F32];

    #[test]
    fn table_has_every_row_for_both_policies() {
        let expected = if fp16_supported() { 18 } else { 16 };
        assert_eq!(entries().count(), expected);
        for (key, _) in entries() {
            let other = match key.policy {
                Wrap => Saturate,
                Saturate => Wrap,
            };
            assert!(lookup(&DispatchKey { policy: other, ..key }).is_ok(), "{key}");
        }
    }

    #[test]
    fn float_policies_share_a_routine() {
        for dt in [F32, F16] {
            if dt == F16 && !fp16_supported() {
                continue;
            }
            let wrap = lookup(&DispatchKey::new(dt, dt, dt, Wrap));
            let sat = lookup(&DispatchKey::new(dt, dt, dt, Saturate));
            assert_eq!(wrap, sat);
        }
    }

    #[test]
    fn qs16_aliases_s16_routines() {
        for policy in [Wrap, Saturate] {
            assert_eq!(
                lookup(&DispatchKey::new(QS16, QS16, QS16, policy)),
                lookup(&DispatchKey::new(S16, S16, S16, policy))
            );
        }
    }

    #[test]
    fn misses_are_reported_with_the_key() {
        let key = DispatchKey::new(F16, F32, F32, Wrap);
        assert_eq!(lookup(&key), Err(KernelError::UnsupportedCombination(key)));

        let mut hits = 0;
        for a in SUPPORTED {
            for b in SUPPORTED {
                for o in SUPPORTED {
                    if lookup(&DispatchKey::new(a, b, o, Wrap)).is_ok() {
                        hits += 1;
                    }
                }
            }
        }
        assert_eq!(hits, if fp16_supported() { 9 } else { 8 });
    }

    #[test]
    fn key_names_follow_routine_naming() {
        let key = DispatchKey::new(QS16, QS16, QS16, Wrap);
        assert_eq!(key.to_string(), "sub_wrap_QS16_QS16_QS16");
    }
}
