//! Tensor metadata and storage consumed by the subtraction kernel.
//!
//! # Tensor Model
//!
//! This module describes the tensors a kernel reads from and writes to:
//!
//! - A [`TensorShape`] of up to [`MAX_DIMS`] dimensions, dimension 0 innermost
//! - A [`DataType`] tag, with a fixed-point position for the Q-formats
//! - [`PaddingSize`] around the first two dimensions, which sets the strides
//! - A valid region: the part of the shape holding meaningful values
//!
//! ## Design Highlights
//! - Metadata ([`TensorInfo`]) is separate from storage ([`Tensor`])
//! - Storage is materialized lazily and freezes the padding once it exists
//! - Elements are stored in native byte order and read/written through [`Element`]
//! - The fixed-point position is checked through `briny`'s `Validate` gate
//!
//! ## Limitations
//! - Padding only applies to dimensions 0 and 1
//! - No views, no broadcasting
//!
//! ## Example
//!
//! ```rust
//! use briny_arith::tensors::{DataType, Tensor, TensorInfo, TensorShape};
//!
//! let info = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::U8);
//! let t = Tensor::from_slice(info, &[1u8, 2, 3, 4, 5, 6]).unwrap();
//! assert_eq!(t.to_vec::<u8>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
//! ```

use core::cell::UnsafeCell;
use core::fmt;
use std::sync::OnceLock;

use briny::prelude::*;
use half::f16;

use crate::error::{KernelError, Result};
use crate::window::{Coordinates, ValidRegion};

/// Maximum number of dimensions a tensor (and a window) can have.
pub const MAX_DIMS: usize = 6;

/// Element representation of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// Not set yet; outputs may start like this and get auto-initialized.
    #[default]
    Unknown,
    U8,
    S8,
    /// 8-bit fixed point (Q-format).
    QS8,
    U16,
    S16,
    /// 16-bit fixed point (Q-format).
    QS16,
    U32,
    S32,
    F16,
    F32,
    F64,
}

impl DataType {
    /// Size of one element in bytes, `0` for [`DataType::Unknown`].
    pub const fn element_size(self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::U8 | Self::S8 | Self::QS8 => 1,
            Self::U16 | Self::S16 | Self::QS16 | Self::F16 => 2,
            Self::U32 | Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub const fn is_fixed_point(self) -> bool {
        matches!(self, Self::QS8 | Self::QS16)
    }

    /// Largest fixed-point position the representation can hold.
    const fn max_fixed_point_position(self) -> u8 {
        match self {
            Self::QS8 => 7,
            Self::QS16 => 15,
            _ => 0,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::U8 => "U8",
            Self::S8 => "S8",
            Self::QS8 => "QS8",
            Self::U16 => "U16",
            Self::S16 => "S16",
            Self::QS16 => "QS16",
            Self::U32 => "U32",
            Self::S32 => "S32",
            Self::F16 => "F16",
            Self::F32 => "F32",
            Self::F64 => "F64",
        };
        f.write_str(name)
    }
}

/// Logical extents of a tensor, dimension 0 first.
///
/// An empty shape (no dimensions) means "not set". Trailing extents of 1 are
/// dropped on construction, so `[4, 1]` and `[4]` are the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TensorShape {
    dims: [usize; MAX_DIMS],
    num_dims: usize,
}

impl TensorShape {
    /// Builds a shape from its extents, innermost first.
    ///
    /// Trailing extents of 1 past dimension 0 are dropped.
    ///
    /// # Panics
    /// Panics if more than [`MAX_DIMS`] extents are given.
    pub fn new(dims: &[usize]) -> Self {
        assert!(
            dims.len() <= MAX_DIMS,
            "a shape has at most {MAX_DIMS} dimensions, got {}",
            dims.len()
        );
        let mut num_dims = dims.len();
        while num_dims > 1 && dims[num_dims - 1] == 1 {
            num_dims -= 1;
        }
        let mut shape = Self::default();
        shape.dims[..num_dims].copy_from_slice(&dims[..num_dims]);
        shape.num_dims = num_dims;
        shape
    }

    /// Number of dimensions after trailing 1s are dropped.
    pub fn num_dimensions(&self) -> usize {
        self.num_dims
    }

    /// Extent of dimension `d`; dimensions past the rank have extent 1.
    pub fn dim(&self, d: usize) -> usize {
        if d < self.num_dims { self.dims[d] } else { 1 }
    }

    /// Whether the shape is unset.
    pub fn is_empty(&self) -> bool {
        self.num_dims == 0
    }

    /// Number of elements described by the shape.
    pub fn total_size(&self) -> usize {
        self.dims[..self.num_dims].iter().product()
    }

    /// The extents up to the rank.
    pub fn as_slice(&self) -> &[usize] {
        &self.dims[..self.num_dims]
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_slice())
    }
}

/// Padding in elements around dimensions 0 (left/right) and 1 (top/bottom).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PaddingSize {
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
    pub left: usize,
}

impl PaddingSize {
    /// Element-wise maximum of two paddings.
    pub fn max(self, other: Self) -> Self {
        Self {
            top: self.top.max(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
            left: self.left.max(other.left),
        }
    }
}

/// Metadata of a tensor: shape, representation, padding and valid region.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TensorInfo {
    shape: TensorShape,
    data_type: DataType,
    fixed_point_position: u8,
    padding: PaddingSize,
    valid_region: ValidRegion,
}

impl Validate for TensorInfo {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        let max = self.data_type.max_fixed_point_position();
        if self.data_type.is_fixed_point() {
            if self.fixed_point_position == 0 || self.fixed_point_position > max {
                return Err(ValidationError);
            }
        } else if self.fixed_point_position != 0 {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl TensorInfo {
    /// Metadata with no padding and the whole shape valid.
    pub fn new(shape: TensorShape, data_type: DataType) -> Self {
        Self {
            shape,
            data_type,
            fixed_point_position: 0,
            padding: PaddingSize::default(),
            valid_region: ValidRegion::from_shape(&shape),
        }
    }

    /// Sets the number of fractional bits of a fixed-point representation.
    pub fn with_fixed_point_position(mut self, position: u8) -> Self {
        self.fixed_point_position = position;
        self
    }

    /// Sets the padding around dimensions 0 and 1.
    pub fn with_padding(mut self, padding: PaddingSize) -> Self {
        self.padding = padding;
        self
    }

    /// Logical extents, padding excluded.
    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    /// Element representation.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Fractional bits of a fixed-point type, `0` otherwise.
    pub fn fixed_point_position(&self) -> u8 {
        self.fixed_point_position
    }

    /// Current padding in elements.
    pub fn padding(&self) -> PaddingSize {
        self.padding
    }

    /// Part of the shape holding meaningful values.
    pub fn valid_region(&self) -> &ValidRegion {
        &self.valid_region
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        self.data_type.element_size()
    }

    /// True once both shape and data type have been set.
    pub fn is_initialized(&self) -> bool {
        !self.shape.is_empty() && self.data_type != DataType::Unknown
    }

    /// Sets the shape if none is set yet and resets the valid region to it.
    ///
    /// Returns whether the shape changed.
    pub fn set_shape_if_empty(&mut self, shape: &TensorShape) -> bool {
        if !self.shape.is_empty() {
            return false;
        }
        self.shape = *shape;
        self.valid_region = ValidRegion::from_shape(shape);
        true
    }

    /// Sets the data type if it is still [`DataType::Unknown`].
    pub fn set_data_type_if_unknown(&mut self, data_type: DataType) -> bool {
        if self.data_type != DataType::Unknown {
            return false;
        }
        self.data_type = data_type;
        true
    }

    pub fn set_valid_region(&mut self, region: ValidRegion) {
        self.valid_region = region;
    }

    /// Grows the padding to at least `padding`. Returns whether it changed.
    pub(crate) fn extend_padding(&mut self, padding: PaddingSize) -> bool {
        let grown = self.padding.max(padding);
        let changed = grown != self.padding;
        self.padding = grown;
        changed
    }

    /// Byte strides per dimension, derived from the padded shape.
    pub fn strides_in_bytes(&self) -> [usize; MAX_DIMS] {
        let mut strides = [0; MAX_DIMS];
        let mut stride = self.element_size();
        for (d, s) in strides.iter_mut().enumerate() {
            *s = stride;
            stride *= self.padded_dim(d);
        }
        strides
    }

    /// Byte offset of the element at coordinate zero.
    pub fn offset_first_element_in_bytes(&self) -> usize {
        let strides = self.strides_in_bytes();
        self.padding.top * strides[1] + self.padding.left * strides[0]
    }

    /// Number of bytes the padded tensor occupies.
    pub fn total_size_in_bytes(&self) -> usize {
        (0..MAX_DIMS)
            .map(|d| self.padded_dim(d))
            .product::<usize>()
            * self.element_size()
    }

    /// Number of elements addressable along dimension 0, padding included,
    /// counted from coordinate zero.
    pub fn accessible_x(&self) -> usize {
        self.shape.dim(0) + self.padding.right
    }

    fn padded_dim(&self, d: usize) -> usize {
        match d {
            0 => self.padding.left + self.shape.dim(0) + self.padding.right,
            1 => self.padding.top + self.shape.dim(1) + self.padding.bottom,
            _ => self.shape.dim(d),
        }
    }

    /// Byte offset of `coords`, relative to the start of the buffer.
    pub(crate) fn offset_of(&self, coords: &Coordinates) -> usize {
        let strides = self.strides_in_bytes();
        let base = self.offset_first_element_in_bytes() as isize;
        let rel: isize = (0..MAX_DIMS)
            .map(|d| coords[d] * strides[d] as isize)
            .sum();
        (base + rel) as usize
    }
}

/// A scalar type that can be stored in a tensor.
pub trait Element: Copy + Send + Sync + 'static {
    /// Storage type the element is read/written as by default.
    const DATA_TYPE: DataType;
    /// Size in bytes.
    const SIZE: usize;

    /// Whether this scalar type is the storage of `data_type`.
    fn stores(data_type: DataType) -> bool {
        data_type == Self::DATA_TYPE
    }

    /// Reads one element from the front of `bytes` (native byte order).
    fn read_ne(bytes: &[u8]) -> Self;

    /// Writes one element to the front of `out` (native byte order).
    fn write_ne(self, out: &mut [u8]);
}

impl Element for u8 {
    const DATA_TYPE: DataType = DataType::U8;
    const SIZE: usize = 1;

    fn read_ne(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn write_ne(self, out: &mut [u8]) {
        out[0] = self;
    }
}

impl Element for i8 {
    const DATA_TYPE: DataType = DataType::QS8;
    const SIZE: usize = 1;

    fn stores(data_type: DataType) -> bool {
        matches!(data_type, DataType::QS8 | DataType::S8)
    }

    fn read_ne(bytes: &[u8]) -> Self {
        bytes[0] as i8
    }

    fn write_ne(self, out: &mut [u8]) {
        out[0] = self as u8;
    }
}

impl Element for i16 {
    const DATA_TYPE: DataType = DataType::S16;
    const SIZE: usize = 2;

    fn stores(data_type: DataType) -> bool {
        matches!(data_type, DataType::S16 | DataType::QS16)
    }

    fn read_ne(bytes: &[u8]) -> Self {
        i16::from_ne_bytes([bytes[0], bytes[1]])
    }

    fn write_ne(self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.to_ne_bytes());
    }
}

impl Element for f16 {
    const DATA_TYPE: DataType = DataType::F16;
    const SIZE: usize = 2;

    fn read_ne(bytes: &[u8]) -> Self {
        f16::from_bits(u16::from_ne_bytes([bytes[0], bytes[1]]))
    }

    fn write_ne(self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.to_bits().to_ne_bytes());
    }
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::F32;
    const SIZE: usize = 4;

    fn read_ne(bytes: &[u8]) -> Self {
        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_ne(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_ne_bytes());
    }
}

/// Backing memory of a tensor, 8-byte aligned.
///
/// Writers go through [`TensorMemory::as_mut_ptr`]; the only such writer is a
/// kernel that holds the tensor as its output, which it borrowed mutably.
pub(crate) struct TensorMemory {
    words: Box<[UnsafeCell<u64>]>,
    len: usize,
}

// SAFETY: shared access only reads, except for kernels writing an output they
// borrowed exclusively; concurrent kernel workers write disjoint coordinates.
unsafe impl Sync for TensorMemory {}

impl TensorMemory {
    fn zeroed(len: usize) -> Self {
        let words = (0..len.div_ceil(8)).map(|_| UnsafeCell::new(0)).collect();
        Self { words, len }
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.words.as_ptr() as *mut u8
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: `len` bytes lie inside the word buffer; no writer can be
        // active while a shared reference to the owning tensor is handed out.
        unsafe { core::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: exclusive access to the buffer, `len` bytes are in bounds.
        unsafe { core::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }
}

/// A tensor: metadata plus lazily materialized storage.
///
/// The padding can still grow while the storage has not been materialized;
/// once it is, the layout is frozen.
#[derive(Default)]
pub struct Tensor {
    info: TensorInfo,
    memory: OnceLock<TensorMemory>,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("info", &self.info)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

impl Tensor {
    /// A tensor with the given metadata and no storage yet.
    ///
    /// # Errors
    /// Fails if the fixed-point position does not fit the data type.
    pub fn new(info: TensorInfo) -> Result<Self> {
        let trusted = TrustedData::new(info)
            .map_err(|_| KernelError::InvalidTensorInfo("fixed-point position out of range"))?;
        Ok(Self {
            info: trusted.into_inner(),
            memory: OnceLock::new(),
        })
    }

    /// A tensor whose shape and data type are still unset.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A materialized tensor holding `data` (valid elements, row-major).
    pub fn from_slice<T: Element>(info: TensorInfo, data: &[T]) -> Result<Self> {
        let mut tensor = Self::new(info)?;
        tensor.copy_from_slice(data)?;
        Ok(tensor)
    }

    /// Metadata of the tensor.
    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    /// Mutable metadata; only available while the layout is not frozen.
    pub(crate) fn info_mut(&mut self) -> Option<&mut TensorInfo> {
        if self.is_materialized() {
            None
        } else {
            Some(&mut self.info)
        }
    }

    /// Overrides the part of the tensor considered meaningful.
    pub fn set_valid_region(&mut self, region: ValidRegion) {
        self.info.set_valid_region(region);
    }

    pub fn is_materialized(&self) -> bool {
        self.memory.get().is_some()
    }

    /// Storage of the tensor, created zeroed on first access.
    pub(crate) fn memory(&self) -> &TensorMemory {
        self.memory
            .get_or_init(|| TensorMemory::zeroed(self.info.total_size_in_bytes()))
    }

    fn check_element<T: Element>(&self) -> Result<()> {
        if T::stores(self.info.data_type()) {
            Ok(())
        } else {
            Err(KernelError::ElementTypeMismatch {
                requested: T::DATA_TYPE,
                actual: self.info.data_type(),
            })
        }
    }

    /// Overwrites every element of the shape with `data` (row-major).
    pub fn copy_from_slice<T: Element>(&mut self, data: &[T]) -> Result<()> {
        self.check_element::<T>()?;
        let expected = self.info.shape().total_size();
        if data.len() != expected {
            return Err(KernelError::DataLengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        let info = &self.info;
        self.memory
            .get_or_init(|| TensorMemory::zeroed(info.total_size_in_bytes()));
        let bytes = self
            .memory
            .get_mut()
            .ok_or(KernelError::InvalidTensorInfo("storage not materialized"))?
            .bytes_mut();
        let row = info.shape().dim(0).max(1);
        for (r, chunk) in data.chunks(row).enumerate() {
            let mut offset = info.offset_of(&row_start(info.shape(), r));
            for &value in chunk {
                value.write_ne(&mut bytes[offset..]);
                offset += T::SIZE;
            }
        }
        Ok(())
    }

    /// Reads every element of the shape (row-major), ignoring padding.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_element::<T>()?;
        let shape = self.info.shape();
        let bytes = self.memory().bytes();
        let row = shape.dim(0);
        let rows = if row == 0 { 0 } else { shape.total_size() / row };
        let mut out = Vec::with_capacity(shape.total_size());
        for r in 0..rows {
            let mut offset = self.info.offset_of(&row_start(shape, r));
            for _ in 0..row {
                out.push(T::read_ne(&bytes[offset..]));
                offset += T::SIZE;
            }
        }
        Ok(out)
    }
}

/// Coordinates of the first element of the `r`-th row (x = 0).
fn row_start(shape: &TensorShape, mut r: usize) -> Coordinates {
    let mut coords = Coordinates::default();
    for d in 1..MAX_DIMS {
        let extent = shape.dim(d);
        coords[d] = (r % extent) as isize;
        r /= extent;
    }
    coords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_account_for_padding() {
        let info = TensorInfo::new(TensorShape::new(&[5, 3]), DataType::S16).with_padding(
            PaddingSize {
                top: 1,
                right: 11,
                bottom: 1,
                left: 2,
            },
        );
        let strides = info.strides_in_bytes();
        assert_eq!(strides[0], 2);
        assert_eq!(strides[1], (2 + 5 + 11) * 2);
        assert_eq!(strides[2], strides[1] * 5);
        assert_eq!(info.offset_first_element_in_bytes(), strides[1] + 4);
        assert_eq!(info.total_size_in_bytes(), 18 * 5 * 2);
    }

    #[test]
    fn trailing_unit_extents_are_dropped() {
        assert_eq!(TensorShape::new(&[4, 1]), TensorShape::new(&[4]));
        assert_eq!(TensorShape::new(&[4, 1, 1]).num_dimensions(), 1);
        assert_eq!(TensorShape::new(&[1, 1]).as_slice(), &[1]);
        assert_eq!(TensorShape::new(&[4, 1, 3]).num_dimensions(), 3);
        assert!(TensorShape::new(&[]).is_empty());
        assert_eq!(TensorShape::new(&[4, 1]).dim(1), 1);
    }

    #[test]
    fn padded_round_trip_preserves_values() {
        let info = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::F32).with_padding(
            PaddingSize {
                top: 0,
                right: 13,
                bottom: 0,
                left: 0,
            },
        );
        let data = [1.0f32, -2.0, 3.5, 4.0, 5.25, -6.0];
        let t = Tensor::from_slice(info, &data).unwrap();
        assert_eq!(t.to_vec::<f32>().unwrap(), data.to_vec());
    }

    #[test]
    fn rejects_out_of_range_fixed_point_position() {
        let info = TensorInfo::new(TensorShape::new(&[4]), DataType::QS8).with_fixed_point_position(8);
        assert!(matches!(Tensor::new(info), Err(KernelError::InvalidTensorInfo(_))));

        let info = TensorInfo::new(TensorShape::new(&[4]), DataType::U8).with_fixed_point_position(3);
        assert!(Tensor::new(info).is_err());
    }

    #[test]
    fn rejects_wrong_element_type_and_length() {
        let info = TensorInfo::new(TensorShape::new(&[4]), DataType::U8);
        assert!(matches!(
            Tensor::from_slice(info.clone(), &[1.0f32; 4]),
            Err(KernelError::ElementTypeMismatch { .. })
        ));
        assert!(matches!(
            Tensor::from_slice(info, &[1u8; 3]),
            Err(KernelError::DataLengthMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn materialization_freezes_layout() {
        let mut t = Tensor::new(TensorInfo::new(TensorShape::new(&[4]), DataType::U8)).unwrap();
        assert!(t.info_mut().is_some());
        t.memory();
        assert!(t.info_mut().is_none());
    }
}
