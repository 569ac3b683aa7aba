//! Iteration windows, valid regions and access patterns.
//!
//! A [`Window`] is a per-dimension `(start, end, step)` range over a tensor's
//! coordinate space. Kernels compute their maximal window once at
//! configuration time; schedulers then cut it into sub-windows with
//! [`Window::split_window`] and hand one to each worker.
//!
//! ```rust
//! use briny_arith::tensors::TensorShape;
//! use briny_arith::window::{calculate_max_window, Steps, Window};
//!
//! let win = calculate_max_window(&TensorShape::new(&[20, 3]), &Steps::x(16));
//! assert_eq!(win.x().end(), 32);
//! assert_eq!(win.num_iterations(Window::DIM_Y), 3);
//!
//! let half = win.split_window(Window::DIM_Y, 0, 2);
//! assert!(half.is_sub_window_of(&win));
//! ```

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

use crate::tensors::{MAX_DIMS, PaddingSize, Tensor, TensorInfo, TensorShape};

/// A point in a tensor's coordinate space, dimension 0 first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coordinates([isize; MAX_DIMS]);

impl Coordinates {
    /// # Panics
    /// Panics if more than [`MAX_DIMS`] coordinates are given.
    pub fn new(coords: &[isize]) -> Self {
        assert!(coords.len() <= MAX_DIMS, "too many coordinates");
        let mut c = Self::default();
        c.0[..coords.len()].copy_from_slice(coords);
        c
    }
}

impl Index<usize> for Coordinates {
    type Output = isize;

    fn index(&self, d: usize) -> &isize {
        &self.0[d]
    }
}

impl IndexMut<usize> for Coordinates {
    fn index_mut(&mut self, d: usize) -> &mut isize {
        &mut self.0[d]
    }
}

/// One `[start, end)` range of a window, visited every `step` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimension {
    start: isize,
    end: isize,
    step: isize,
}

impl Default for Dimension {
    fn default() -> Self {
        Self::new(0, 1, 1)
    }
}

impl Dimension {
    /// # Panics
    /// Panics if `step` is not positive.
    pub const fn new(start: isize, end: isize, step: isize) -> Self {
        assert!(step > 0, "window step must be positive");
        Self { start, end, step }
    }

    pub const fn start(&self) -> isize {
        self.start
    }

    pub const fn end(&self) -> isize {
        self.end
    }

    pub const fn step(&self) -> isize {
        self.step
    }

    /// Number of steps needed to cover `[start, end)`.
    pub const fn num_iterations(&self) -> usize {
        if self.end <= self.start {
            0
        } else {
            ((self.end - self.start + self.step - 1) / self.step) as usize
        }
    }
}

/// Per-dimension iteration bounds of one traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Window {
    dims: [Dimension; MAX_DIMS],
}

impl Window {
    pub const DIM_X: usize = 0;
    pub const DIM_Y: usize = 1;
    pub const DIM_Z: usize = 2;

    pub fn dimension(&self, d: usize) -> Dimension {
        self.dims[d]
    }

    pub fn x(&self) -> Dimension {
        self.dims[Self::DIM_X]
    }

    pub fn y(&self) -> Dimension {
        self.dims[Self::DIM_Y]
    }

    pub fn set(&mut self, d: usize, dim: Dimension) {
        self.dims[d] = dim;
    }

    pub fn num_iterations(&self, d: usize) -> usize {
        self.dims[d].num_iterations()
    }

    /// True when some dimension has nothing to visit.
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|d| d.num_iterations() == 0)
    }

    /// Checks that `self` can be executed in place of `full`: every range is
    /// contained, steps are equal and starts are step-aligned.
    pub fn is_sub_window_of(&self, full: &Window) -> bool {
        self.dims.iter().zip(full.dims.iter()).all(|(sub, full)| {
            sub.start >= full.start
                && sub.end <= full.end
                && sub.step == full.step
                && (sub.start - full.start) % full.step == 0
        })
    }

    /// The `id`-th of `total` step-aligned slices of this window along `d`.
    ///
    /// The slices are disjoint and together cover the window exactly; the
    /// first `n % total` slices get one extra iteration.
    ///
    /// # Panics
    /// Panics if `id >= total`.
    pub fn split_window(&self, d: usize, id: usize, total: usize) -> Window {
        assert!(id < total, "split id {id} out of range for {total} parts");
        let dim = self.dims[d];
        let n = dim.num_iterations();
        let base = n / total;
        let rem = n % total;
        let first = id * base + id.min(rem);
        let count = base + usize::from(id < rem);

        let start = dim.start + first as isize * dim.step;
        let end = (dim.start + (first + count) as isize * dim.step).min(dim.end);

        let mut out = *self;
        out.dims[d] = Dimension::new(start, end.max(start), dim.step);
        out
    }

    /// Coordinates of the window in row-major order, dimension 0 fastest.
    pub fn iter(&self) -> WindowIter {
        let next = if self.is_empty() {
            None
        } else {
            let mut c = Coordinates::default();
            for (d, dim) in self.dims.iter().enumerate() {
                c[d] = dim.start;
            }
            Some(c)
        };
        WindowIter { window: *self, next }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self
            .dims
            .iter()
            .rposition(|d| *d != Dimension::default())
            .map_or(1, |last| last + 1);
        f.write_str("[")?;
        for (d, dim) in self.dims[..used].iter().enumerate() {
            if d > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}..{}:{}", dim.start, dim.end, dim.step)?;
        }
        f.write_str("]")
    }
}

/// Iterator over the coordinates of a [`Window`].
#[derive(Debug, Clone)]
pub struct WindowIter {
    window: Window,
    next: Option<Coordinates>,
}

impl Iterator for WindowIter {
    type Item = Coordinates;

    fn next(&mut self) -> Option<Coordinates> {
        let current = self.next?;
        let mut id = current;
        let mut d = 0;
        self.next = loop {
            if d == MAX_DIMS {
                break None;
            }
            let dim = self.window.dims[d];
            id[d] += dim.step;
            if id[d] < dim.end {
                break Some(id);
            }
            id[d] = dim.start;
            d += 1;
        };
        Some(current)
    }
}

/// Calls `f` for every coordinate of `window`, dimension 0 fastest.
pub fn execute_window_loop(window: &Window, f: impl FnMut(Coordinates)) {
    window.iter().for_each(f);
}

/// Per-dimension step sizes used to build a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Steps([usize; MAX_DIMS]);

impl Default for Steps {
    fn default() -> Self {
        Self([1; MAX_DIMS])
    }
}

impl Steps {
    /// Steps of `step` along dimension 0 and 1 elsewhere.
    pub fn x(step: usize) -> Self {
        let mut s = Self::default();
        s.0[0] = step;
        s
    }
}

/// Maximal window over `shape`; dimension 0 is rounded up to whole steps.
pub fn calculate_max_window(shape: &TensorShape, steps: &Steps) -> Window {
    let mut win = Window::default();
    for d in 0..MAX_DIMS {
        let step = steps.0[d].max(1);
        let end = shape.dim(d).div_ceil(step) * step;
        win.set(d, Dimension::new(0, end as isize, step as isize));
    }
    win
}

/// The part of a tensor that holds meaningful values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValidRegion {
    pub anchor: Coordinates,
    pub shape: TensorShape,
}

impl ValidRegion {
    pub fn new(anchor: Coordinates, shape: TensorShape) -> Self {
        Self { anchor, shape }
    }

    /// The whole of `shape`, anchored at the origin.
    pub fn from_shape(shape: &TensorShape) -> Self {
        Self {
            anchor: Coordinates::default(),
            shape: *shape,
        }
    }

    pub fn start(&self, d: usize) -> isize {
        self.anchor[d]
    }

    pub fn end(&self, d: usize) -> isize {
        self.anchor[d] + self.shape.dim(d) as isize
    }
}

/// Coordinate-wise intersection of two valid regions.
pub fn intersect_valid_regions(a: &ValidRegion, b: &ValidRegion) -> ValidRegion {
    let rank = a.shape.num_dimensions().max(b.shape.num_dimensions());
    let mut anchor = Coordinates::default();
    let mut extents = [0usize; MAX_DIMS];
    for d in 0..rank {
        let start = a.start(d).max(b.start(d));
        let end = a.end(d).min(b.end(d));
        anchor[d] = start;
        extents[d] = (end - start).max(0) as usize;
    }
    ValidRegion::new(anchor, TensorShape::new(&extents[..rank]))
}

/// Access of `width` consecutive elements starting `x` elements after each
/// window step along dimension 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessWindowHorizontal {
    x: isize,
    width: usize,
}

impl AccessWindowHorizontal {
    pub fn new(x: isize, width: usize) -> Self {
        Self { x, width }
    }

    /// Padding `info` needs so that every access made over `window` stays
    /// inside the buffer.
    pub fn required_padding(&self, info: &TensorInfo, window: &Window) -> PaddingSize {
        let wx = window.x();
        if wx.num_iterations() == 0 {
            return PaddingSize::default();
        }
        let min_x = wx.start() + self.x;
        let last = wx.start() + (wx.num_iterations() as isize - 1) * wx.step();
        let max_x = last + self.x + self.width as isize;
        PaddingSize {
            left: (-min_x).max(0) as usize,
            right: (max_x - info.shape().dim(0) as isize).max(0) as usize,
            ..PaddingSize::default()
        }
    }

    /// Whether the current padding of `info` already covers the accesses.
    pub fn fits(&self, info: &TensorInfo, window: &Window) -> bool {
        let need = self.required_padding(info, window);
        let have = info.padding();
        have.left >= need.left && have.right >= need.right
    }

    /// Grows the tensor's padding if its layout is not frozen yet.
    ///
    /// Returns whether the padding now covers the accesses.
    pub fn update_padding_if_needed(&self, tensor: &mut Tensor, window: &Window) -> bool {
        let need = self.required_padding(tensor.info(), window);
        if let Some(info) = tensor.info_mut() {
            info.extend_padding(need);
        }
        self.fits(tensor.info(), window)
    }

    /// Region written by the accesses over `window`, clamped to `input_region`
    /// and to the tensor's shape.
    pub fn compute_valid_region(
        &self,
        info: &TensorInfo,
        window: &Window,
        input_region: &ValidRegion,
    ) -> ValidRegion {
        let shape = info.shape();
        let rank = shape.num_dimensions();
        let mut anchor = Coordinates::default();
        let mut extents = [0usize; MAX_DIMS];
        for d in 0..rank {
            let dim = window.dimension(d);
            let (win_start, win_end) = if d == Window::DIM_X {
                let last = dim.start() + (dim.num_iterations() as isize - 1).max(0) * dim.step();
                (dim.start() + self.x, last + self.x + self.width as isize)
            } else {
                (dim.start(), dim.end())
            };
            let start = win_start.max(input_region.start(d)).max(0);
            let end = win_end
                .min(input_region.end(d))
                .min(shape.dim(d) as isize);
            anchor[d] = start;
            extents[d] = (end - start).max(0) as usize;
        }
        ValidRegion::new(anchor, TensorShape::new(&extents[..rank]))
    }

    /// Records the region written over `window` as the tensor's valid region.
    pub fn set_valid_region(&self, tensor: &mut Tensor, window: &Window, input_region: &ValidRegion) {
        let region = self.compute_valid_region(tensor.info(), window, input_region);
        tensor.set_valid_region(region);
    }
}

/// Maps window coordinates to element addresses of one tensor.
///
/// Each tensor gets its own iterator, so inputs and output may use different
/// strides and offsets.
pub(crate) struct TensorIterator<'t> {
    base: *mut u8,
    first: isize,
    strides: [isize; MAX_DIMS],
    _tensor: PhantomData<&'t Tensor>,
}

impl<'t> TensorIterator<'t> {
    pub(crate) fn new(tensor: &'t Tensor) -> Self {
        let info = tensor.info();
        let strides = info.strides_in_bytes().map(|s| s as isize);
        Self {
            base: tensor.memory().as_mut_ptr(),
            first: info.offset_first_element_in_bytes() as isize,
            strides,
            _tensor: PhantomData,
        }
    }

    /// Address of the element at `coords`.
    pub(crate) fn ptr(&self, coords: &Coordinates) -> *mut u8 {
        let rel: isize = (0..MAX_DIMS).map(|d| coords[d] * self.strides[d]).sum();
        self.base.wrapping_offset(self.first + rel)
    }
}

/// Identifies the worker a kernel is being run from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub thread_id: usize,
    pub num_threads: usize,
}

impl Default for ThreadInfo {
    fn default() -> Self {
        Self {
            thread_id: 0,
            num_threads: 1,
        }
    }
}
