use briny_arith::error::KernelError;
use briny_arith::ops::dispatch::{ConvertPolicy, DispatchKey, SubRoutine, entries, lookup};
use briny_arith::tensors::{DataType, PaddingSize, Tensor, TensorInfo, TensorShape};
use briny_arith::window::{
    AccessWindowHorizontal, Coordinates, Steps, ValidRegion, Window, calculate_max_window,
    execute_window_loop,
};

#[test]
fn test_tensor_creation() {
    let info = TensorInfo::new(TensorShape::new(&[3, 2]), DataType::S16);
    let t = Tensor::from_slice(info, &[1i16, -2, 3, -4, 5, -6]).unwrap();
    assert_eq!(t.info().shape().as_slice(), &[3, 2]);
    assert_eq!(t.info().shape().total_size(), 6);
    assert_eq!(t.to_vec::<i16>().unwrap(), vec![1, -2, 3, -4, 5, -6]);
    assert!(t.is_materialized());
}

#[test]
fn test_tensor_length_and_type_checks() {
    let info = TensorInfo::new(TensorShape::new(&[4]), DataType::U8);
    assert_eq!(
        Tensor::from_slice(info.clone(), &[1u8, 2, 3]).unwrap_err(),
        KernelError::DataLengthMismatch {
            expected: 4,
            actual: 3
        }
    );
    assert!(matches!(
        Tensor::from_slice(info, &[1.0f32; 4]),
        Err(KernelError::ElementTypeMismatch { .. })
    ));
}

#[test]
fn test_padded_strides() {
    let info = TensorInfo::new(TensorShape::new(&[5, 3, 2]), DataType::F32).with_padding(PaddingSize {
        top: 1,
        right: 2,
        bottom: 0,
        left: 1,
    });
    assert_eq!(info.strides_in_bytes()[..3], [4, 32, 128]);
    assert_eq!(info.offset_first_element_in_bytes(), 36);
    assert_eq!(info.total_size_in_bytes(), 256);
    assert_eq!(info.accessible_x(), 7);
}

#[test]
fn test_fixed_point_position_is_validated() {
    let info = TensorInfo::new(TensorShape::new(&[2]), DataType::QS8);
    assert!(matches!(
        Tensor::new(info.clone().with_fixed_point_position(8)),
        Err(KernelError::InvalidTensorInfo(_))
    ));
    assert!(Tensor::new(info.with_fixed_point_position(7)).is_ok());
}

#[test]
fn test_window_loop_follows_steps() {
    let win = calculate_max_window(&TensorShape::new(&[40, 2]), &Steps::x(16));
    let mut visited = Vec::new();
    execute_window_loop(&win, |c| visited.push((c[0], c[1])));
    assert_eq!(
        visited,
        vec![(0, 0), (16, 0), (32, 0), (0, 1), (16, 1), (32, 1)]
    );
    assert_eq!(win.to_string(), "[0..48:16, 0..2:1]");
}

#[test]
fn test_split_window_is_step_aligned() {
    let win = calculate_max_window(&TensorShape::new(&[100]), &Steps::x(16));
    let parts: Vec<Window> = (0..3).map(|id| win.split_window(Window::DIM_X, id, 3)).collect();
    let bounds: Vec<(isize, isize)> = parts.iter().map(|w| (w.x().start(), w.x().end())).collect();
    assert_eq!(bounds, vec![(0, 48), (48, 80), (80, 112)]);
    assert!(parts.iter().all(|w| w.is_sub_window_of(&win)));
}

#[test]
fn test_access_window_valid_region() {
    let mut t = Tensor::new(TensorInfo::new(TensorShape::new(&[10, 2]), DataType::U8)).unwrap();
    let win = calculate_max_window(t.info().shape(), &Steps::x(16));
    let access = AccessWindowHorizontal::new(0, 16);
    assert!(access.update_padding_if_needed(&mut t, &win));

    let region = ValidRegion::new(Coordinates::new(&[1, 1]), TensorShape::new(&[20, 1]));
    access.set_valid_region(&mut t, &win, &region);
    assert_eq!(t.info().valid_region().anchor, Coordinates::new(&[1, 1]));
    assert_eq!(t.info().valid_region().shape, TensorShape::new(&[9, 1]));
}

#[test]
fn test_dispatch_matrix_rows() {
    use ConvertPolicy::{Saturate, Wrap};
    use DataType::{QS8, S16, U8};

    assert_eq!(
        lookup(&DispatchKey::new(U8, U8, U8, Wrap)),
        Ok(SubRoutine::U8Wrap)
    );
    assert_eq!(
        lookup(&DispatchKey::new(S16, U8, S16, Saturate)),
        Ok(SubRoutine::S16U8S16Saturate)
    );
    assert_eq!(
        lookup(&DispatchKey::new(QS8, QS8, QS8, Saturate)),
        Ok(SubRoutine::Qs8Saturate)
    );
    assert!(lookup(&DispatchKey::new(S16, S16, U8, Wrap)).is_err());
    assert!(entries().all(|(key, routine)| lookup(&key) == Ok(routine)));
}
