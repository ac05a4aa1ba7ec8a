use test_case::test_case;
use veter_dtype::DType;

use crate::descriptor::enumerate_offsets;
use crate::{Error, Segment, Tensor};

const ADDR: u64 = 0x4000_0000;

fn strided(strides: &[u64], repeats: &[u64], start: u64) -> Tensor {
    let bytes = (start + strides[0] * repeats[0]) * 4;
    Tensor::builder()
        .addr(ADDR)
        .buffer_size(bytes)
        .start_offset(start)
        .strides(strides)
        .repeats(repeats)
        .build()
        .unwrap()
}

#[test]
fn external_covers_whole_buffer() {
    let t = Tensor::external(ADDR, 1024, DType::Float32, 0).unwrap();
    assert_eq!(t.ndims(), 1);
    assert_eq!(t.repeats(), &[256]);
    assert_eq!(t.strides(), &[1]);
    assert_eq!(t.numel(), 256);
    assert!(t.is_contiguous());
    assert_eq!(t.fuzzy_byte_segment(), Segment::new(0, 1024));
}

#[test]
fn external_shaped_builds_row_major_strides() {
    let t = Tensor::external_shaped(ADDR, &[4, 8, 16], DType::Float16, 3).unwrap();
    assert_eq!(t.strides(), &[128, 16, 1]);
    assert_eq!(t.repeats(), &[4, 8, 16]);
    assert_eq!(t.buffer.size, 4 * 8 * 16 * 2);
    assert_eq!(t.version, 3);
    assert!(t.is_contiguous());
}

#[test]
fn placeholder_has_null_address() {
    let mut t = Tensor::placeholder(4096, DType::Float32, 0).unwrap();
    assert_eq!(t.buffer.addr, 0);
    t.fill_addr(ADDR);
    assert_eq!(t.buffer.addr, ADDR);
}

#[test]
fn construction_sorts_layout() {
    // Strides handed over innermost-first; normalization restores the
    // non-increasing order without changing the reachable offsets.
    let t = Tensor::builder()
        .addr(ADDR)
        .buffer_size(4 * 30)
        .strides(&[1, 10])
        .repeats(&[6, 3])
        .build()
        .unwrap();
    assert_eq!(t.strides(), &[10, 1]);
    assert_eq!(t.repeats(), &[3, 6]);
}

#[test]
fn offsets_preserved_by_sort() {
    let raw_strides = [1u64, 12, 4];
    let raw_repeats = [4u64, 2, 3];
    let t = Tensor::builder()
        .addr(ADDR)
        .buffer_size(4 * 24)
        .strides(&raw_strides)
        .repeats(&raw_repeats)
        .build()
        .unwrap();
    let mut before = enumerate_offsets(0, &raw_strides, &raw_repeats);
    let mut after = enumerate_offsets(0, t.strides(), t.repeats());
    before.sort_unstable();
    after.sort_unstable();
    assert_eq!(before, after);
}

#[test_case(&[2], &[8]; "innermost stride not 1")]
#[test_case(&[12, 5, 1], &[2, 2, 4]; "outer stride not divisible")]
#[test_case(&[4, 1], &[2, 6]; "inner block exceeds outer stride")]
fn invalid_layouts_are_rejected(strides: &[u64], repeats: &[u64]) {
    let result = Tensor::builder()
        .addr(ADDR)
        .buffer_size(1 << 20)
        .strides(strides)
        .repeats(repeats)
        .build();
    assert!(matches!(result, Err(Error::InvalidLayout { .. })), "{result:?}");
}

#[test]
fn descriptor_must_fit_buffer() {
    let result = Tensor::builder()
        .addr(ADDR)
        .buffer_size(64)
        .strides(&[1])
        .repeats(&[32])
        .build();
    assert!(matches!(result, Err(Error::OutOfBuffer { end: 128, size: 64 })), "{result:?}");
}

#[test]
fn fuzzy_segment_spans_first_to_last() {
    let t = strided(&[10, 1], &[3, 6], 7);
    assert_eq!(t.fuzzy_segment(), Segment::new(7, 7 + 20 + 5 + 1));
}

#[test]
fn view_narrows_without_mutation() {
    let base = Tensor::external_shaped(ADDR, &[8, 16], DType::Float32, 0).unwrap();
    let v = base.view(&[2, 4], &[3, 8]).unwrap();
    assert_eq!(v.start_offset, 3 * 16 + 8);
    assert_eq!(v.repeats(), &[2, 4]);
    assert_eq!(v.strides(), base.strides());
    assert_eq!(base.start_offset, 0);

    let err = base.view(&[2, 16], &[0, 1]).unwrap_err();
    assert!(matches!(err, Error::ViewOutOfRange { dim: 1, .. }), "{err:?}");
}

#[test]
fn reshape_requires_contiguity() {
    let base = Tensor::external_shaped(ADDR, &[4, 6], DType::Float32, 0).unwrap();
    let r = base.reshape(&[3, 8]).unwrap();
    assert_eq!(r.strides(), &[8, 1]);
    assert_eq!(r.numel(), 24);

    let sliced = base.view(&[4, 3], &[0, 0]).unwrap();
    assert!(matches!(sliced.reshape(&[12]), Err(Error::NotContiguous)));
    assert!(matches!(base.reshape(&[5, 5]), Err(Error::ReshapeMismatch { from: 24, to: 25 })));
}

#[test]
fn transpose_preserves_reachable_set() {
    let base = strided(&[10, 1], &[3, 6], 0);
    let t = base.transpose(0, 1).unwrap();
    let mut before = enumerate_offsets(0, base.strides(), base.repeats());
    let mut after = enumerate_offsets(0, t.strides(), t.repeats());
    before.sort_unstable();
    after.sort_unstable();
    assert_eq!(before, after);

    assert!(matches!(base.transpose(0, 2), Err(Error::AxisOutOfRange { axis: 2, ndims: 2 })));
}

#[test]
fn offset_round_trips_through_indices() {
    let t = strided(&[40, 8, 1], &[2, 4, 6], 40 + 16 + 3);
    let indices = t.offset_to_indices();
    assert_eq!(&indices[..3], &[1, 2, 3]);
    assert_eq!(t.indices_to_offset(&indices[..3]), t.start_offset);
}

#[test]
fn rank_and_repeat_validation() {
    assert!(matches!(
        Tensor::builder().buffer_size(64).strides(&[1, 2]).repeats(&[4]).build(),
        Err(Error::RankMismatch { strides: 2, repeats: 1 })
    ));
    assert!(matches!(
        Tensor::builder().buffer_size(64).strides(&[2, 1]).repeats(&[2, 0]).build(),
        Err(Error::ZeroRepeat { dim: 1 })
    ));
    assert!(matches!(
        Tensor::external(ADDR, 10, DType::Float32, 0),
        Err(Error::MisalignedBuffer { size: 10, elem: 4 })
    ));
}
