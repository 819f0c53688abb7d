//! Unit tests for combining primitives and padding

use ndarray::{arr0, array, ArrayD, Axis, IxDyn};
use vortex_batch::iter::make_chunks;
use vortex_batch::{combine_batches, combine_pad, combine_to_arrays, CombinePad, Sample};

fn scalar(v: f64) -> ArrayD<f64> {
    arr0(v).into_dyn()
}

#[test]
fn test_combine_batches_round_trip_over_chunks() {
    let items: Vec<Vec<u32>> = (0..9).map(|i| vec![i, i * 10, i * 100]).collect();

    for chunk in make_chunks(items, 4, true).unwrap() {
        let combined = combine_batches(chunk.clone()).unwrap();
        assert_eq!(combined.len(), 3);
        assert_eq!(combine_batches(combined).unwrap(), chunk);
    }
}

#[test]
fn test_combine_to_arrays_pairs() {
    let batch = combine_to_arrays(vec![
        vec![scalar(1.0), scalar(10.0)],
        vec![scalar(2.0), scalar(20.0)],
    ])
    .unwrap();

    assert_eq!(batch, vec![array![1.0, 2.0].into_dyn(), array![10.0, 20.0].into_dyn()]);
}

#[test]
fn test_combine_to_arrays_keeps_sample_shape() {
    let samples: Vec<Sample<f32>> = (0..5)
        .map(|i| vec![ArrayD::from_elem(IxDyn(&[1, 4, 4]), i as f32)])
        .collect();
    let batch = combine_to_arrays(samples).unwrap();

    assert_eq!(batch[0].shape(), &[5, 1, 4, 4]);
    for i in 0..5 {
        assert!(batch[0].index_axis(Axis(0), i).iter().all(|&v| v == i as f32));
    }
}

#[test]
fn test_combine_pad_tail_is_padding() {
    let inputs = vec![
        vec![array![1, 2, 3].into_dyn()],
        vec![array![4, 5, 6, 7, 8].into_dyn()],
    ];
    let batch = combine_pad(inputs, &[0], 0.0).unwrap();

    assert_eq!(batch[0].shape(), &[2, 5]);
    assert_eq!(batch[0][[0, 3]], 0);
    assert_eq!(batch[0][[0, 4]], 0);
}

#[test]
fn test_combine_pad_centers_by_default() {
    let inputs = vec![
        vec![array![1.0, 1.0].into_dyn()],
        vec![array![2.0, 2.0, 2.0, 2.0, 2.0, 2.0].into_dyn()],
    ];
    let batch = CombinePad::new(-1.0).combine(inputs).unwrap();

    let first: Vec<f64> = batch[0].index_axis(Axis(0), 0).iter().copied().collect();
    assert_eq!(first, vec![-1.0, -1.0, 1.0, 1.0, -1.0, -1.0]);
}

#[test]
fn test_combine_pad_rejects_mixed_ndim() {
    let inputs = vec![
        vec![array![1.0, 2.0].into_dyn()],
        vec![array![[1.0, 2.0]].into_dyn()],
    ];
    assert!(combine_pad(inputs, &[0.0], 0.5).unwrap_err().is_shape());
}
