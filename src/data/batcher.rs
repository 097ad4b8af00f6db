// ============================================================
// Layer 4 — Surrogate Batcher
// ============================================================
// Implements Burn's Batcher trait to turn variable-length
// SentenceSamples into the flat vectors a surrogate consumes.
//
// Steps for N samples of true lengths l_1 .. l_N:
//   1. Pad inputs, outputs and masks to the batch's longest l
//   2. Merge per-head outputs [H, l, Dh] into [l, H·Dh]
//   3. Pad again up to the fixed max_len
//   4. Repeat every mask value once per feature channel
//   5. Flatten (max_len, D) into one vector per sample
//
//   inputs  [N, max_len · D]
//   targets [N, max_len · D]
//   masks   [N, max_len · D]   1.0 on real tokens, 0.0 on padding
//
// The host-side work lives in collate() so it can be tested
// without a device.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};
use ndarray::{s, Array2, Array3, Axis};

use crate::domain::activation::SentenceSample;
use crate::domain::error::DatasetError;

// ─── CollatedBatch ────────────────────────────────────────────────────────────
/// Row-major host buffers of one collated batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CollatedBatch {
    pub inputs:  Array2<f32>,
    pub targets: Array2<f32>,
    pub masks:   Array2<f32>,
}

/// Pad, merge and flatten `items` to `[N, max_len · D]`.
pub fn collate(items: &[SentenceSample], max_len: usize) -> Result<CollatedBatch, DatasetError> {
    let first = items
        .first()
        .ok_or_else(|| DatasetError::ShapeMismatch("cannot collate an empty batch".into()))?;
    let n     = items.len();
    let width = first.emb_size();

    // ── Step 1 & 2: pad to the batch's own longest sentence ───────────────────
    let batch_len = items.iter().map(SentenceSample::len).max().unwrap_or(0);
    if batch_len > max_len {
        return Err(DatasetError::ShapeMismatch(format!(
            "sentence of length {batch_len} does not fit max_len {max_len}"
        )));
    }

    let mut inputs  = Array3::<f32>::zeros((n, batch_len, width));
    let mut targets = Array3::<f32>::zeros((n, batch_len, width));
    let mut masks   = Array2::<f32>::zeros((n, batch_len));

    for (i, item) in items.iter().enumerate() {
        let l      = item.len();
        let merged = item.merged_output()?;
        if item.emb_size() != width || merged.dim() != (l, width) {
            return Err(DatasetError::ShapeMismatch(format!(
                "sample {i}: input [{l}, {}] and output {:?} do not match width {width}",
                item.emb_size(),
                merged.dim()
            )));
        }
        inputs.slice_mut(s![i, ..l, ..]).assign(&item.input);
        targets.slice_mut(s![i, ..l, ..]).assign(&merged);
        masks.slice_mut(s![i, ..l]).assign(&item.mask_or_ones());
    }

    // ── Step 3: pad to the fixed length ───────────────────────────────────────
    let inputs  = pad_to(&inputs, max_len);
    let targets = pad_to(&targets, max_len);
    let mut full_masks = Array2::<f32>::zeros((n, max_len));
    full_masks.slice_mut(s![.., ..batch_len]).assign(&masks);

    // ── Step 4: one mask value per feature channel ────────────────────────────
    let masks = full_masks
        .insert_axis(Axis(2))
        .broadcast((n, max_len, width))
        .map(|view| view.to_owned())
        .ok_or_else(|| DatasetError::ShapeMismatch("mask broadcast failed".into()))?;

    // ── Step 5: flatten ───────────────────────────────────────────────────────
    Ok(CollatedBatch {
        inputs:  flatten(inputs)?,
        targets: flatten(targets)?,
        masks:   flatten(masks)?,
    })
}

fn pad_to(batch: &Array3<f32>, max_len: usize) -> Array3<f32> {
    let (n, len, width) = batch.dim();
    let mut padded = Array3::<f32>::zeros((n, max_len, width));
    padded.slice_mut(s![.., ..len, ..]).assign(batch);
    padded
}

fn flatten(batch: Array3<f32>) -> Result<Array2<f32>, DatasetError> {
    let (n, len, width) = batch.dim();
    let flat = batch
        .to_shape((n, len * width))
        .map_err(|e| DatasetError::ShapeMismatch(e.to_string()))?
        .into_owned();
    Ok(flat)
}

// ─── SurrogateBatch ───────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SurrogateBatch<B: Backend> {
    pub inputs:  Tensor<B, 2>,
    pub targets: Tensor<B, 2>,
    pub masks:   Tensor<B, 2>,
}

// ─── SurrogateBatcher ─────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct SurrogateBatcher<B: Backend> {
    pub device:  B::Device,
    pub max_len: usize,
}

impl<B: Backend> SurrogateBatcher<B> {
    pub fn new(device: B::Device, max_len: usize) -> Self {
        Self { device, max_len }
    }

    fn to_tensor(&self, array: Array2<f32>) -> Tensor<B, 2> {
        let shape = [array.nrows(), array.ncols()];
        let values: Vec<f32> = array.iter().copied().collect();
        Tensor::<B, 2>::from_data(TensorData::new(values, shape), &self.device)
    }
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
// The DataLoader calls .batch(items) with each mini-batch of samples.
impl<B: Backend> Batcher<SentenceSample, SurrogateBatch<B>> for SurrogateBatcher<B> {
    /// # Panics
    /// If the samples disagree on width or exceed `max_len`. The
    /// surrogate use case checks both before building a loader.
    fn batch(&self, items: Vec<SentenceSample>) -> SurrogateBatch<B> {
        let collated = collate(&items, self.max_len)
            .unwrap_or_else(|e| panic!("cannot collate surrogate batch: {e}"));

        SurrogateBatch {
            inputs:  self.to_tensor(collated.inputs),
            targets: self.to_tensor(collated.targets),
            masks:   self.to_tensor(collated.masks),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use ndarray::{Array1, Array3 as A3};
    use proptest::prelude::*;

    type TestBackend = NdArray;

    fn sample(len: usize, width: usize, base: f32) -> SentenceSample {
        let input = Array2::from_shape_fn((len, width), |(p, f)| base + (p * width + f) as f32 + 1.0);
        SentenceSample {
            output: input.mapv(|x| x * 2.0).into_dyn(),
            input,
            mask:   Some(Array1::ones(len)),
        }
    }

    #[test]
    fn test_pads_and_flattens() {
        let items    = vec![sample(2, 3, 0.0), sample(1, 3, 100.0)];
        let collated = collate(&items, 4).unwrap();

        assert_eq!(collated.inputs.dim(), (2, 12));
        assert_eq!(collated.targets.dim(), (2, 12));
        assert_eq!(collated.masks.dim(), (2, 12));

        // first sample: 2 real positions × 3 features, then padding
        assert_eq!(collated.inputs.row(0).to_vec()[..6], [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(collated.inputs.row(0).iter().skip(6).all(|&x| x == 0.0));
        assert_eq!(collated.masks.row(0).iter().sum::<f32>(), 6.0);
        assert_eq!(collated.masks.row(1).iter().sum::<f32>(), 3.0);
        assert_eq!(collated.targets[[1, 2]], 206.0);
    }

    #[test]
    fn test_mask_repeats_per_feature() {
        let collated = collate(&[sample(1, 2, 0.0)], 2).unwrap();
        assert_eq!(collated.masks.row(0).to_vec(), vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_head_outputs_are_merged() {
        // H = 2, l = 1, Dh = 2 → features [h0f0, h0f1, h1f0, h1f1]
        let heads = A3::from_shape_vec((2, 1, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let item = SentenceSample {
            input:  Array2::zeros((1, 4)),
            output: heads.into_dyn(),
            mask:   None,
        };
        let collated = collate(&[item], 1).unwrap();
        assert_eq!(collated.targets.row(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(collated.masks.row(0).to_vec(), vec![1.0; 4]);
    }

    #[test]
    fn test_rejects_overlong_and_empty() {
        assert!(collate(&[sample(5, 2, 0.0)], 4).is_err());
        assert!(collate(&[], 4).is_err());
    }

    #[test]
    fn test_batcher_builds_tensors() {
        let batcher = SurrogateBatcher::<TestBackend>::new(Default::default(), 3);
        let batch   = batcher.batch(vec![sample(2, 2, 0.0), sample(3, 2, 0.0)]);
        assert_eq!(batch.inputs.dims(), [2, 6]);
        assert_eq!(batch.targets.dims(), [2, 6]);
        let mask_sum: f32 = batch.masks.sum().into_scalar();
        assert_eq!(mask_sum, 10.0);
    }

    proptest! {
        #[test]
        fn prop_collated_tensors_share_layout(
            lengths in prop::collection::vec(1usize..8, 1..6),
            width   in 1usize..5,
            max_len in 8usize..12,
        ) {
            let items: Vec<SentenceSample> = lengths
                .iter()
                .enumerate()
                .map(|(i, &l)| sample(l, width, i as f32 * 10.0))
                .collect();
            let collated = collate(&items, max_len).unwrap();

            let expected = (items.len(), max_len * width);
            prop_assert_eq!(collated.inputs.dim(), expected);
            prop_assert_eq!(collated.targets.dim(), expected);
            prop_assert_eq!(collated.masks.dim(), expected);

            for (row, &l) in lengths.iter().enumerate() {
                let real: f32 = collated.masks.row(row).sum();
                prop_assert_eq!(real as usize, l * width);
                // nothing leaks past the mask
                for (x, m) in collated.inputs.row(row).iter().zip(collated.masks.row(row)) {
                    prop_assert!(*m == 1.0 || *x == 0.0);
                }
            }
        }
    }
}
