// ============================================================
// Layer 5 — Activation Extractor
// ============================================================
// Runs the trained encoder over every split and streams what each
// encoder layer saw and produced into append-only record files.
//
// For each split:
//   1. open one SplitSink (a writer per layer for inputs and outputs)
//   2. for each batch: write the source mask, then encode_hooked()
//      so the sink receives every layer's activations
//   3. drop the sink, which flushes and closes its writers whether
//      the split finished or failed
//
// Before anything is written, every file in the output directory
// starting with the run's prefix is deleted, so two runs in a row
// leave only the second run's records.
//
// Files written per split ({p} = prefix, {s} = train|val|test):
//
//   {p}_masks_{s}                  [B, 1, 1, S]     BOOL
//   {p}_layer{i}_inputs_{s}        [B, S, D]        F32
//   {p}_layer{i}_outputs_{s}       [B, S, D]        whole target
//                                  [B, H, S, D/H]   mha target
//
// Record k of every file describes the same batch k.
//
// The model is expected on a non-autodiff backend: dropout is then
// inactive and no gradients are tracked.

use anyhow::{Context, Result};
use burn::prelude::*;
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};

use crate::data::token_batcher::{SourceBatch, TokenBudgetBatcher};
use crate::domain::activation::{ActivationPrefix, ExtractionTarget, Split};
use crate::domain::sentence_pair::TokenPair;
use crate::infra::record_stream::{purge_prefix, RecordWriter};
use crate::ml::model::{EncoderHook, LayerActivations, Transformer};

/// Per-split result of an extraction run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSummary {
    pub split:     Split,
    pub batches:   usize,
    pub sentences: usize,
}

// ─── SplitSink ────────────────────────────────────────────────────────────────
/// Hook that appends each layer's tensors to that layer's files.
struct SplitSink {
    target:  ExtractionTarget,
    inputs:  Vec<RecordWriter>,
    outputs: Vec<RecordWriter>,
}

impl SplitSink {
    fn open(dir: &Path, prefix: &ActivationPrefix, split: Split, num_layers: usize) -> Result<Self> {
        let mut inputs  = Vec::with_capacity(num_layers);
        let mut outputs = Vec::with_capacity(num_layers);
        for layer in 0..num_layers {
            inputs.push(RecordWriter::append_to(dir.join(prefix.inputs_file(layer, split)))?);
            outputs.push(RecordWriter::append_to(dir.join(prefix.outputs_file(layer, split)))?);
        }
        Ok(Self { target: prefix.target, inputs, outputs })
    }

    fn finish(self) -> Result<()> {
        for writer in self.inputs.into_iter().chain(self.outputs) {
            let path = writer.path().to_path_buf();
            let records = writer
                .finish()
                .with_context(|| format!("Cannot flush '{}'", path.display()))?;
            tracing::debug!("'{}': {} records", path.display(), records);
        }
        Ok(())
    }
}

impl<B: Backend> EncoderHook<B> for SplitSink {
    fn on_layer(&mut self, layer: usize, activations: LayerActivations<B>) -> Result<()> {
        let (input, output) = match self.target {
            ExtractionTarget::Whole => (
                tensor_to_array(activations.input)?,
                tensor_to_array(activations.output)?,
            ),
            ExtractionTarget::Mha => (
                tensor_to_array(activations.attention_input)?,
                tensor_to_array(activations.heads)?,
            ),
        };
        let (Some(inputs), Some(outputs)) = (self.inputs.get_mut(layer), self.outputs.get_mut(layer)) else {
            anyhow::bail!("encoder reported layer {layer} but only {} were opened", self.inputs.len());
        };
        inputs.write_f32(&input)?;
        outputs.write_f32(&output)?;
        Ok(())
    }
}

/// Copy a device tensor into a host array of the same shape.
pub fn tensor_to_array<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<ArrayD<f32>> {
    let dims   = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Cannot read tensor data: {e:?}"))?;
    Ok(ArrayD::from_shape_vec(IxDyn(&dims), values)?)
}

// ─── ActivationExtractor ──────────────────────────────────────────────────────
/// Borrows a trained model and writes its encoder activations
/// under `output_dir`, one set of files per split.
pub struct ActivationExtractor<'a, B: Backend> {
    model:            &'a Transformer<B>,
    output_dir:       PathBuf,
    prefix:           ActivationPrefix,
    pad_id:           u32,
    console_log_freq: usize,
}

impl<'a, B: Backend> ActivationExtractor<'a, B> {
    /// `pad_id` pads source rows inside a batch; a progress line is
    /// logged every `console_log_freq` batches (at least 1).
    pub fn new(
        model:            &'a Transformer<B>,
        output_dir:       impl Into<PathBuf>,
        prefix:           ActivationPrefix,
        pad_id:           u32,
        console_log_freq: usize,
    ) -> Self {
        Self {
            model,
            output_dir: output_dir.into(),
            prefix,
            pad_id,
            console_log_freq: console_log_freq.max(1),
        }
    }

    /// Delete every earlier file of this run's prefix.
    pub fn purge_previous(&self) -> Result<usize> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Cannot create '{}'", self.output_dir.display()))?;
        let removed = purge_prefix(&self.output_dir, &self.prefix.stem())?;
        if removed > 0 {
            tracing::info!("Removed {} stale files with prefix '{}'", removed, self.prefix.stem());
        }
        Ok(removed)
    }

    /// Purge, then extract each split in the order given.
    pub fn extract_all(
        &self,
        splits:  &[(Split, Vec<TokenPair>)],
        batcher: &TokenBudgetBatcher,
        device:  &B::Device,
    ) -> Result<Vec<SplitSummary>> {
        self.purge_previous()?;
        splits
            .iter()
            .map(|(split, pairs)| self.extract_split(*split, pairs, &batcher.plan(pairs), device))
            .collect()
    }

    /// Append one split's records. The sink lives only inside this call.
    pub fn extract_split(
        &self,
        split:   Split,
        pairs:   &[TokenPair],
        batches: &[Vec<usize>],
        device:  &B::Device,
    ) -> Result<SplitSummary> {
        let num_layers = self.model.num_encoder_layers();
        let mut sink   = SplitSink::open(&self.output_dir, &self.prefix, split, num_layers)?;
        let mut masks  = RecordWriter::append_to(self.output_dir.join(self.prefix.masks_file(split)))?;
        let mut sentences = 0usize;

        for (batch_idx, indices) in batches.iter().enumerate() {
            let rows: Vec<&[u32]> = indices.iter().map(|&i| pairs[i].src.as_slice()).collect();
            let source = SourceBatch::from_rows(&rows, self.pad_id);

            masks.write_mask(&source.mask_array()?)?;
            self.model
                .encode_hooked(source.ids_tensor(device), source.mask_tensor(device), &mut sink)
                .with_context(|| format!("Extraction failed on {split} batch {batch_idx}"))?;
            sentences += indices.len();

            if batch_idx % self.console_log_freq == 0 {
                tracing::info!("{} batch {}/{} extracted", split, batch_idx + 1, batches.len());
            }
        }

        sink.finish()?;
        masks.finish()?;
        tracing::info!("{}: {} batches, {} sentences", split, batches.len(), sentences);
        Ok(SplitSummary { split, batches: batches.len(), sentences })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::FixedLengthDataset;
    use crate::domain::activation::LengthMode;
    use crate::ml::model::TransformerConfig;
    use burn::backend::NdArray;
    use burn::data::dataset::Dataset;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn pairs() -> Vec<TokenPair> {
        vec![
            TokenPair::new(vec![4, 5, 6], vec![2, 9, 3]),
            TokenPair::new(vec![7, 8], vec![2, 10, 3]),
            TokenPair::new(vec![4], vec![2, 11, 3]),
        ]
    }

    fn model(device: &<TestBackend as Backend>::Device) -> Transformer<TestBackend> {
        TransformerConfig::new(12, 12, 8, 2, 2, 0.0).init(device)
    }

    #[test]
    fn test_extracted_records_rebuild_every_sentence() {
        let dir    = TempDir::new().unwrap();
        let device = Default::default();
        let model  = model(&device);
        let prefix = ActivationPrefix::new("base", "IWSLT", "E2G", ExtractionTarget::Whole);
        let extractor = ActivationExtractor::new(&model, dir.path(), prefix.clone(), 0, 10);

        let summary = extractor
            .extract_all(&[(Split::Train, pairs())], &TokenBudgetBatcher::new(6), &device)
            .unwrap();
        assert_eq!(summary[0].sentences, 3);
        assert_eq!(summary[0].batches, 2);

        let files = prefix.split_files(dir.path(), 1, Split::Train);
        let ds = FixedLengthDataset::open_with(&files, 100, LengthMode::Max, Some(usize::MAX)).unwrap();
        let mut lengths: Vec<usize> = (0..ds.len()).map(|i| ds.get(i).unwrap().len()).collect();
        lengths.sort_unstable();
        assert_eq!(lengths, vec![1, 2, 3]);
        assert_eq!(ds.get(0).unwrap().output.ndim(), 2);
    }

    #[test]
    fn test_heads_are_captured_in_mha_mode() {
        let dir    = TempDir::new().unwrap();
        let device = Default::default();
        let model  = model(&device);
        let prefix = ActivationPrefix::new("base", "IWSLT", "E2G", ExtractionTarget::Mha);
        let extractor = ActivationExtractor::new(&model, dir.path(), prefix.clone(), 0, 10);
        extractor
            .extract_all(&[(Split::Val, pairs())], &TokenBudgetBatcher::new(100), &device)
            .unwrap();

        let files = prefix.split_files(dir.path(), 0, Split::Val);
        let ds = FixedLengthDataset::open_with(&files, 3, LengthMode::Exact, Some(usize::MAX)).unwrap();
        assert_eq!(ds.len(), 1);
        // [H, l, Dh]
        assert_eq!(ds.get(0).unwrap().output.shape(), &[2, 3, 4]);
    }

    #[test]
    fn test_second_run_replaces_first() {
        let dir    = TempDir::new().unwrap();
        let device = Default::default();
        let model  = model(&device);
        let prefix = ActivationPrefix::new("base", "IWSLT", "E2G", ExtractionTarget::Whole);
        let extractor = ActivationExtractor::new(&model, dir.path(), prefix.clone(), 0, 10);
        let batcher   = TokenBudgetBatcher::new(100);

        extractor.extract_all(&[(Split::Test, pairs())], &batcher, &device).unwrap();
        extractor.extract_all(&[(Split::Test, pairs())], &batcher, &device).unwrap();

        let files = prefix.split_files(dir.path(), 0, Split::Test);
        let ds = FixedLengthDataset::open_with(&files, 100, LengthMode::Max, Some(usize::MAX)).unwrap();
        assert_eq!(ds.len(), 3);
    }
}
