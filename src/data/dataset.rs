// ============================================================
// Layer 4 — Fixed-Length Activation Dataset
// ============================================================
// Rebuilds per-sentence samples from the three record streams one
// encoder layer produced for one split (inputs, masks, outputs).
//
// Read loop (ActivationBatches):
//   - one record from each stream per step, in lock-step
//   - all three streams ending together is the normal end
//   - one stream ending early is StreamsOutOfStep
//
// Per batch:
//   mask    [B, 1, 1, S] → squeeze singleton axes → [B, S]
//   lengths = row sums of the mask
//   input   [B, S, D]        → sentence j: input[j, :l]
//   output  [B, S, D]        → sentence j: output[j, :l]
//           [B, H, S, Dh]    → sentence j: output[j, :, :l]
//
// Filtering (LengthMode):
//   max   → keep l ≤ n, keep the mask
//   exact → keep l == n, drop the mask
//   sentences with l = 0 are never kept
//
// Cache (skipped entirely when max_batches is set):
//   {inputs}_fixed_{n}_{mode}.cache
//   {outputs}_fixed_{n}_{mode}.cache
//   {masks}_fixed_{n}_{mode}.cache   (max mode only)

use burn::data::dataset::Dataset;
use ndarray::{s, Array1, Array2, Array3, ArrayD, Axis, Ix1, Ix2, Ix3, Slice};
use std::{path::Path, time::Instant};

use crate::domain::activation::{LengthMode, SentenceSample, SplitFiles};
use crate::domain::error::DatasetError;
use crate::domain::traits::EmbeddingWidth;
use crate::infra::record_stream::RecordReader;
use crate::infra::sample_cache::{fixed_cache_path, load_tensors, save_tensors};

// ─── ActivationBatches ────────────────────────────────────────────────────────
/// One batch as read from the three streams, already validated.
#[derive(Debug, Clone)]
pub struct ActivationBatch {
    pub index:   usize,
    /// `[B, S, D]`
    pub input:   Array3<f32>,
    /// `[B, S]`, 1.0 for real tokens
    pub mask:    Array2<f32>,
    /// `[B, S, D]` or `[B, H, S, Dh]`
    pub output:  ArrayD<f32>,
    /// True length of every sentence
    pub lengths: Vec<usize>,
}

impl ActivationBatch {
    /// Sentences in this batch (the leading axis of every tensor).
    pub fn batch_size(&self) -> usize {
        self.input.dim().0
    }

    /// Axis of `output` that runs along the sentence
    fn output_seq_axis(&self) -> usize {
        if self.output.ndim() == 4 { 2 } else { 1 }
    }

    /// `[l, D]` input of sentence `j`
    pub fn sentence_input(&self, j: usize, l: usize) -> Array2<f32> {
        self.input.slice(s![j, ..l, ..]).to_owned()
    }

    /// Output of sentence `j` trimmed to `l` positions: `[l, D]` or `[H, l, Dh]`
    pub fn sentence_output(&self, j: usize, l: usize) -> ArrayD<f32> {
        let row = self.output.index_axis(Axis(0), j);
        row.slice_axis(Axis(self.output_seq_axis() - 1), Slice::from(0..l))
            .to_owned()
    }

    /// First `l` mask entries of sentence `j` as 0.0 / 1.0.
    pub fn sentence_mask(&self, j: usize, l: usize) -> Array1<f32> {
        self.mask.slice(s![j, ..l]).to_owned()
    }
}

/// Lock-step reader over one split's input, mask and output streams.
pub struct ActivationBatches {
    inputs:  RecordReader,
    masks:   RecordReader,
    outputs: RecordReader,
    next:    usize,
}

impl ActivationBatches {
    /// Open the three streams of one split for lock-step reading.
    pub fn open(files: &SplitFiles) -> Result<Self, DatasetError> {
        Ok(Self {
            inputs:  RecordReader::open(&files.inputs)?,
            masks:   RecordReader::open(&files.masks)?,
            outputs: RecordReader::open(&files.outputs)?,
            next:    0,
        })
    }

    /// Read one record from each stream.
    ///
    /// `Ok(None)` only when all three streams end together. A stream
    /// ending early, batch sizes that disagree, or a true length
    /// larger than the padded length are errors.
    pub fn next_batch(&mut self) -> Result<Option<ActivationBatch>, DatasetError> {
        let index = self.next;
        let records = (
            self.inputs.next_record()?,
            self.masks.next_record()?,
            self.outputs.next_record()?,
        );
        let (input, mask, output) = match records {
            (None, None, None)                => return Ok(None),
            (Some(i), Some(m), Some(o))       => (i, m, o),
            (i, m, o) => {
                let state = |present: bool| if present { "has a record" } else { "ended" };
                return Err(DatasetError::StreamsOutOfStep {
                    batch:  index,
                    detail: format!(
                        "inputs {}, masks {}, outputs {}",
                        state(i.is_some()),
                        state(m.is_some()),
                        state(o.is_some())
                    ),
                });
            }
        };
        self.next += 1;
        validate_batch(index, input, mask, output).map(Some)
    }
}

fn validate_batch(
    index:  usize,
    input:  ArrayD<f32>,
    mask:   ArrayD<f32>,
    output: ArrayD<f32>,
) -> Result<ActivationBatch, DatasetError> {
    let input = input
        .into_dimensionality::<Ix3>()
        .map_err(|e| DatasetError::ShapeMismatch(format!("input of batch {index}: {e}")))?;
    let mask = collapse_mask(mask)
        .map_err(|e| DatasetError::ShapeMismatch(format!("mask of batch {index}: {e}")))?;
    let (b, s, _) = input.dim();

    if mask.dim() != (b, s) {
        return Err(DatasetError::StreamsOutOfStep {
            batch:  index,
            detail: format!("input is [{b}, {s}, _] but mask is {:?}", mask.shape()),
        });
    }

    let seq_axis = match output.ndim() {
        3 => 1,
        4 => 2,
        n => {
            return Err(DatasetError::ShapeMismatch(format!(
                "output of batch {index} must have rank 3 or 4, got rank {n}"
            )))
        }
    };
    if output.shape()[0] != b {
        return Err(DatasetError::StreamsOutOfStep {
            batch:  index,
            detail: format!("input holds {b} sentences but output holds {}", output.shape()[0]),
        });
    }
    if output.shape()[seq_axis] != s {
        return Err(DatasetError::ShapeMismatch(format!(
            "output of batch {index} is padded to {} positions, input to {s}",
            output.shape()[seq_axis]
        )));
    }

    let mut lengths = Vec::with_capacity(b);
    for (j, row) in mask.outer_iter().enumerate() {
        let length = row.sum().round().max(0.0) as usize;
        if length > s {
            return Err(DatasetError::LengthExceedsPadding {
                batch:    index,
                sentence: j,
                length,
                padded:   s,
            });
        }
        lengths.push(length);
    }

    Ok(ActivationBatch { index, input, mask, output, lengths })
}

/// Squeeze every singleton axis after the batch axis until `[B, S]` is left.
fn collapse_mask(mask: ArrayD<f32>) -> Result<Array2<f32>, String> {
    let mut mask = mask;
    while mask.ndim() > 2 {
        let axis = (1..mask.ndim())
            .find(|&a| mask.shape()[a] == 1)
            .ok_or_else(|| format!("cannot squeeze {:?} down to [B, S]", mask.shape()))?;
        mask = mask.remove_axis(Axis(axis));
    }
    mask.into_dimensionality::<Ix2>().map_err(|e| e.to_string())
}

// ─── FixedLengthDataset ───────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct FixedLengthDataset {
    samples: Vec<SentenceSample>,
    n:       usize,
    mode:    LengthMode,
}

impl FixedLengthDataset {
    /// Parse `mode` and build the dataset. An unknown mode fails
    /// before any file is touched.
    pub fn open(files: &SplitFiles, n: usize, mode: &str) -> Result<Self, DatasetError> {
        let mode: LengthMode = mode.parse()?;
        Self::open_with(files, n, mode, None)
    }

    /// Build from the streams or from cache. With `max_batches` only
    /// that many batches are read and no cache is consulted or written.
    pub fn open_with(
        files:       &SplitFiles,
        n:           usize,
        mode:        LengthMode,
        max_batches: Option<usize>,
    ) -> Result<Self, DatasetError> {
        let start = Instant::now();
        let input_cache  = fixed_cache_path(&files.inputs, n, mode);
        let output_cache = fixed_cache_path(&files.outputs, n, mode);
        let mask_cache   = fixed_cache_path(&files.masks, n, mode);
        let use_cache    = max_batches.is_none();

        let cached = input_cache.exists()
            && output_cache.exists()
            && (!mode.keeps_mask() || mask_cache.exists());

        let from_cache = if use_cache && cached {
            tracing::info!("Loading cached samples from '{}'", input_cache.display());
            match load_fixed_cache(&input_cache, &output_cache, mode.keeps_mask().then_some(mask_cache.as_path())) {
                Ok(samples) => Some(samples),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable cache '{}': {e}", input_cache.display());
                    None
                }
            }
        } else {
            None
        };

        let samples = match from_cache {
            Some(samples) => samples,
            None => {
                tracing::info!("Reading activations from '{}'", files.inputs.display());
                let samples = read_fixed(files, n, mode, max_batches)?;
                if use_cache {
                    save_tensors(&input_cache, &samples.iter().map(|s| s.input.clone().into_dyn()).collect::<Vec<_>>())?;
                    save_tensors(&output_cache, &samples.iter().map(|s| s.output.clone()).collect::<Vec<_>>())?;
                    if mode.keeps_mask() {
                        save_tensors(&mask_cache, &samples.iter().map(|s| s.mask_or_ones().into_dyn()).collect::<Vec<_>>())?;
                    }
                    tracing::debug!("Cached {} samples next to '{}'", samples.len(), files.inputs.display());
                }
                samples
            }
        };

        tracing::info!(
            "Loaded {} sentences ({} mode, n = {}) in {:.2?}",
            samples.len(),
            mode,
            n,
            start.elapsed()
        );
        Ok(Self { samples, n, mode })
    }

    /// Wrap already reconstructed samples, e.g. a random subset.
    pub fn from_samples(samples: Vec<SentenceSample>, n: usize, mode: LengthMode) -> Self {
        Self { samples, n, mode }
    }

    /// Samples in stream order: batch by batch, sentence by sentence.
    pub fn samples(&self) -> &[SentenceSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<SentenceSample> {
        self.samples
    }

    /// The `n` sentences were filtered against
    pub fn threshold(&self) -> usize {
        self.n
    }

    pub fn mode(&self) -> LengthMode {
        self.mode
    }

    /// Feature width of the merged outputs, `None` when empty
    pub fn output_width(&self) -> Result<Option<usize>, DatasetError> {
        match self.samples.first() {
            Some(sample) => Ok(Some(sample.merged_output()?.ncols())),
            None         => Ok(None),
        }
    }
}

fn read_fixed(
    files:       &SplitFiles,
    n:           usize,
    mode:        LengthMode,
    max_batches: Option<usize>,
) -> Result<Vec<SentenceSample>, DatasetError> {
    let mut batches = ActivationBatches::open(files)?;
    let mut samples = Vec::new();

    while max_batches.map_or(true, |cap| batches.next < cap) {
        let Some(batch) = batches.next_batch()? else { break };
        for (j, &l) in batch.lengths.iter().enumerate() {
            if l == 0 || !mode.accepts(l, n) {
                continue;
            }
            samples.push(SentenceSample {
                input:  batch.sentence_input(j, l),
                output: batch.sentence_output(j, l),
                mask:   mode.keeps_mask().then(|| batch.sentence_mask(j, l)),
            });
        }
    }
    Ok(samples)
}

fn load_fixed_cache(
    input_cache:  &Path,
    output_cache: &Path,
    mask_cache:   Option<&Path>,
) -> Result<Vec<SentenceSample>, DatasetError> {
    let inputs  = load_tensors(input_cache)?;
    let outputs = load_tensors(output_cache)?;
    let masks   = mask_cache.map(load_tensors).transpose()?;
    assemble(inputs, outputs, masks)
}

fn assemble(
    inputs:  Vec<ArrayD<f32>>,
    outputs: Vec<ArrayD<f32>>,
    masks:   Option<Vec<ArrayD<f32>>>,
) -> Result<Vec<SentenceSample>, DatasetError> {
    if inputs.len() != outputs.len() || masks.as_ref().is_some_and(|m| m.len() != inputs.len()) {
        return Err(DatasetError::ShapeMismatch(format!(
            "cache holds {} inputs, {} outputs and {:?} masks",
            inputs.len(),
            outputs.len(),
            masks.as_ref().map(Vec::len)
        )));
    }

    let shape_err = |e: ndarray::ShapeError| DatasetError::ShapeMismatch(format!("cached sample: {e}"));
    let mut masks = masks.map(Vec::into_iter);
    inputs
        .into_iter()
        .zip(outputs)
        .map(|(input, output)| -> Result<SentenceSample, DatasetError> {
            let mask = match masks.as_mut().and_then(Iterator::next) {
                Some(m) => Some(m.into_dimensionality::<Ix1>().map_err(shape_err)?),
                None    => None,
            };
            Ok(SentenceSample {
                input: input.into_dimensionality::<Ix2>().map_err(shape_err)?,
                output,
                mask,
            })
        })
        .collect()
}

// ─── Trait Implementations ────────────────────────────────────────────────────
impl Dataset<SentenceSample> for FixedLengthDataset {
    fn get(&self, index: usize) -> Option<SentenceSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

impl EmbeddingWidth for FixedLengthDataset {
    fn emb_size(&self) -> usize {
        self.samples.first().map_or(0, SentenceSample::emb_size)
    }

    fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

// ─── Test Helpers ─────────────────────────────────────────────────────────────
/// Writes synthetic activation streams; shared by the dataset tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::domain::activation::{ActivationPrefix, ExtractionTarget, Split};
    use crate::infra::record_stream::RecordWriter;
    use ndarray::{Array4, IxDyn};
    use std::path::Path;

    pub const D: usize = 4;
    pub const H: usize = 2;

    pub fn files(dir: &Path, target: ExtractionTarget) -> SplitFiles {
        ActivationPrefix::new("base", "IWSLT", "E2G", target).split_files(dir, 0, Split::Train)
    }

    /// Input value encodes (batch, sentence, position, feature) so
    /// slices can be checked exactly.
    pub fn value(batch: usize, j: usize, pos: usize, f: usize) -> f32 {
        (batch * 1000 + j * 100 + pos * 10 + f) as f32
    }

    /// Append one batch with the given true lengths, padded to `s`.
    pub fn append_batch(files: &SplitFiles, batch: usize, lengths: &[usize], s: usize, heads: bool) {
        let b = lengths.len();
        let input = Array3::from_shape_fn((b, s, D), |(j, p, f)| value(batch, j, p, f));
        let mask  = ArrayD::from_shape_fn(IxDyn(&[b, 1, 1, s]), |ix| ix[3] < lengths[ix[0]]);
        let output = if heads {
            Array4::from_shape_fn((b, H, s, D / H), |(j, h, p, f)| -value(batch, j, p, h * (D / H) + f))
                .into_dyn()
        } else {
            input.mapv(|x| -x).into_dyn()
        };

        let mut w = RecordWriter::append_to(&files.inputs).unwrap();
        w.write_f32(&input.into_dyn()).unwrap();
        w.finish().unwrap();
        let mut w = RecordWriter::append_to(&files.masks).unwrap();
        w.write_mask(&mask).unwrap();
        w.finish().unwrap();
        let mut w = RecordWriter::append_to(&files.outputs).unwrap();
        w.write_f32(&output).unwrap();
        w.finish().unwrap();
    }
}
