// ============================================================
// Layer 4 — Single-Word Activation Dataset
// ============================================================
// Turns every word of every extracted sentence into one sample:
//
//   input  = [ word_k , mean of the other l-1 words ]   (2·D)
//   target = layer output at word k                     (D)
//
// For one-word sentences the context half is zeros. Per-head
// outputs are merged before the word's row is taken.
//
// Cache: {inputs}_single.cache and {outputs}_single.cache

use burn::data::dataset::Dataset;
use ndarray::{concatenate, Array1, Array2, ArrayD, Axis, Ix1};
use std::{path::Path, time::Instant};

use crate::data::dataset::ActivationBatches;
use crate::domain::activation::{merge_heads, SplitFiles, WordSample};
use crate::domain::error::DatasetError;
use crate::domain::traits::EmbeddingWidth;
use crate::infra::sample_cache::{load_tensors, save_tensors, single_cache_path};

#[derive(Debug, Clone)]
pub struct SingleWordDataset {
    samples: Vec<WordSample>,
}

impl SingleWordDataset {
    /// Build from the split's streams, or from
    /// `{inputs}_single.cache` / `{outputs}_single.cache` when both
    /// exist and decode. An unreadable cache is rebuilt.
    pub fn open(files: &SplitFiles) -> Result<Self, DatasetError> {
        let start        = Instant::now();
        let input_cache  = single_cache_path(&files.inputs);
        let output_cache = single_cache_path(&files.outputs);

        let from_cache = if input_cache.exists() && output_cache.exists() {
            tracing::info!("Loading cached word samples from '{}'", input_cache.display());
            match load_word_cache(&input_cache, &output_cache) {
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
                let samples = read_words(files)?;
                save_tensors(&input_cache, &samples.iter().map(|s| s.input.clone().into_dyn()).collect::<Vec<_>>())?;
                save_tensors(&output_cache, &samples.iter().map(|s| s.output.clone().into_dyn()).collect::<Vec<_>>())?;
                samples
            }
        };

        tracing::info!("Loaded {} word samples in {:.2?}", samples.len(), start.elapsed());
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[WordSample] {
        &self.samples
    }
}

fn load_word_cache(input_cache: &Path, output_cache: &Path) -> Result<Vec<WordSample>, DatasetError> {
    let inputs  = load_tensors(input_cache)?;
    let outputs = load_tensors(output_cache)?;
    if inputs.len() != outputs.len() {
        return Err(DatasetError::ShapeMismatch(format!(
            "word cache holds {} inputs but {} outputs",
            inputs.len(),
            outputs.len()
        )));
    }
    inputs
        .into_iter()
        .zip(outputs)
        .map(|(i, o)| -> Result<WordSample, DatasetError> {
            Ok(WordSample { input: to_vector(i)?, output: to_vector(o)? })
        })
        .collect()
}

fn to_vector(array: ArrayD<f32>) -> Result<Array1<f32>, DatasetError> {
    array
        .into_dimensionality::<Ix1>()
        .map_err(|e| DatasetError::ShapeMismatch(format!("cached word sample: {e}")))
}

fn read_words(files: &SplitFiles) -> Result<Vec<WordSample>, DatasetError> {
    let mut batches = ActivationBatches::open(files)?;
    let mut samples = Vec::new();

    while let Some(batch) = batches.next_batch()? {
        for (j, &l) in batch.lengths.iter().enumerate() {
            if l == 0 {
                continue;
            }
            let words   = batch.sentence_input(j, l);
            let outputs = merge_heads(&batch.sentence_output(j, l))?;
            samples.extend(word_samples(&words, &outputs)?);
        }
    }
    Ok(samples)
}

/// One sample per row of `words` (`[l, D]`), targets from `outputs` (`[l, D]`).
fn word_samples(words: &Array2<f32>, outputs: &Array2<f32>) -> Result<Vec<WordSample>, DatasetError> {
    let l = words.nrows();
    let total = words.sum_axis(Axis(0));

    (0..l)
        .map(|k| -> Result<WordSample, DatasetError> {
            let word = words.row(k);
            let context = if l > 1 {
                (&total - &word) / (l - 1) as f32
            } else {
                Array1::zeros(word.len())
            };
            let input = concatenate(Axis(0), &[word, context.view()])
                .map_err(|e| DatasetError::ShapeMismatch(e.to_string()))?;
            Ok(WordSample { input, output: outputs.row(k).to_owned() })
        })
        .collect()
}

// ─── Trait Implementations ────────────────────────────────────────────────────
impl Dataset<WordSample> for SingleWordDataset {
    fn get(&self, index: usize) -> Option<WordSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

impl EmbeddingWidth for SingleWordDataset {
    fn emb_size(&self) -> usize {
        self.samples.first().map_or(0, |s| s.input.len())
    }

    fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
