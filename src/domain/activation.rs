// ============================================================
// Layer 3 — Activation Domain Types
// ============================================================
// Names every artefact of the extraction → reconstruction path:
//
//   Split             → train / val / test
//   ExtractionTarget  → which tensors a hook captures
//   LengthMode        → how sentences are filtered by true length
//   ActivationPrefix  → file naming for the per-layer streams
//   SentenceSample    → one sentence trimmed to its true length
//   WordSample        → one word with its sentence context
//
// Shapes use these letters throughout:
//   B = batch, S = padded length, l = true length,
//   D = embedding width, H = heads, Dh = D / H

use ndarray::{Array1, Array2, ArrayD, Ix2, Ix3};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::domain::error::DatasetError;

// ─── Split ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    /// Extraction order
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val   => "val",
            Split::Test  => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ExtractionTarget ─────────────────────────────────────────────────────────
/// `Whole` captures each encoder layer's input and output `[B, S, D]`.
/// `Mha` captures the attention sublayer's input `[B, S, D]` and its
/// per-head context `[B, H, S, Dh]` before the heads are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionTarget {
    Whole,
    Mha,
}

impl ExtractionTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionTarget::Whole => "whole",
            ExtractionTarget::Mha   => "mha",
        }
    }
}

impl FromStr for ExtractionTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whole" => Ok(ExtractionTarget::Whole),
            "mha"   => Ok(ExtractionTarget::Mha),
            other   => Err(format!("extraction target must be 'whole' or 'mha', got '{other}'")),
        }
    }
}

// ─── LengthMode ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthMode {
    /// Keep sentences whose true length is at most `n`
    Max,
    /// Keep sentences whose true length is exactly `n`; no mask is kept
    Exact,
}

impl LengthMode {
    pub fn accepts(&self, length: usize, n: usize) -> bool {
        match self {
            LengthMode::Max   => length <= n,
            LengthMode::Exact => length == n,
        }
    }

    pub fn keeps_mask(&self) -> bool {
        matches!(self, LengthMode::Max)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LengthMode::Max   => "max",
            LengthMode::Exact => "exact",
        }
    }
}

impl FromStr for LengthMode {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max"   => Ok(LengthMode::Max),
            "exact" => Ok(LengthMode::Exact),
            other   => Err(DatasetError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for LengthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ActivationPrefix ─────────────────────────────────────────────────────────
/// Naming scheme shared by the extractor (writer) and the surrogate
/// trainer (reader):
///
///   {model}_{dataset}_{direction}_{target}_layer{i}_inputs_{split}
///   {model}_{dataset}_{direction}_{target}_layer{i}_outputs_{split}
///   {model}_{dataset}_{direction}_{target}_masks_{split}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationPrefix {
    pub model_name:   String,
    pub dataset_name: String,
    pub direction:    String,
    pub target:       ExtractionTarget,
}

impl ActivationPrefix {
    pub fn new(
        model_name:   impl Into<String>,
        dataset_name: impl Into<String>,
        direction:    impl Into<String>,
        target:       ExtractionTarget,
    ) -> Self {
        Self {
            model_name:   model_name.into(),
            dataset_name: dataset_name.into(),
            direction:    direction.into(),
            target,
        }
    }

    /// The common prefix every file of this run starts with
    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.model_name,
            self.dataset_name,
            self.direction,
            self.target.as_str()
        )
    }

    pub fn inputs_file(&self, layer: usize, split: Split) -> String {
        format!("{}_layer{layer}_inputs_{split}", self.stem())
    }

    pub fn outputs_file(&self, layer: usize, split: Split) -> String {
        format!("{}_layer{layer}_outputs_{split}", self.stem())
    }

    pub fn masks_file(&self, split: Split) -> String {
        format!("{}_masks_{split}", self.stem())
    }

    /// The three stream paths for one layer and one split
    pub fn split_files(&self, dir: &Path, layer: usize, split: Split) -> SplitFiles {
        SplitFiles {
            inputs:  dir.join(self.inputs_file(layer, split)),
            outputs: dir.join(self.outputs_file(layer, split)),
            masks:   dir.join(self.masks_file(split)),
        }
    }
}

/// Paths of one split's input, output and mask streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitFiles {
    pub inputs:  PathBuf,
    pub outputs: PathBuf,
    pub masks:   PathBuf,
}

// ─── SentenceSample ───────────────────────────────────────────────────────────
/// One sentence cut to its true length `l`.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceSample {
    /// `[l, D]`
    pub input: Array2<f32>,

    /// `[l, D]` for whole-layer captures, `[H, l, Dh]` for per-head captures
    pub output: ArrayD<f32>,

    /// `[l]` of ones; `None` in exact mode where every sample has length `n`
    pub mask: Option<Array1<f32>>,
}

impl SentenceSample {
    /// True length
    pub fn len(&self) -> usize {
        self.input.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emb_size(&self) -> usize {
        self.input.ncols()
    }

    /// Validity mask, synthesised as all ones when none was kept
    pub fn mask_or_ones(&self) -> Array1<f32> {
        match &self.mask {
            Some(mask) => mask.clone(),
            None       => Array1::ones(self.len()),
        }
    }

    /// The output as `[l, features]`, folding `[H, l, Dh]` into
    /// `[l, H * Dh]` with the heads of each position laid side by side.
    pub fn merged_output(&self) -> Result<Array2<f32>, DatasetError> {
        merge_heads(&self.output)
    }
}

/// Fold a per-sentence output into `[l, features]`.
pub fn merge_heads(output: &ArrayD<f32>) -> Result<Array2<f32>, DatasetError> {
    match output.ndim() {
        2 => Ok(output
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| DatasetError::ShapeMismatch(e.to_string()))?
            .to_owned()),
        3 => {
            let heads = output
                .view()
                .into_dimensionality::<Ix3>()
                .map_err(|e| DatasetError::ShapeMismatch(e.to_string()))?;
            let (h, l, dh) = heads.dim();
            let per_position = heads.permuted_axes([1, 0, 2]);
            let merged = per_position
                .to_shape((l, h * dh))
                .map_err(|e| DatasetError::ShapeMismatch(e.to_string()))?;
            Ok(merged.to_owned())
        }
        n => Err(DatasetError::ShapeMismatch(format!(
            "per-sentence output must have rank 2 or 3, got rank {n}"
        ))),
    }
}

// ─── WordSample ───────────────────────────────────────────────────────────────
/// One word of a sentence with the mean of the remaining words
/// appended as context.
#[derive(Debug, Clone, PartialEq)]
pub struct WordSample {
    /// `[2 * D]`: the word, then the mean of the other words
    pub input: Array1<f32>,

    /// `[D]`: the layer output at this word
    pub output: Array1<f32>,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_mode_parsing_rejects_unknown() {
        assert_eq!("max".parse::<LengthMode>().unwrap(), LengthMode::Max);
        assert_eq!("exact".parse::<LengthMode>().unwrap(), LengthMode::Exact);
        let err = "min".parse::<LengthMode>().unwrap_err();
        assert!(matches!(err, DatasetError::InvalidMode(ref m) if m == "min"));
    }

    #[test]
    fn test_mode_predicates() {
        assert!(LengthMode::Max.accepts(3, 5));
        assert!(LengthMode::Max.accepts(5, 5));
        assert!(!LengthMode::Max.accepts(6, 5));
        assert!(LengthMode::Exact.accepts(5, 5));
        assert!(!LengthMode::Exact.accepts(4, 5));
    }

    #[test]
    fn test_file_naming() {
        let prefix = ActivationPrefix::new("base", "IWSLT", "E2G", ExtractionTarget::Whole);
        assert_eq!(prefix.stem(), "base_IWSLT_E2G_whole");
        assert_eq!(prefix.inputs_file(2, Split::Train), "base_IWSLT_E2G_whole_layer2_inputs_train");
        assert_eq!(prefix.outputs_file(0, Split::Val), "base_IWSLT_E2G_whole_layer0_outputs_val");
        assert_eq!(prefix.masks_file(Split::Test), "base_IWSLT_E2G_whole_masks_test");
    }

    #[test]
    fn test_merge_heads_interleaves_per_position() {
        // H = 2, l = 2, Dh = 2
        let heads = Array3::from_shape_vec(
            (2, 2, 2),
            vec![
                1.0, 2.0, // head 0, pos 0
                3.0, 4.0, // head 0, pos 1
                5.0, 6.0, // head 1, pos 0
                7.0, 8.0, // head 1, pos 1
            ],
        )
        .unwrap()
        .into_dyn();
        let merged = merge_heads(&heads).unwrap();
        assert_eq!(merged, array![[1.0, 2.0, 5.0, 6.0], [3.0, 4.0, 7.0, 8.0]]);
    }

    #[test]
    fn test_mask_or_ones_for_exact_samples() {
        let sample = SentenceSample {
            input:  Array2::zeros((3, 4)),
            output: Array2::<f32>::zeros((3, 4)).into_dyn(),
            mask:   None,
        };
        assert_eq!(sample.mask_or_ones(), array![1.0, 1.0, 1.0]);
        assert_eq!(sample.len(), 3);
        assert_eq!(sample.emb_size(), 4);
    }
}
