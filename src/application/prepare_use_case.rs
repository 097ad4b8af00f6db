// ============================================================
// Layer 2 — PrepareUseCase
// ============================================================
// Builds a reconstructed dataset once so its cache files exist
// before training starts, then reports what it holds.
//
//   Fixed  → {path}_fixed_{n}_{mode}.cache   (mask only in max mode)
//   Single → {path}_single.cache

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{dataset::FixedLengthDataset, word_dataset::SingleWordDataset};
use crate::domain::{activation::SplitFiles, traits::EmbeddingWidth};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetVariant {
    /// Whole sentences filtered by length; `mode` is "max" or "exact"
    Fixed { n: usize, mode: String },
    /// One sample per word with sentence context
    Single,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareConfig {
    pub input_path:  PathBuf,
    pub output_path: PathBuf,
    pub mask_path:   PathBuf,
    pub variant:     DatasetVariant,
}

/// What a prepared dataset holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareReport {
    pub samples:  usize,
    pub emb_size: usize,
}

/// Builds one dataset so that later training runs hit its cache.
pub struct PrepareUseCase {
    config: PrepareConfig,
}

impl PrepareUseCase {
    pub fn new(config: PrepareConfig) -> Self {
        Self { config }
    }

    /// Build (or load) the requested dataset and report its size.
    /// An unknown length mode fails before any stream is opened.
    pub fn execute(&self) -> Result<PrepareReport> {
        let cfg = &self.config;
        let files = SplitFiles {
            inputs:  cfg.input_path.clone(),
            outputs: cfg.output_path.clone(),
            masks:   cfg.mask_path.clone(),
        };

        let report = match &cfg.variant {
            DatasetVariant::Fixed { n, mode } => {
                let dataset = FixedLengthDataset::open(&files, *n, mode)
                    .with_context(|| format!("Cannot prepare '{}'", files.inputs.display()))?;
                report(&dataset)
            }
            DatasetVariant::Single => {
                let dataset = SingleWordDataset::open(&files)
                    .with_context(|| format!("Cannot prepare '{}'", files.inputs.display()))?;
                report(&dataset)
            }
        };

        tracing::info!("{} samples, embedding size {}", report.samples, report.emb_size);
        Ok(report)
    }
}

fn report(dataset: &impl EmbeddingWidth) -> PrepareReport {
    PrepareReport {
        samples:  dataset.sample_count(),
        emb_size: dataset.emb_size(),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::fixtures;
    use crate::domain::activation::ExtractionTarget;
    use tempfile::TempDir;

    fn config(files: &SplitFiles, variant: DatasetVariant) -> PrepareConfig {
        PrepareConfig {
            input_path:  files.inputs.clone(),
            output_path: files.outputs.clone(),
            mask_path:   files.masks.clone(),
            variant,
        }
    }

    #[test]
    fn test_fixed_variant_reports_and_caches() {
        let dir   = TempDir::new().unwrap();
        let files = fixtures::files(dir.path(), ExtractionTarget::Whole);
        fixtures::append_batch(&files, 0, &[2, 3], 3, false);

        let variant = DatasetVariant::Fixed { n: 3, mode: "max".into() };
        let report  = PrepareUseCase::new(config(&files, variant)).execute().unwrap();
        assert_eq!(report, PrepareReport { samples: 2, emb_size: fixtures::D });

        let cache = format!("{}_fixed_3_max.cache", files.inputs.display());
        assert!(std::path::Path::new(&cache).exists());
    }

    #[test]
    fn test_single_variant_doubles_width() {
        let dir   = TempDir::new().unwrap();
        let files = fixtures::files(dir.path(), ExtractionTarget::Whole);
        fixtures::append_batch(&files, 0, &[2, 3], 3, false);

        let report = PrepareUseCase::new(config(&files, DatasetVariant::Single)).execute().unwrap();
        assert_eq!(report, PrepareReport { samples: 5, emb_size: 2 * fixtures::D });
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let dir   = TempDir::new().unwrap();
        let files = fixtures::files(dir.path(), ExtractionTarget::Whole);
        let variant = DatasetVariant::Fixed { n: 3, mode: "shortest".into() };
        assert!(PrepareUseCase::new(config(&files, variant)).execute().is_err());
    }
}
