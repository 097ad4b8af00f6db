// ============================================================
// Layer 2 — SurrogateUseCase
// ============================================================
// Orchestrates surrogate training for one encoder layer:
//
//   Step 1: Locate the layer's activation files  (Layer 3 - domain)
//   Step 2: Rebuild train (and val) datasets     (Layer 4 - data)
//   Step 3: Optional random dev subset           (Layer 4 - data)
//   Step 4: Check widths against the surrogate   (Layer 5 - ml)
//   Step 5: Prepare checkpoint dir and configs   (Layer 6 - infra)
//   Step 6: Run training loop                    (Layer 5 - ml)

use anyhow::{Context, Result};
use burn::backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::{
    dataset::FixedLengthDataset,
    loader::{DatasetType, LanguageDirection},
    splitter::split_by_fraction,
};
use crate::domain::{
    activation::{ActivationPrefix, ExtractionTarget, LengthMode, Split},
    constants::{
        BASELINE_MODEL_DIMENSION, CHECKPOINTS_PATH, LAYER_OUTPUT_PATH, MAX_LEN,
        SURROGATE_CHECKPOINT_FREQ,
    },
    traits::EmbeddingWidth,
};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::{
    surrogate::{SurrogateConfig, SurrogateKind},
    trainer::run_surrogate_training,
};

const SURROGATE_CONFIG_FILE: &str = "surrogate_config.json";
const DEV_FRACTION: f64 = 0.2;

// ─── Surrogate Training Configuration ────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurrogateTrainConfig {
    pub num_epochs:              usize,
    /// Directory holding the extracted activation files
    pub dataset_path:            String,
    pub model_dimension:         usize,
    /// Read at most this many batches and skip the cache
    pub num_of_loaded_files:     Option<usize>,
    /// Encoder layer the surrogate imitates
    pub layer:                   usize,
    pub batch_size:              usize,
    pub checkpoints_folder_name: String,
    pub checkpoint_root:         String,
    pub checkpoint_freq:         usize,
    pub console_log_freq:        usize,
    pub model_name:              String,
    pub dataset_name:            DatasetType,
    pub language_direction:      LanguageDirection,
    pub target:                  ExtractionTarget,
    pub kind:                    SurrogateKind,
    pub max_len:                 usize,
    pub mode:                    LengthMode,
    pub uniform_init:            bool,
    pub dev:                     bool,
    pub seed:                    u64,
    /// Number of GPUs sharded kinds may use
    pub num_devices:             usize,
    pub cpu:                     bool,
}

impl Default for SurrogateTrainConfig {
    fn default() -> Self {
        Self {
            num_epochs:              150,
            dataset_path:            LAYER_OUTPUT_PATH.to_string(),
            model_dimension:         BASELINE_MODEL_DIMENSION,
            num_of_loaded_files:     None,
            layer:                   0,
            batch_size:              500,
            checkpoints_folder_name: String::new(),
            checkpoint_root:         CHECKPOINTS_PATH.to_string(),
            checkpoint_freq:         SURROGATE_CHECKPOINT_FREQ,
            console_log_freq:        10,
            model_name:              String::new(),
            dataset_name:            DatasetType::Iwslt,
            language_direction:      LanguageDirection::E2G,
            target:                  ExtractionTarget::Whole,
            kind:                    SurrogateKind::Shrink2,
            max_len:                 MAX_LEN,
            mode:                    LengthMode::Max,
            uniform_init:            false,
            dev:                     false,
            seed:                    42,
            num_devices:             1,
            cpu:                     false,
        }
    }
}

impl SurrogateTrainConfig {
    /// The file-name prefix the extract command used for this model,
    /// dataset, direction and target. Activation files are found by
    /// appending the layer, tensor role and split to it.
    pub fn prefix(&self) -> ActivationPrefix {
        ActivationPrefix::new(
            self.model_name.clone(),
            self.dataset_name.as_str(),
            self.language_direction.as_str(),
            self.target,
        )
    }

    /// `{checkpoint_root}/{checkpoints_folder_name}`: weights, the
    /// metrics CSV and surrogate_config.json all land here.
    pub fn checkpoint_dir(&self) -> PathBuf {
        Path::new(&self.checkpoint_root).join(&self.checkpoints_folder_name)
    }

    /// Surrogate architecture for this run. Its input width is
    /// `max_len · model_dimension`.
    pub fn surrogate(&self) -> SurrogateConfig {
        SurrogateConfig::new(self.kind, self.model_dimension, self.max_len)
            .with_uniform_init(self.uniform_init)
    }
}

// ─── SurrogateUseCase ─────────────────────────────────────────────────────────
// Owns the run configuration and walks Steps 1-6 above.
// Nothing is written to the checkpoint directory until every
// dataset has been rebuilt and its widths checked, so a bad flag
// fails fast without leaving a half-initialised run behind.
pub struct SurrogateUseCase {
    config: SurrogateTrainConfig,
}

impl SurrogateUseCase {
    /// Wrap a configuration; no file is touched until `execute`.
    pub fn new(config: SurrogateTrainConfig) -> Self {
        Self { config }
    }

    /// Train the surrogate for `config.layer` end to end.
    ///
    /// The validation split is optional: when its input file is
    /// missing the run trains without a validation pass. Errors
    /// when the checkpoints folder name is empty, when the train
    /// split has no samples, or when the captured widths disagree
    /// with `--model-dimension`.
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;
        if cfg.checkpoints_folder_name.trim().is_empty() {
            anyhow::bail!("--checkpoints-folder-name is required");
        }

        // ── Step 1: Activation files of the chosen layer ──────────────────────
        let dir    = Path::new(&cfg.dataset_path);
        let prefix = cfg.prefix();
        let train_files = prefix.split_files(dir, cfg.layer, Split::Train);
        let val_files   = prefix.split_files(dir, cfg.layer, Split::Val);

        // ── Step 2: Rebuild datasets ──────────────────────────────────────────
        let train = FixedLengthDataset::open_with(&train_files, cfg.max_len, cfg.mode, cfg.num_of_loaded_files)
            .with_context(|| format!("Cannot rebuild training set from '{}'", train_files.inputs.display()))?;
        let val = if val_files.inputs.exists() {
            Some(
                FixedLengthDataset::open_with(&val_files, cfg.max_len, cfg.mode, cfg.num_of_loaded_files)
                    .with_context(|| format!("Cannot rebuild validation set from '{}'", val_files.inputs.display()))?,
            )
        } else {
            tracing::warn!("No validation activations at '{}', skipping validation", val_files.inputs.display());
            None
        };

        // ── Step 3: Dev subset ────────────────────────────────────────────────
        let train = if cfg.dev {
            let (subset, _) = split_by_fraction(train.into_samples(), DEV_FRACTION, cfg.seed);
            tracing::info!("Dev mode: training on {} sentences", subset.len());
            FixedLengthDataset::from_samples(subset, cfg.max_len, cfg.mode)
        } else {
            train
        };

        // ── Step 4: Widths must agree with the surrogate ──────────────────────
        check_widths(&train, cfg.model_dimension)?;
        if let Some(val) = &val {
            check_widths(val, cfg.model_dimension)?;
        }
        let surrogate_cfg = cfg.surrogate();
        surrogate_cfg.validate()?;

        // ── Step 5: Checkpoint directory ──────────────────────────────────────
        let ckpt    = CheckpointManager::new(cfg.checkpoint_dir())?;
        let metrics = MetricsLogger::new(cfg.checkpoint_dir())?;
        ckpt.save_json(SURROGATE_CONFIG_FILE, &surrogate_cfg)?;

        // ── Step 6: Train ─────────────────────────────────────────────────────
        if cfg.cpu {
            let devices = vec![NdArrayDevice::default(); cfg.num_devices.max(1)];
            run_surrogate_training::<Autodiff<NdArray>>(cfg, &surrogate_cfg, train, val, &devices, &ckpt, &metrics)?;
        } else {
            let devices = wgpu_devices(cfg.num_devices);
            tracing::info!("Using WGPU devices: {:?}", devices);
            run_surrogate_training::<Autodiff<Wgpu>>(cfg, &surrogate_cfg, train, val, &devices, &ckpt, &metrics)?;
        }
        Ok(())
    }
}

/// Inputs and merged outputs must both be `model_dimension` wide.
fn check_widths(dataset: &FixedLengthDataset, model_dimension: usize) -> Result<()> {
    if dataset.sample_count() == 0 {
        anyhow::bail!(
            "no sentences passed the {} {} filter",
            dataset.mode(),
            dataset.threshold()
        );
    }
    let input_width = dataset.emb_size();
    if input_width != model_dimension {
        anyhow::bail!("activations are {input_width} wide but --model-dimension is {model_dimension}");
    }
    if let Some(output_width) = dataset.output_width()? {
        if output_width != model_dimension {
            anyhow::bail!("outputs are {output_width} wide but --model-dimension is {model_dimension}");
        }
    }
    Ok(())
}

fn wgpu_devices(count: usize) -> Vec<WgpuDevice> {
    if count <= 1 {
        vec![WgpuDevice::default()]
    } else {
        (0..count).map(WgpuDevice::DiscreteGpu).collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::fixtures;
    use tempfile::TempDir;

    fn config(data: &Path, ckpt: &Path) -> SurrogateTrainConfig {
        SurrogateTrainConfig {
            num_epochs:              1,
            dataset_path:            data.to_string_lossy().into_owned(),
            model_dimension:         fixtures::D,
            batch_size:              2,
            checkpoints_folder_name: "run1".into(),
            checkpoint_root:         ckpt.to_string_lossy().into_owned(),
            model_name:              "base".into(),
            max_len:                 4,
            cpu:                     true,
            ..SurrogateTrainConfig::default()
        }
    }

    fn extract_fixture(dir: &Path) {
        let prefix = ActivationPrefix::new("base", "IWSLT", "E2G", ExtractionTarget::Whole);
        let files  = prefix.split_files(dir, 0, Split::Train);
        fixtures::append_batch(&files, 0, &[2, 3, 4], 4, false);
        fixtures::append_batch(&files, 1, &[1, 4], 4, false);
    }

    #[test]
    fn test_checkpoint_folder_is_required() {
        let data = TempDir::new().unwrap();
        let ckpt = TempDir::new().unwrap();
        let cfg  = SurrogateTrainConfig {
            checkpoints_folder_name: String::new(),
            ..config(data.path(), ckpt.path())
        };
        assert!(SurrogateUseCase::new(cfg).execute().is_err());
    }

    #[test]
    fn test_trains_without_validation_split() {
        let data = TempDir::new().unwrap();
        let ckpt = TempDir::new().unwrap();
        extract_fixture(data.path());

        let cfg = config(data.path(), ckpt.path());
        SurrogateUseCase::new(cfg.clone()).execute().unwrap();

        let dir = cfg.checkpoint_dir();
        assert!(dir.join(SURROGATE_CONFIG_FILE).exists());
        assert!(dir.join("metrics.csv").exists());
        let saved: SurrogateConfig = CheckpointManager::new(&dir).unwrap().load_json(SURROGATE_CONFIG_FILE).unwrap();
        assert_eq!(saved.input_width(), 4 * fixtures::D);
    }

    #[test]
    fn test_wrong_model_dimension_is_rejected() {
        let data = TempDir::new().unwrap();
        let ckpt = TempDir::new().unwrap();
        extract_fixture(data.path());

        let cfg = SurrogateTrainConfig {
            model_dimension: fixtures::D + 1,
            ..config(data.path(), ckpt.path())
        };
        let err = SurrogateUseCase::new(cfg).execute().unwrap_err();
        assert!(err.to_string().contains("--model-dimension"));
    }

    #[test]
    fn test_dev_subset_still_trains() {
        let data = TempDir::new().unwrap();
        let ckpt = TempDir::new().unwrap();
        extract_fixture(data.path());

        let cfg = SurrogateTrainConfig {
            dev:                 true,
            num_of_loaded_files: Some(2),
            ..config(data.path(), ckpt.path())
        };
        SurrogateUseCase::new(cfg).execute().unwrap();
    }
}
