// ============================================================
// Layer 2 — TranslateUseCase
// ============================================================
// Orchestrates training of the translation transformer:
//
//   Step 1: Read train/val sentence pairs   (Layer 4 - data)
//   Step 2: Build or load vocabularies      (Layer 6 - infra)
//   Step 3: Encode and length-filter pairs  (Layer 4 - data)
//   Step 4: Save model + run configs        (Layer 6 - infra)
//   Step 5: Run training loop               (Layer 5 - ml)
//
// The checkpoint directory ends up holding everything the
// extract command needs: both vocabularies, model_config.json
// and the per-epoch weights.

use anyhow::Result;
use burn::backend::{wgpu::WgpuDevice, Autodiff, NdArray, Wgpu};
use serde::{Deserialize, Serialize};

use crate::data::loader::{encode_pairs, DatasetType, LanguageDirection, ParallelCorpusLoader};
use crate::domain::{
    activation::Split,
    constants::{
        BASELINE_MODEL_DIMENSION, BASELINE_MODEL_DROPOUT_PROB, BASELINE_MODEL_LABEL_SMOOTHING,
        BASELINE_MODEL_NUMBER_OF_HEADS, BASELINE_MODEL_NUMBER_OF_LAYERS, CHECKPOINTS_PATH,
        DATA_DIR_PATH, MAX_LEN, NUM_WARMUP_STEPS,
    },
    traits::CorpusSource,
};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
    tokenizer_store::{Side, TokenizerStore},
};
use crate::ml::{model::TransformerConfig, translation::run_translation_training};

pub const MODEL_CONFIG_FILE: &str = "model_config.json";
const RUN_CONFIG_FILE: &str = "translation_config.json";

// ─── Translation Configuration ───────────────────────────────────────────────
// Saved as translation_config.json so a run can be inspected later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub dataset_name:       DatasetType,
    pub language_direction: LanguageDirection,
    pub dataset_path:       String,
    pub checkpoint_dir:     String,
    /// Target number of tokens per batch
    pub batch_size:         usize,
    pub num_epochs:         usize,
    pub num_warmup_steps:   usize,
    pub console_log_freq:   usize,
    pub d_model:            usize,
    pub num_heads:          usize,
    pub num_layers:         usize,
    pub dropout:            f64,
    pub label_smoothing:    f32,
    pub vocab_size:         usize,
    pub min_freq:           usize,
    pub cpu:                bool,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            dataset_name:       DatasetType::Iwslt,
            language_direction: LanguageDirection::E2G,
            dataset_path:       DATA_DIR_PATH.to_string(),
            checkpoint_dir:     CHECKPOINTS_PATH.to_string(),
            batch_size:         1500,
            num_epochs:         20,
            num_warmup_steps:   NUM_WARMUP_STEPS,
            console_log_freq:   10,
            d_model:            BASELINE_MODEL_DIMENSION,
            num_heads:          BASELINE_MODEL_NUMBER_OF_HEADS,
            num_layers:         BASELINE_MODEL_NUMBER_OF_LAYERS,
            dropout:            BASELINE_MODEL_DROPOUT_PROB,
            label_smoothing:    BASELINE_MODEL_LABEL_SMOOTHING,
            vocab_size:         50_000,
            min_freq:           2,
            cpu:                false,
        }
    }
}

// ─── TranslateUseCase ─────────────────────────────────────────────────────────
// ─── TranslateUseCase ─────────────────────────────────────────────────────────
// Vocabularies are reused when they already exist in the
// checkpoint directory, so a second run over the same directory
// keeps token ids stable for any activations already extracted.
pub struct TranslateUseCase {
    config: TranslationConfig,
}

impl TranslateUseCase {
    /// Wrap a configuration; nothing is read until `execute`.
    pub fn new(config: TranslationConfig) -> Self {
        Self { config }
    }

    /// Execute the full translation training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Read parallel corpus ──────────────────────────────────────
        let loader = ParallelCorpusLoader::new(&cfg.dataset_path, cfg.dataset_name, cfg.language_direction);
        let train_raw = loader.load_split(Split::Train)?;
        let val_raw   = loader.load_split(Split::Val)?;
        tracing::info!("Read {} train and {} val pairs", train_raw.len(), val_raw.len());

        // ── Step 2: Vocabularies from the training split ──────────────────────
        let store = TokenizerStore::new(&cfg.checkpoint_dir);
        let src_texts: Vec<String> = train_raw.iter().map(|(s, _)| s.clone()).collect();
        let trg_texts: Vec<String> = train_raw.iter().map(|(_, t)| t.clone()).collect();
        let src_vocab = store.load_or_build(Side::Source, &src_texts, cfg.vocab_size, cfg.min_freq)?;
        let trg_vocab = store.load_or_build(Side::Target, &trg_texts, cfg.vocab_size, cfg.min_freq)?;
        tracing::info!("Vocabulary sizes: src={}, trg={}", src_vocab.size(), trg_vocab.size());

        // ── Step 3: Encode, dropping over-long pairs ──────────────────────────
        let train = encode_pairs(&train_raw, &src_vocab, &trg_vocab, MAX_LEN)?;
        let val   = encode_pairs(&val_raw, &src_vocab, &trg_vocab, MAX_LEN)?;
        tracing::info!("Encoded {} train and {} val pairs (max {} tokens)", train.len(), val.len(), MAX_LEN);

        // ── Step 4: Save configs ──────────────────────────────────────────────
        let model_cfg = TransformerConfig::new(
            src_vocab.size(),
            trg_vocab.size(),
            cfg.d_model,
            cfg.num_heads,
            cfg.num_layers,
            cfg.dropout,
        );
        let ckpt    = CheckpointManager::new(&cfg.checkpoint_dir)?;
        let metrics = MetricsLogger::new(&cfg.checkpoint_dir)?;
        ckpt.save_json(MODEL_CONFIG_FILE, &model_cfg)?;
        ckpt.save_json(RUN_CONFIG_FILE, cfg)?;

        // ── Step 5: Train on the chosen backend ───────────────────────────────
        let pad_id = trg_vocab.pad_id();
        if cfg.cpu {
            let device = Default::default();
            tracing::info!("Using NdArray device: {:?}", device);
            run_translation_training::<Autodiff<NdArray>>(
                cfg, &model_cfg, &train, &val, pad_id, &ckpt, &metrics, &device,
            )?;
        } else {
            let device = WgpuDevice::default();
            tracing::info!("Using WGPU device: {:?}", device);
            run_translation_training::<Autodiff<Wgpu>>(
                cfg, &model_cfg, &train, &val, pad_id, &ckpt, &metrics, &device,
            )?;
        }
        Ok(())
    }
}
