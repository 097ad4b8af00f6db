// ============================================================
// Layer 2 — ExtractUseCase
// ============================================================
// Captures the encoder activations of a trained model:
//
//   Step 1: Load vocabularies + model config (Layer 6 - infra)
//   Step 2: Rebuild the model, load weights   (Layer 5 - ml)
//   Step 3: Read and encode all three splits  (Layer 4 - data)
//   Step 4: Extract every split to disk       (Layer 5 - ml)
//
// The model runs on the plain (non-autodiff) backend, so dropout
// is inactive and nothing is tracked for gradients.

use anyhow::Result;
use burn::{
    backend::{wgpu::WgpuDevice, NdArray, Wgpu},
    prelude::*,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::application::translate_use_case::MODEL_CONFIG_FILE;
use crate::data::{
    loader::{encode_pairs, DatasetType, LanguageDirection, ParallelCorpusLoader},
    token_batcher::TokenBudgetBatcher,
};
use crate::domain::{
    activation::{ActivationPrefix, ExtractionTarget, Split},
    constants::{DATA_DIR_PATH, LAYER_OUTPUT_PATH, MAX_LEN},
    sentence_pair::TokenPair,
    traits::CorpusSource,
};
use crate::infra::{
    checkpoint::CheckpointManager,
    tokenizer_store::{Side, TokenizerStore},
};
use crate::ml::{
    extractor::{ActivationExtractor, SplitSummary},
    model::{Transformer, TransformerConfig},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Target number of tokens per batch
    pub batch_size:         usize,
    pub dataset_name:       DatasetType,
    pub language_direction: LanguageDirection,
    pub dataset_path:       String,
    pub console_log_freq:   usize,
    pub model_name:         String,
    /// Checkpoint directory written by `train`
    pub path_to_weights:    String,
    pub output_dir:         String,
    pub target:             ExtractionTarget,
    pub cpu:                bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            batch_size:         1500,
            dataset_name:       DatasetType::Iwslt,
            language_direction: LanguageDirection::E2G,
            dataset_path:       DATA_DIR_PATH.to_string(),
            console_log_freq:   10,
            model_name:         String::new(),
            path_to_weights:    String::new(),
            output_dir:         LAYER_OUTPUT_PATH.to_string(),
            target:             ExtractionTarget::Whole,
            cpu:                false,
        }
    }
}

impl ExtractConfig {
    /// Common start of every file this run writes:
    /// `{model}_{dataset}_{direction}_{target}`.
    pub fn prefix(&self) -> ActivationPrefix {
        ActivationPrefix::new(
            self.model_name.clone(),
            self.dataset_name.as_str(),
            self.language_direction.as_str(),
            self.target,
        )
    }
}

// ─── ExtractUseCase ───────────────────────────────────────────────────────────
// Everything is read from `path_to_weights`, the directory the
// train command wrote: both vocabularies, model_config.json and
// the weights of the latest epoch.
pub struct ExtractUseCase {
    config: ExtractConfig,
}

impl ExtractUseCase {
    /// Wrap a configuration; nothing is loaded yet.
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    /// Run Steps 1-4 and return one summary per split, in
    /// train, val, test order.
    ///
    /// Any file already starting with this run's prefix in
    /// `output_dir` is deleted first, so records from an earlier
    /// extraction are never appended to.
    pub fn execute(&self) -> Result<Vec<SplitSummary>> {
        let cfg = &self.config;
        if cfg.model_name.trim().is_empty() {
            anyhow::bail!("--model-name must not be empty");
        }

        // ── Step 1: Vocabularies and architecture from the weights dir ────────
        let store     = TokenizerStore::new(&cfg.path_to_weights);
        let src_vocab = store.load(Side::Source)?;
        let trg_vocab = store.load(Side::Target)?;
        let ckpt      = CheckpointManager::new(&cfg.path_to_weights)?;
        let model_cfg: TransformerConfig = ckpt.load_json(MODEL_CONFIG_FILE)?;

        // ── Step 3: Encode every split ────────────────────────────────────────
        let loader = ParallelCorpusLoader::new(&cfg.dataset_path, cfg.dataset_name, cfg.language_direction);
        let splits = Split::ALL
            .iter()
            .map(|&split| -> Result<(Split, Vec<TokenPair>)> {
                let raw   = loader.load_split(split)?;
                let pairs = encode_pairs(&raw, &src_vocab, &trg_vocab, MAX_LEN)?;
                tracing::info!("{}: {} pairs to extract", split, pairs.len());
                Ok((split, pairs))
            })
            .collect::<Result<Vec<_>>>()?;

        // ── Step 2 & 4: Rebuild the model and extract ─────────────────────────
        let pad_id = src_vocab.pad_id();
        let summaries = if cfg.cpu {
            extract_on::<NdArray>(cfg, &model_cfg, &ckpt, &splits, pad_id, &Default::default())?
        } else {
            extract_on::<Wgpu>(cfg, &model_cfg, &ckpt, &splits, pad_id, &WgpuDevice::default())?
        };

        tracing::info!("Activations written to '{}' with prefix '{}'", cfg.output_dir, cfg.prefix().stem());
        Ok(summaries)
    }
}

fn extract_on<B: Backend>(
    cfg:       &ExtractConfig,
    model_cfg: &TransformerConfig,
    ckpt:      &CheckpointManager,
    splits:    &[(Split, Vec<TokenPair>)],
    pad_id:    u32,
    device:    &B::Device,
) -> Result<Vec<SplitSummary>> {
    let model: Transformer<B> = model_cfg.init(device);
    let model = ckpt.load_latest(model, device)?;

    let extractor = ActivationExtractor::new(
        &model,
        PathBuf::from(&cfg.output_dir),
        cfg.prefix(),
        pad_id,
        cfg.console_log_freq,
    );
    extractor.extract_all(splits, &TokenBudgetBatcher::new(cfg.batch_size), device)
}
