// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores module weights using Burn's CompactRecorder
// and keeps the JSON side files needed to rebuild a module
// before its weights can be loaded into it.
//
// Translation runs:
//   checkpoints/
//     transformer_ckpt_epoch_1.mpk.gz
//     transformer_ckpt_epoch_2.mpk.gz
//     latest_epoch.json             ← number of the newest epoch
//     model_config.json             ← TransformerConfig
//     src_tokenizer.json / trg_tokenizer.json (TokenizerStore)
//
// Surrogate runs ({root}/{folder}/):
//     transformer_ckpt_epoch_1_layer_0.mpk.gz
//     transformer_ckpt_epoch_21_layer_0.mpk.gz
//     surrogate_config.json
//
// The recorder appends its own ".mpk.gz" extension to the stem.

use anyhow::{Context, Result};
use burn::{
    module::Module,
    prelude::*,
    record::CompactRecorder,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::{Path, PathBuf}};

const LATEST_EPOCH_FILE: &str = "latest_epoch.json";

/// Manages saving and loading of checkpoints inside one directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create a new CheckpointManager, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stem of a translation model checkpoint
    pub fn transformer_stem(epoch: usize) -> String {
        format!("transformer_ckpt_epoch_{epoch}")
    }

    /// Stem of a surrogate checkpoint for one encoder layer
    pub fn surrogate_stem(epoch: usize, layer: usize) -> String {
        format!("transformer_ckpt_epoch_{epoch}_layer_{layer}")
    }

    /// Record any module's parameters under `{dir}/{stem}`.
    pub fn save_module<B: Backend, M: Module<B>>(&self, module: &M, stem: &str) -> Result<PathBuf> {
        let path = self.dir.join(stem);
        module
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        tracing::debug!("Saved checkpoint '{}'", path.display());
        Ok(path)
    }

    /// Load parameters recorded under `{dir}/{stem}` into `module`.
    /// The module must have the architecture the record was made from.
    pub fn load_module<B: Backend, M: Module<B>>(
        &self,
        module: M,
        stem:   &str,
        device: &B::Device,
    ) -> Result<M> {
        let path = self.dir.join(stem);
        module
            .load_file(path.clone(), &CompactRecorder::new(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))
    }

    /// Save a translation model for `epoch` and move the latest pointer.
    pub fn save_epoch<B: Backend, M: Module<B>>(&self, module: &M, epoch: usize) -> Result<()> {
        self.save_module(module, &Self::transformer_stem(epoch))?;
        self.save_json(LATEST_EPOCH_FILE, &epoch)?;
        Ok(())
    }

    /// Load the newest translation checkpoint into `module`.
    pub fn load_latest<B: Backend, M: Module<B>>(&self, module: M, device: &B::Device) -> Result<M> {
        let epoch: usize = self
            .load_json(LATEST_EPOCH_FILE)
            .context("No translation checkpoint found. Have you run 'train' first?")?;
        tracing::info!("Loading checkpoint from epoch {}", epoch);
        self.load_module(module, &Self::transformer_stem(epoch), device)
    }

    /// Write a serde value as pretty JSON inside the checkpoint directory.
    pub fn save_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved '{}'", path.display());
        Ok(())
    }

    pub fn load_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Cannot parse '{}'", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        nn::{Linear, LinearConfig},
    };
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_stems() {
        assert_eq!(CheckpointManager::transformer_stem(3), "transformer_ckpt_epoch_3");
        assert_eq!(CheckpointManager::surrogate_stem(21, 4), "transformer_ckpt_epoch_21_layer_4");
    }

    #[test]
    fn test_module_round_trip_restores_weights() {
        let dir    = TempDir::new().unwrap();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();

        let saved: Linear<TestBackend> = LinearConfig::new(4, 3).init(&device);
        ckpt.save_epoch(&saved, 2).unwrap();

        let fresh: Linear<TestBackend> = LinearConfig::new(4, 3).init(&device);
        let loaded = ckpt.load_latest(fresh, &device).unwrap();

        let a = saved.weight.val().into_data().to_vec::<f32>().unwrap();
        let b = loaded.weight.val().into_data().to_vec::<f32>().unwrap();
        // CompactRecorder stores half precision
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-2);
        }
    }

    #[test]
    fn test_load_latest_without_training_fails() {
        let dir    = TempDir::new().unwrap();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();
        let fresh: Linear<TestBackend> = LinearConfig::new(2, 2).init(&device);
        assert!(ckpt.load_latest(fresh, &device).is_err());
    }
}
