// ============================================================
// Layer 5 — Translation Training Loop
// ============================================================
// Trains the encoder-decoder on token-budget batches.
//
//   - Training runs on an AutodiffBackend (Autodiff<Wgpu> or
//     Autodiff<NdArray>), validation on model.valid(), i.e. the
//     inner backend with dropout disabled
//   - Batch order is reshuffled every epoch; the validation plan
//     is fixed
//   - The learning rate follows the warmup schedule below and is
//     handed to Adam on every step
//
//   lr(step) = d_model^-0.5 · min(step^-0.5, step · warmup^-1.5)
//
// Reference: Vaswani et al. (2017) §5.3, Burn Book §5 (Training)

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::translate_use_case::TranslationConfig;
use crate::data::token_batcher::{collate_pairs, TokenBudgetBatcher};
use crate::domain::sentence_pair::TokenPair;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::model::{Transformer, TransformerConfig};

/// Inverse-square-root schedule with linear warmup. `step` starts at 1.
pub fn noam_lr(step: usize, d_model: usize, warmup: usize) -> f64 {
    let step   = step.max(1) as f64;
    let warmup = warmup.max(1) as f64;
    (d_model as f64).powf(-0.5) * step.powf(-0.5).min(step * warmup.powf(-1.5))
}

/// Train the transformer on pre-encoded pairs and return it.
/// A checkpoint and a metrics row are written after every epoch.
pub fn run_translation_training<B: AutodiffBackend>(
    cfg:       &TranslationConfig,
    model_cfg: &TransformerConfig,
    train:     &[TokenPair],
    val:       &[TokenPair],
    pad_id:    u32,
    ckpt:      &CheckpointManager,
    metrics:   &MetricsLogger,
    device:    &B::Device,
) -> Result<Transformer<B>> {

    // ── Build model ───────────────────────────────────────────────────────────
    let mut model: Transformer<B> = model_cfg.init(device);
    tracing::info!(
        "Transformer ready: {} layers, d_model={}, {} heads",
        model_cfg.num_layers, model_cfg.d_model, model_cfg.num_heads,
    );

    // ── Adam optimiser ────────────────────────────────────────────────────────
    let mut optim = AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.98)
        .with_epsilon(1e-9)
        .init();

    let batcher     = TokenBudgetBatcher::new(cfg.batch_size);
    let val_batches = batcher.plan(val);
    let log_freq    = cfg.console_log_freq.max(1);

    let mut step = 0usize;
    let mut best_val_loss = f64::INFINITY;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.num_epochs {

        // ── Training phase ────────────────────────────────────────────────────
        let plan = batcher.plan_shuffled(train);
        let mut loss_sum = 0.0f64;
        let mut tokens   = 0usize;

        for (batch_idx, indices) in plan.iter().enumerate() {
            step += 1;
            let batch = collate_pairs::<B>(train, indices, pad_id, device);
            let loss  = model.forward_loss(&batch, pad_id, cfg.label_smoothing);

            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            loss_sum += loss_val * batch.num_trg_tokens as f64;
            tokens   += batch.num_trg_tokens;

            let lr    = noam_lr(step, model_cfg.d_model, cfg.num_warmup_steps);
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);

            if batch_idx % log_freq == 0 {
                tracing::info!(
                    "epoch {} batch {}/{} | loss={:.4} | lr={:.3e}",
                    epoch, batch_idx + 1, plan.len(), loss_val, lr,
                );
            }
        }

        let train_loss = if tokens > 0 { loss_sum / tokens as f64 } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = model.valid();
        let mut val_sum    = 0.0f64;
        let mut val_tokens = 0usize;

        for indices in &val_batches {
            let batch = collate_pairs::<B::InnerBackend>(val, indices, pad_id, device);
            let loss: f64 = model_valid
                .forward_loss(&batch, pad_id, cfg.label_smoothing)
                .into_scalar()
                .elem::<f64>();
            val_sum    += loss * batch.num_trg_tokens as f64;
            val_tokens += batch.num_trg_tokens;
        }

        let val_loss = if val_tokens > 0 { val_sum / val_tokens as f64 } else { f64::NAN };

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | steps={}",
            epoch, cfg.num_epochs, train_loss, val_loss, step,
        );

        let row = EpochMetrics::new(epoch, train_loss, val_loss);
        if row.is_improvement(best_val_loss) {
            best_val_loss = val_loss;
            tracing::info!("New best validation loss {:.4}", val_loss);
        }
        metrics.log(&row)?;

        ckpt.save_epoch(&model, epoch)?;
        tracing::info!("Checkpoint saved for epoch {}", epoch);
    }

    tracing::info!("Translation training complete after {} steps", step);
    Ok(model)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_lr_peaks_at_warmup() {
        let peak = noam_lr(4000, 128, 4000);
        assert!((peak - (128f64 * 4000f64).powf(-0.5)).abs() < 1e-12);
        assert!(noam_lr(100, 128, 4000) < peak);
        assert!(noam_lr(8000, 128, 4000) < peak);
        assert!(noam_lr(2, 128, 4000) > noam_lr(1, 128, 4000));
    }

    #[test]
    fn test_step_zero_is_treated_as_first_step() {
        assert_eq!(noam_lr(0, 64, 10), noam_lr(1, 64, 10));
    }

    #[test]
    fn test_one_epoch_writes_checkpoint_and_metrics() {
        let dir     = TempDir::new().unwrap();
        let ckpt    = CheckpointManager::new(dir.path()).unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();
        let device  = Default::default();

        let pairs = vec![
            TokenPair::new(vec![4, 5, 6], vec![2, 7, 8, 3]),
            TokenPair::new(vec![5, 6], vec![2, 9, 3]),
            TokenPair::new(vec![7], vec![2, 4, 3]),
        ];
        let cfg = TranslationConfig {
            batch_size:       8,
            num_epochs:       1,
            num_warmup_steps: 10,
            ..TranslationConfig::default()
        };
        let model_cfg = TransformerConfig::new(12, 12, 8, 2, 1, 0.0);

        let model = run_translation_training::<TestBackend>(
            &cfg, &model_cfg, &pairs, &pairs, 0, &ckpt, &metrics, &device,
        )
        .unwrap();
        assert_eq!(model.num_encoder_layers(), 1);

        let epoch: usize = ckpt.load_json("latest_epoch.json").unwrap();
        assert_eq!(epoch, 1);
        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }
}
