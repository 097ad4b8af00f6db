// ============================================================
// Layer 5 — Surrogate Training Loop
// ============================================================
// Fits one SurrogateNetwork to one encoder layer's captured
// activations using Burn's DataLoader and Adam.
//
//   - Training uses an AutodiffBackend; validation runs on
//     model.valid(), whose batcher must use the inner backend
//   - Padding never contributes: the network multiplies its
//     output by the mask and the targets are zero there
//   - The mean squared error is divided by the fraction of real
//     elements in the batch, so a padded batch is not scored
//     lower than a full one
//
//   normalizer = Σ mask / (N · max_len · D)
//   loss       = mse(pred, target) / normalizer
//
// Epoch loss is the per-element loss averaged over all real
// elements seen; MAPE is reported alongside.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::Result;
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::surrogate_use_case::SurrogateTrainConfig;
use crate::data::{batcher::SurrogateBatcher, dataset::FixedLengthDataset};
use crate::domain::constants::MAPE_EPSILON;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::surrogate::{SurrogateConfig, SurrogateNetwork};

const LEARNING_RATE: f64 = 1e-4;

/// (Σ mask, Σ mask / number of mask elements)
pub fn mask_statistics<B: Backend>(masks: &Tensor<B, 2>) -> (f64, f64) {
    let [n, w] = masks.dims();
    let sum: f64 = masks.clone().sum().into_scalar().elem::<f64>();
    let total = (n * w) as f64;
    let normalizer = if total > 0.0 { sum / total } else { 0.0 };
    (sum, normalizer)
}

/// Mean of |pred - target| / max(|target|, ε)
pub fn mape<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> f64 {
    let denominator = target.clone().abs().clamp_min(MAPE_EPSILON);
    ((pred - target).abs() / denominator)
        .mean()
        .into_scalar()
        .elem::<f64>()
}

/// Running sums of one phase of an epoch.
#[derive(Debug, Default)]
struct PhaseTotals {
    weighted_loss: f64,
    real_elements: f64,
    mape_sum:      f64,
    batches:       usize,
}

impl PhaseTotals {
    fn add(&mut self, loss: f64, mask_sum: f64, mape: f64) {
        self.weighted_loss += loss * mask_sum;
        self.real_elements += mask_sum;
        self.mape_sum      += mape;
        self.batches       += 1;
    }

    fn loss(&self) -> f64 {
        if self.real_elements > 0.0 { self.weighted_loss / self.real_elements } else { f64::NAN }
    }

    fn mape(&self) -> f64 {
        if self.batches > 0 { self.mape_sum / self.batches as f64 } else { f64::NAN }
    }
}

/// Train one surrogate on `devices` (device 0 holds the data and
/// the loss) and return the final model.
///
/// Every epoch prints a summary line and appends a row to the
/// metrics CSV. Weights are saved after epochs 1, 1 + freq,
/// 1 + 2·freq and so on. Batches whose mask is all zero are skipped.
pub fn run_surrogate_training<B: AutodiffBackend>(
    cfg:           &SurrogateTrainConfig,
    surrogate_cfg: &SurrogateConfig,
    train_dataset: FixedLengthDataset,
    val_dataset:   Option<FixedLengthDataset>,
    devices:       &[B::Device],
    ckpt:          &CheckpointManager,
    metrics:       &MetricsLogger,
) -> Result<SurrogateNetwork<B>> {
    let Some(device) = devices.first().cloned() else {
        anyhow::bail!("surrogate training needs at least one device");
    };

    // ── Build model ───────────────────────────────────────────────────────────
    let mut model: SurrogateNetwork<B> = surrogate_cfg.init(devices);
    tracing::info!(
        "Surrogate '{}' ready: widths {:?}, {} stage(s) over {} device(s)",
        surrogate_cfg.kind,
        surrogate_cfg.widths(),
        model.num_stages(),
        devices.len(),
    );

    // ── Adam optimiser ────────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g        (mean)
    // v = β2*v + (1-β2)*g²       (variance)
    // θ = θ - lr * m / (√v + ε)  (update)
    let mut optim = AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.98)
        .with_epsilon(1e-9)
        .init();

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let max_len = surrogate_cfg.sentence_length;
    let train_loader = DataLoaderBuilder::new(SurrogateBatcher::<B>::new(device.clone(), max_len))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(train_dataset);

    // ── Validation data loader (InnerBackend, no autodiff) ───────────────────
    let val_loader = val_dataset.map(|dataset| {
        DataLoaderBuilder::new(SurrogateBatcher::<B::InnerBackend>::new(device.clone(), max_len))
            .batch_size(cfg.batch_size)
            .num_workers(1)
            .build(dataset)
    });

    let mse      = MseLoss::new();
    let log_freq = cfg.console_log_freq.max(1);

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.num_epochs {
        let start = std::time::Instant::now();

        // ── Training phase ────────────────────────────────────────────────────
        let mut train = PhaseTotals::default();

        for (batch_idx, batch) in train_loader.iter().enumerate() {
            let (mask_sum, normalizer) = mask_statistics(&batch.masks);
            if mask_sum == 0.0 {
                tracing::warn!("epoch {} batch {} has no real tokens, skipping", epoch, batch_idx);
                continue;
            }

            let pred = model.forward(batch.inputs, batch.masks);
            let loss = mse
                .forward(pred.clone(), batch.targets.clone(), Reduction::Mean)
                .div_scalar(normalizer);

            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            let batch_mape    = mape(pred.detach(), batch.targets);
            train.add(loss_val, mask_sum, batch_mape);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(LEARNING_RATE, model, grads);

            if batch_idx % log_freq == 0 {
                tracing::info!(
                    "epoch {} batch {} | loss={:.6} | mape={:.4}",
                    epoch, batch_idx + 1, loss_val, batch_mape,
                );
            }
        }

        // ── Validation phase ──────────────────────────────────────────────────
        let mut val = PhaseTotals::default();
        if let Some(loader) = &val_loader {
            let model_valid = model.valid();
            for batch in loader.iter() {
                let (mask_sum, normalizer) = mask_statistics(&batch.masks);
                if mask_sum == 0.0 {
                    continue;
                }
                let pred = model_valid.forward(batch.inputs, batch.masks);
                let loss: f64 = mse
                    .forward(pred.clone(), batch.targets.clone(), Reduction::Mean)
                    .div_scalar(normalizer)
                    .into_scalar()
                    .elem::<f64>();
                val.add(loss, mask_sum, mape(pred, batch.targets));
            }
        }

        println!(
            "Epoch {:>3}/{} | loss per element={:.6} | mape={:.4} | val_loss={:.6} | val_mape={:.4} | {:.1}s",
            epoch, cfg.num_epochs, train.loss(), train.mape(), val.loss(), val.mape(),
            start.elapsed().as_secs_f64(),
        );
        metrics.log(&EpochMetrics::new(epoch, train.loss(), val.loss()).with_mape(train.mape(), val.mape()))?;

        if (epoch - 1) % cfg.checkpoint_freq.max(1) == 0 {
            let stem = CheckpointManager::surrogate_stem(epoch, cfg.layer);
            ckpt.save_module(&model, &stem)?;
            tracing::info!("Checkpoint '{}' saved", stem);
        }
    }

    tracing::info!("Surrogate training complete!");
    Ok(model)
}
