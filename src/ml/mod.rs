// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that builds, runs or trains a Burn module.
//
//   model.rs        encoder-decoder transformer with per-layer
//                   encoder hooks
//
//   translation.rs  translation training loop with the warmup
//                   learning-rate schedule
//
//   extractor.rs    runs the trained encoder over each split and
//                   appends every layer's activations to disk
//
//   surrogate.rs    the feed-forward surrogate family, optionally
//                   sharded over several devices
//
//   trainer.rs      masked MSE training of one surrogate against
//                   one encoder layer
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need

/// Encoder-decoder transformer and the EncoderHook trait
pub mod model;

/// Translation training loop
pub mod translation;

/// Streams encoder activations into record files
pub mod extractor;

/// Surrogate network family
pub mod surrogate;

/// Surrogate training loop with checkpointing
pub mod trainer;
