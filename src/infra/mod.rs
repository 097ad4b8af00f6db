// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the filesystem on behalf of the
// other layers:
//
//   record_stream.rs   append-only activation streams
//                      (length-prefixed safetensors records)
//
//   sample_cache.rs    snapshots of reconstructed datasets
//                      stored next to their source streams
//
//   checkpoint.rs      module weights via Burn's CompactRecorder
//                      plus JSON side files (configs, latest epoch)
//
//   tokenizer_store.rs word-level source/target vocabularies
//
//   metrics.rs         per-epoch metrics CSV

/// Append-only activation record streams
pub mod record_stream;

/// Reconstructed dataset caches
pub mod sample_cache;

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Vocabulary building, saving, and loading
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;
