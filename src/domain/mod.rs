// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits that name the concepts of
// the activation pipeline:
//
//   - data splits, length-filter modes, extraction targets
//   - on-disk naming of activation streams
//   - per-sentence and per-word samples (host-side ndarray data)
//   - the error vocabulary shared by the codec and the datasets
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

/// Fixed values shared across the pipeline
pub mod constants;

/// Splits, modes, file naming, and reconstructed samples
pub mod activation;

/// Tokenised source/target sentence pairs
pub mod sentence_pair;

/// Typed error kinds for record streams and datasets
pub mod error;

/// Core abstractions (traits) that other layers implement
pub mod traits;
