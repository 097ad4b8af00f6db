// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Two pipelines live here.
//
// Translation (text → token batches):
//
//   {split}.en / {split}.de
//       │
//       ▼
//   ParallelCorpusLoader → reads aligned lines
//       │
//       ▼
//   Preprocessor         → cleans each line
//       │
//       ▼
//   encode_pairs         → token ids, <s> ... </s> on targets
//       │
//       ▼
//   TokenBudgetBatcher   → length-sorted groups under a token budget
//       │
//       ▼
//   collate_pairs        → TranslationBatch tensors and masks
//
// Surrogate (activation records → flat vectors):
//
//   {prefix}_layer{i}_inputs/outputs_{split}, {prefix}_masks_{split}
//       │
//       ▼
//   FixedLengthDataset   → per-sentence samples (or SingleWordDataset)
//       │
//       ▼
//   split_by_fraction    → optional random dev subset
//       │
//       ▼
//   SurrogateBatcher     → padded, mask-weighted [N, max_len · D]
//       │
//       ▼
//   DataLoader           → feeds batches to the surrogate trainer

/// Reads aligned parallel corpus files
pub mod loader;

/// Cleans individual corpus lines
pub mod preprocessor;

/// Groups token pairs by budget and builds translation tensors
pub mod token_batcher;

/// Rebuilds per-sentence samples from activation records
pub mod dataset;

/// Per-word samples with sentence context
pub mod word_dataset;

/// Implements Burn's Batcher trait for surrogate training
pub mod batcher;

/// Random subset selection
pub mod splitter;
