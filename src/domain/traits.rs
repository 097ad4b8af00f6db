// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer programs against these, so a corpus
// on disk and an in-memory corpus in tests look the same, and
// both reconstructed dataset kinds can be reported uniformly.

use anyhow::Result;

use crate::domain::activation::Split;

// ─── CorpusSource ─────────────────────────────────────────────────────────────
/// Anything that can hand out raw (source, target) sentence pairs
/// for a data split.
///
/// Implementations:
///   - ParallelCorpusLoader → `{root}/{dataset}/{split}.{lang}` text files
pub trait CorpusSource {
    fn load_split(&self, split: Split) -> Result<Vec<(String, String)>>;
}

// ─── EmbeddingWidth ───────────────────────────────────────────────────────────
/// A reconstructed dataset that knows the feature width of its inputs.
///
/// Implementations:
///   - FixedLengthDataset → D
///   - SingleWordDataset  → 2 * D
pub trait EmbeddingWidth {
    fn emb_size(&self) -> usize;
    fn sample_count(&self) -> usize;
}
