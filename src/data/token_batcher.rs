// ============================================================
// Layer 4 — Token-Budget Batcher
// ============================================================
// Groups tokenised sentence pairs into batches that hold roughly
// the same number of tokens, then turns each group into tensors.
//
// Planning:
//   1. Sort pair indices by length (longer side first, then the
//      other side, then index for stability)
//   2. Walk the sorted list, adding pairs while
//        (count + 1) × longest ≤ token_budget
//   3. A pair that alone exceeds the budget still gets a batch
//
// Collation (per batch):
//   src        [B, S]         padded with <pad>
//   src_mask   [B, 1, 1, S]   true = real token
//   trg_input  [B, T]         target without its last token
//   trg_output [B, T]         target without its first token
//   trg_mask   [B, 1, T, T]   real token ∧ not in the future
//
// Masks are built on the host so the same bytes can be written to
// the activation mask stream and uploaded to the device.

use burn::{prelude::*, tensor::TensorData};
use ndarray::{ArrayD, IxDyn, ShapeError};
use rand::seq::SliceRandom;

use crate::domain::sentence_pair::TokenPair;

// ─── Planning ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TokenBudgetBatcher {
    token_budget: usize,
}

impl TokenBudgetBatcher {
    pub fn new(token_budget: usize) -> Self {
        Self { token_budget: token_budget.max(1) }
    }

    /// Index groups in length order. Every pair appears exactly once.
    pub fn plan(&self, pairs: &[TokenPair]) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..pairs.len()).collect();
        order.sort_by_key(|&i| {
            let p = &pairs[i];
            (p.budget_len(), p.src.len().min(p.trg.len()), i)
        });

        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut longest = 0usize;

        for i in order {
            let len      = pairs[i].budget_len();
            let widened  = longest.max(len);
            let would_be = (current.len() + 1) * widened;
            if !current.is_empty() && would_be > self.token_budget {
                batches.push(std::mem::take(&mut current));
                longest = 0;
            }
            longest = longest.max(len);
            current.push(i);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// Same groups as `plan`, visited in random order.
    pub fn plan_shuffled(&self, pairs: &[TokenPair]) -> Vec<Vec<usize>> {
        let mut batches = self.plan(pairs);
        batches.shuffle(&mut rand::thread_rng());
        batches
    }
}

// ─── Host-side source batch ───────────────────────────────────────────────────
/// Padded source ids and their validity mask, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    pub ids:     Vec<i32>,
    pub valid:   Vec<bool>,
    pub batch:   usize,
    pub seq_len: usize,
}

impl SourceBatch {
    pub fn from_rows(rows: &[&[u32]], pad_id: u32) -> Self {
        let batch   = rows.len();
        let seq_len = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut ids   = vec![pad_id as i32; batch * seq_len];
        let mut valid = vec![false; batch * seq_len];

        for (b, row) in rows.iter().enumerate() {
            for (s, &tok) in row.iter().enumerate() {
                ids[b * seq_len + s]   = tok as i32;
                valid[b * seq_len + s] = tok != pad_id;
            }
        }
        Self { ids, valid, batch, seq_len }
    }

    /// Real tokens in the batch
    pub fn num_tokens(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// `[B, 1, 1, S]` for the activation mask stream
    pub fn mask_array(&self) -> Result<ArrayD<bool>, ShapeError> {
        ArrayD::from_shape_vec(IxDyn(&[self.batch, 1, 1, self.seq_len]), self.valid.clone())
    }

    pub fn ids_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2, Int> {
        Tensor::<B, 1, Int>::from_ints(self.ids.as_slice(), device)
            .reshape([self.batch, self.seq_len])
    }

    pub fn mask_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4, Bool> {
        Tensor::<B, 4, Bool>::from_data(
            TensorData::new(self.valid.clone(), [self.batch, 1, 1, self.seq_len]),
            device,
        )
    }
}

// ─── TranslationBatch ─────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TranslationBatch<B: Backend> {
    pub src:        Tensor<B, 2, Int>,
    pub src_mask:   Tensor<B, 4, Bool>,
    pub trg_input:  Tensor<B, 2, Int>,
    pub trg_output: Tensor<B, 2, Int>,
    pub trg_mask:   Tensor<B, 4, Bool>,
    /// Real target tokens predicted in this batch
    pub num_trg_tokens: usize,
}

/// Build a TranslationBatch from the pairs at `indices`.
pub fn collate_pairs<B: Backend>(
    pairs:   &[TokenPair],
    indices: &[usize],
    pad_id:  u32,
    device:  &B::Device,
) -> TranslationBatch<B> {
    let src_rows: Vec<&[u32]> = indices.iter().map(|&i| pairs[i].src.as_slice()).collect();
    let inputs:   Vec<&[u32]> = indices.iter().map(|&i| shifted_input(&pairs[i].trg)).collect();
    let outputs:  Vec<&[u32]> = indices.iter().map(|&i| shifted_output(&pairs[i].trg)).collect();

    let source     = SourceBatch::from_rows(&src_rows, pad_id);
    let trg_input  = SourceBatch::from_rows(&inputs, pad_id);
    let trg_output = SourceBatch::from_rows(&outputs, pad_id);

    let t = trg_input.seq_len;
    let trg_mask = causal_mask(&trg_input.valid, trg_input.batch, t);

    TranslationBatch {
        src:            source.ids_tensor(device),
        src_mask:       source.mask_tensor(device),
        trg_input:      trg_input.ids_tensor(device),
        trg_output:     trg_output.ids_tensor(device),
        trg_mask:       Tensor::<B, 4, Bool>::from_data(
            TensorData::new(trg_mask, [trg_input.batch, 1, t, t]),
            device,
        ),
        num_trg_tokens: trg_output.num_tokens(),
    }
}

fn shifted_input(trg: &[u32]) -> &[u32] {
    &trg[..trg.len().saturating_sub(1)]
}

fn shifted_output(trg: &[u32]) -> &[u32] {
    if trg.is_empty() { trg } else { &trg[1..] }
}

/// Row-major `[B, T, T]`: query `i` may attend key `j` when `j ≤ i`
/// and key `j` is a real token.
fn causal_mask(valid: &[bool], batch: usize, t: usize) -> Vec<bool> {
    let mut mask = vec![false; batch * t * t];
    for b in 0..batch {
        for i in 0..t {
            for j in 0..=i {
                mask[(b * t + i) * t + j] = valid[b * t + j];
            }
        }
    }
    mask
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn pair(src_len: usize, trg_len: usize) -> TokenPair {
        TokenPair::new(vec![7; src_len], vec![9; trg_len])
    }

    #[test]
    fn test_plan_covers_every_pair_once() {
        let pairs: Vec<TokenPair> = (1..=20).map(|n| pair(n, n % 7 + 2)).collect();
        let plan  = TokenBudgetBatcher::new(30).plan(&pairs);

        let mut seen: Vec<usize> = plan.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_plan_respects_budget() {
        let pairs: Vec<TokenPair> = (1..=20).map(|n| pair(n, 3)).collect();
        let plan  = TokenBudgetBatcher::new(24).plan(&pairs);
        for group in &plan {
            let longest = group.iter().map(|&i| pairs[i].budget_len()).max().unwrap();
            assert!(group.len() == 1 || group.len() * longest <= 24);
        }
    }

    #[test]
    fn test_oversized_pair_gets_own_batch() {
        let pairs = vec![pair(2, 2), pair(50, 50)];
        let plan  = TokenBudgetBatcher::new(10).plan(&pairs);
        assert_eq!(plan, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_source_batch_pads_and_masks() {
        let a = [5u32, 6, 7];
        let b = [8u32];
        let batch = SourceBatch::from_rows(&[&a, &b], 0);
        assert_eq!(batch.seq_len, 3);
        assert_eq!(batch.ids, vec![5, 6, 7, 8, 0, 0]);
        assert_eq!(batch.valid, vec![true, true, true, true, false, false]);
        assert_eq!(batch.num_tokens(), 4);
        assert_eq!(batch.mask_array().unwrap().shape(), &[2, 1, 1, 3]);
    }

    #[test]
    fn test_causal_mask_hides_future_and_padding() {
        // one row, T = 3, last position is padding
        let mask = causal_mask(&[true, true, false], 1, 3);
        assert_eq!(
            mask,
            vec![
                true, false, false,
                true, true,  false,
                true, true,  false,
            ]
        );
    }

    #[test]
    fn test_collate_shifts_target() {
        let device = Default::default();
        let pairs  = vec![TokenPair::new(vec![4, 5], vec![2, 10, 11, 3])];
        let batch: TranslationBatch<TestBackend> = collate_pairs(&pairs, &[0], 0, &device);

        assert_eq!(batch.src.dims(), [1, 2]);
        assert_eq!(batch.src_mask.dims(), [1, 1, 1, 2]);
        assert_eq!(batch.trg_input.dims(), [1, 3]);
        assert_eq!(batch.trg_mask.dims(), [1, 1, 3, 3]);
        assert_eq!(batch.num_trg_tokens, 3);

        let input: Vec<i64>  = batch.trg_input.into_data().convert::<i64>().to_vec().unwrap();
        let output: Vec<i64> = batch.trg_output.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(input,  vec![2, 10, 11]);
        assert_eq!(output, vec![10, 11, 3]);
    }
}
