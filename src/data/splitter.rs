// ============================================================
// Layer 4 — Random Subset Splitter
// ============================================================
// Shuffles samples and cuts them into two parts. Used by the
// surrogate trainer's --dev flag, which trains on a random 20%
// of the reconstructed sentences to shorten iteration.
//
// Uses Fisher-Yates shuffle via rand::seq::SliceRandom.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Randomly shuffle `samples` and split into (head, tail) where
/// `head` holds `fraction` of the samples (rounded).
pub fn split_by_fraction<T>(mut samples: Vec<T>, fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let split_at = ((total as f64) * fraction.clamp(0.0, 1.0)).round() as usize;
    let split_at = split_at.min(total);

    let tail = samples.split_off(split_at);

    tracing::debug!(
        "Random split: {} / {} of {} samples",
        samples.len(),
        tail.len(),
        total,
    );

    (samples, tail)
}
