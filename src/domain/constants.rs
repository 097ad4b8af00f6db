// ============================================================
// Layer 3 — Constants
// ============================================================

/// Longest sentence (in tokens) kept in the corpus and the fixed
/// length every surrogate batch is padded to.
pub const MAX_LEN: usize = 100;

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";
pub const BOS_TOKEN: &str = "<s>";
pub const EOS_TOKEN: &str = "</s>";

pub const BASELINE_MODEL_DIMENSION: usize = 128;
pub const BASELINE_MODEL_NUMBER_OF_HEADS: usize = 8;
pub const BASELINE_MODEL_NUMBER_OF_LAYERS: usize = 6;
pub const BASELINE_MODEL_DROPOUT_PROB: f64 = 0.1;
pub const BASELINE_MODEL_LABEL_SMOOTHING: f32 = 0.1;

pub const NUM_WARMUP_STEPS: usize = 4000;

/// Floor for the MAPE denominator so near-zero targets do not divide by zero
pub const MAPE_EPSILON: f32 = 1e-32;

/// Surrogate checkpoints are written every this many epochs
pub const SURROGATE_CHECKPOINT_FREQ: usize = 20;

pub const DATA_DIR_PATH: &str = "data";
pub const LAYER_OUTPUT_PATH: &str = "layer_outputs";
pub const CHECKPOINTS_PATH: &str = "checkpoints";
