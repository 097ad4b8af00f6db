// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the four subcommands and all their flags:
//
//   train            translation transformer
//   extract          per-layer encoder activations
//   train-surrogate  one surrogate against one encoder layer
//   prepare          build a dataset cache ahead of training
//
// Enum-valued flags (dataset, direction, target, surrogate, mode)
// parse through each type's FromStr, so bad values are reported
// by clap before any use case runs.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::{
    extract_use_case::ExtractConfig,
    prepare_use_case::{DatasetVariant, PrepareConfig},
    surrogate_use_case::SurrogateTrainConfig,
    translate_use_case::TranslationConfig,
};
use crate::data::loader::{DatasetType, LanguageDirection};
use crate::domain::{
    activation::{ExtractionTarget, LengthMode},
    constants::{
        BASELINE_MODEL_DIMENSION, BASELINE_MODEL_DROPOUT_PROB, BASELINE_MODEL_LABEL_SMOOTHING,
        BASELINE_MODEL_NUMBER_OF_HEADS, BASELINE_MODEL_NUMBER_OF_LAYERS, CHECKPOINTS_PATH,
        DATA_DIR_PATH, LAYER_OUTPUT_PATH, MAX_LEN, NUM_WARMUP_STEPS, SURROGATE_CHECKPOINT_FREQ,
    },
};
use crate::ml::surrogate::SurrogateKind;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the translation transformer
    Train(TrainArgs),

    /// Capture every encoder layer's activations for all splits
    Extract(ExtractArgs),

    /// Train a surrogate network for one encoder layer
    TrainSurrogate(SurrogateArgs),

    /// Build (or load) a reconstructed dataset and report its size
    Prepare(PrepareArgs),
}

// ─── train ────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// IWSLT or WMT14
    #[arg(long, default_value = "IWSLT")]
    pub dataset_name: DatasetType,

    /// E2G or G2E
    #[arg(long, default_value = "E2G")]
    pub language_direction: LanguageDirection,

    /// Root holding {dataset}/{split}.{lang} files
    #[arg(long, default_value = DATA_DIR_PATH)]
    pub dataset_path: String,

    /// Where vocabularies, configs and weights are written
    #[arg(long, default_value = CHECKPOINTS_PATH)]
    pub checkpoint_dir: String,

    /// Target number of tokens in a src/trg batch
    #[arg(long, default_value_t = 1500)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 20)]
    pub num_of_epochs: usize,

    #[arg(long, default_value_t = NUM_WARMUP_STEPS)]
    pub num_warmup_steps: usize,

    /// Log to console every this many batches
    #[arg(long, default_value_t = 10)]
    pub console_log_freq: usize,

    #[arg(long, default_value_t = BASELINE_MODEL_DIMENSION)]
    pub d_model: usize,

    /// d_model must be divisible by num_heads
    #[arg(long, default_value_t = BASELINE_MODEL_NUMBER_OF_HEADS)]
    pub num_heads: usize,

    #[arg(long, default_value_t = BASELINE_MODEL_NUMBER_OF_LAYERS)]
    pub num_layers: usize,

    #[arg(long, default_value_t = BASELINE_MODEL_DROPOUT_PROB)]
    pub dropout: f64,

    #[arg(long, default_value_t = BASELINE_MODEL_LABEL_SMOOTHING)]
    pub label_smoothing: f32,

    /// Largest vocabulary per language, special tokens included
    #[arg(long, default_value_t = 50_000)]
    pub vocab_size: usize,

    /// Words seen fewer times than this map to <unk>
    #[arg(long, default_value_t = 2)]
    pub min_freq: usize,

    /// Run on the NdArray CPU backend instead of WGPU
    #[arg(long)]
    pub cpu: bool,
}

impl From<TrainArgs> for TranslationConfig {
    fn from(a: TrainArgs) -> Self {
        TranslationConfig {
            dataset_name:       a.dataset_name,
            language_direction: a.language_direction,
            dataset_path:       a.dataset_path,
            checkpoint_dir:     a.checkpoint_dir,
            batch_size:         a.batch_size,
            num_epochs:         a.num_of_epochs,
            num_warmup_steps:   a.num_warmup_steps,
            console_log_freq:   a.console_log_freq,
            d_model:            a.d_model,
            num_heads:          a.num_heads,
            num_layers:         a.num_layers,
            dropout:            a.dropout,
            label_smoothing:    a.label_smoothing,
            vocab_size:         a.vocab_size,
            min_freq:           a.min_freq,
            cpu:                a.cpu,
        }
    }
}

// ─── extract ──────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Target number of tokens in a src batch
    #[arg(long, default_value_t = 1500)]
    pub batch_size: usize,

    #[arg(long, default_value = "IWSLT")]
    pub dataset_name: DatasetType,

    #[arg(long, default_value = "E2G")]
    pub language_direction: LanguageDirection,

    #[arg(long, default_value = DATA_DIR_PATH)]
    pub dataset_path: String,

    #[arg(long, default_value_t = 10)]
    pub console_log_freq: usize,

    /// First part of every output file name
    #[arg(long)]
    pub model_name: String,

    /// Checkpoint directory written by `train`
    #[arg(long)]
    pub path_to_weights: String,

    #[arg(long, default_value = LAYER_OUTPUT_PATH)]
    pub output_dir: String,

    /// whole (layer input/output) or mha (attention input/per-head context)
    #[arg(long, default_value = "whole")]
    pub target: ExtractionTarget,

    #[arg(long)]
    pub cpu: bool,
}

impl From<ExtractArgs> for ExtractConfig {
    fn from(a: ExtractArgs) -> Self {
        ExtractConfig {
            batch_size:         a.batch_size,
            dataset_name:       a.dataset_name,
            language_direction: a.language_direction,
            dataset_path:       a.dataset_path,
            console_log_freq:   a.console_log_freq,
            model_name:         a.model_name,
            path_to_weights:    a.path_to_weights,
            output_dir:         a.output_dir,
            target:             a.target,
            cpu:                a.cpu,
        }
    }
}

// ─── train-surrogate ──────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct SurrogateArgs {
    #[arg(long, default_value_t = 150)]
    pub num_of_epochs: usize,

    /// Directory holding the extracted activation files
    #[arg(long, default_value = LAYER_OUTPUT_PATH)]
    pub dataset_path: String,

    /// Embedding size of the captured activations
    #[arg(long, default_value_t = BASELINE_MODEL_DIMENSION)]
    pub model_dimension: usize,

    /// Read only this many batches per split (skips the cache)
    #[arg(long)]
    pub num_of_loaded_files: Option<usize>,

    /// Encoder layer to imitate
    #[arg(long, default_value_t = 0)]
    pub num_of_curr_trained_layer: usize,

    /// Sentences per batch
    #[arg(long, default_value_t = 500)]
    pub batch_size: usize,

    /// Folder relative to --checkpoint-root
    #[arg(long)]
    pub checkpoints_folder_name: String,

    #[arg(long, default_value = CHECKPOINTS_PATH)]
    pub checkpoint_root: String,

    /// Save weights every this many epochs
    #[arg(long, default_value_t = SURROGATE_CHECKPOINT_FREQ)]
    pub checkpoint_freq: usize,

    #[arg(long, default_value_t = 10)]
    pub console_log_freq: usize,

    /// Model name used at extraction time
    #[arg(long)]
    pub model_name: String,

    #[arg(long, default_value = "IWSLT")]
    pub dataset_name: DatasetType,

    #[arg(long, default_value = "E2G")]
    pub language_direction: LanguageDirection,

    #[arg(long, default_value = "whole")]
    pub target: ExtractionTarget,

    /// shrink2, shrink8, shrink128, shrink256, small, tapered, medium, large or wide
    #[arg(long, default_value = "shrink2")]
    pub surrogate: SurrogateKind,

    /// Sentences are padded to this many tokens
    #[arg(long, default_value_t = MAX_LEN)]
    pub max_len: usize,

    /// max keeps sentences up to --max-len, exact only those of exactly --max-len
    #[arg(long, default_value = "max")]
    pub mode: LengthMode,

    /// Draw weights from U[0, 1) instead of the default initialiser
    #[arg(long)]
    pub uniform_init: bool,

    /// Train on a random 20% of the sentences
    #[arg(long)]
    pub dev: bool,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Devices available to sharded surrogates
    #[arg(long, default_value_t = 1)]
    pub num_devices: usize,

    #[arg(long)]
    pub cpu: bool,
}

impl From<SurrogateArgs> for SurrogateTrainConfig {
    fn from(a: SurrogateArgs) -> Self {
        SurrogateTrainConfig {
            num_epochs:              a.num_of_epochs,
            dataset_path:            a.dataset_path,
            model_dimension:         a.model_dimension,
            num_of_loaded_files:     a.num_of_loaded_files,
            layer:                   a.num_of_curr_trained_layer,
            batch_size:              a.batch_size,
            checkpoints_folder_name: a.checkpoints_folder_name,
            checkpoint_root:         a.checkpoint_root,
            checkpoint_freq:         a.checkpoint_freq,
            console_log_freq:        a.console_log_freq,
            model_name:              a.model_name,
            dataset_name:            a.dataset_name,
            language_direction:      a.language_direction,
            target:                  a.target,
            kind:                    a.surrogate,
            max_len:                 a.max_len,
            mode:                    a.mode,
            uniform_init:            a.uniform_init,
            dev:                     a.dev,
            seed:                    a.seed,
            num_devices:             a.num_devices,
            cpu:                     a.cpu,
        }
    }
}

// ─── prepare ──────────────────────────────────────────────────────────────────
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariantArg {
    Fixed,
    Single,
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    /// Layer inputs stream
    #[arg(long)]
    pub input: PathBuf,

    /// Layer outputs stream
    #[arg(long)]
    pub output: PathBuf,

    /// Source masks stream
    #[arg(long)]
    pub mask: PathBuf,

    #[arg(long, value_enum, default_value_t = VariantArg::Fixed)]
    pub variant: VariantArg,

    /// Length threshold for the fixed variant
    #[arg(long, default_value_t = MAX_LEN)]
    pub n: usize,

    /// "max" or "exact"; checked by the dataset itself
    #[arg(long, default_value = "max")]
    pub mode: String,
}

impl From<PrepareArgs> for PrepareConfig {
    fn from(a: PrepareArgs) -> Self {
        let variant = match a.variant {
            VariantArg::Fixed  => DatasetVariant::Fixed { n: a.n, mode: a.mode },
            VariantArg::Single => DatasetVariant::Single,
        };
        PrepareConfig {
            input_path:  a.input,
            output_path: a.output,
            mask_path:   a.mask,
            variant,
        }
    }
}
