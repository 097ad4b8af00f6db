// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// The commands follow the pipeline order:
//   1. `train`           train the translation transformer
//   2. `extract`         dump every encoder layer's activations
//   3. `prepare`         optionally warm a dataset cache
//   4. `train-surrogate` fit a surrogate to one layer
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ExtractArgs, PrepareArgs, SurrogateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "layer-surrogates",
    version,
    about = "Train a translation transformer, capture its encoder activations, and fit surrogate networks to single layers."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to its use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)          => run_train(args),
            Commands::Extract(args)        => run_extract(args),
            Commands::TrainSurrogate(args) => run_train_surrogate(args),
            Commands::Prepare(args)        => run_prepare(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::translate_use_case::TranslateUseCase;

    tracing::info!("Starting translation training on {} {}", args.dataset_name, args.language_direction);
    TranslateUseCase::new(args.into()).execute()?;

    println!("Training complete. Checkpoint saved.");
    Ok(())
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    use crate::application::extract_use_case::ExtractUseCase;

    let summaries = ExtractUseCase::new(args.into()).execute()?;
    for s in &summaries {
        println!("{:<5} {:>6} batches {:>8} sentences", s.split, s.batches, s.sentences);
    }
    Ok(())
}

fn run_train_surrogate(args: SurrogateArgs) -> Result<()> {
    use crate::application::surrogate_use_case::SurrogateUseCase;

    tracing::info!(
        "Training '{}' surrogate for encoder layer {}",
        args.surrogate,
        args.num_of_curr_trained_layer
    );
    SurrogateUseCase::new(args.into()).execute()?;

    println!("Surrogate training complete.");
    Ok(())
}

fn run_prepare(args: PrepareArgs) -> Result<()> {
    use crate::application::prepare_use_case::PrepareUseCase;

    let report = PrepareUseCase::new(args.into()).execute()?;
    println!("Samples: {}\nEmbedding size: {}", report.samples, report.emb_size);
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::surrogate_use_case::SurrogateTrainConfig;
    use crate::domain::activation::LengthMode;
    use crate::ml::surrogate::SurrogateKind;

    #[test]
    fn test_surrogate_flags_reach_the_config() {
        let cli = Cli::try_parse_from([
            "layer-surrogates", "train-surrogate",
            "--checkpoints-folder-name", "run1",
            "--model-name", "base",
            "--surrogate", "wide",
            "--mode", "exact",
            "--num-of-loaded-files", "3",
        ])
        .unwrap();

        let Commands::TrainSurrogate(args) = cli.command else {
            panic!("wrong subcommand");
        };
        let cfg: SurrogateTrainConfig = args.into();
        assert_eq!(cfg.kind, SurrogateKind::Wide);
        assert_eq!(cfg.mode, LengthMode::Exact);
        assert_eq!(cfg.num_of_loaded_files, Some(3));
        assert_eq!(cfg.checkpoint_freq, 20);
    }

    #[test]
    fn test_bad_values_are_rejected_by_the_parser() {
        let base = ["layer-surrogates", "train-surrogate", "--checkpoints-folder-name", "x", "--model-name", "m"];
        for (flag, value) in [("--mode", "longest"), ("--surrogate", "huge"), ("--dataset-name", "EUROPARL")] {
            let mut argv = base.to_vec();
            argv.extend([flag, value]);
            assert!(Cli::try_parse_from(argv).is_err(), "{flag} {value} accepted");
        }
    }

    #[test]
    fn test_extract_requires_model_name() {
        assert!(Cli::try_parse_from(["layer-surrogates", "extract", "--path-to-weights", "ckpt"]).is_err());
    }
}
