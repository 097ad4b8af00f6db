// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal per subcommand.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No argument parsing here (that's Layer 1)
//   - File access goes through Layer 4 and Layer 6
//   - Only workflow coordination
//
//   train            → TranslateUseCase
//   extract          → ExtractUseCase
//   train-surrogate  → SurrogateUseCase
//   prepare          → PrepareUseCase
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// Translation model training workflow
pub mod translate_use_case;

/// Encoder activation extraction workflow
pub mod extract_use_case;

/// Surrogate training workflow for one encoder layer
pub mod surrogate_use_case;

/// Dataset cache warm-up workflow
pub mod prepare_use_case;
