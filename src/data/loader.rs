// ============================================================
// Layer 4 — Parallel Corpus Loader
// ============================================================
// Reads English/German sentence pairs from plain-text files, one
// sentence per line, aligned by line number:
//
//   {dataset_path}/iwslt/train.en      {dataset_path}/iwslt/train.de
//   {dataset_path}/iwslt/val.en        {dataset_path}/iwslt/val.de
//   {dataset_path}/wmt14/test.en       ...
//
// The direction decides which file is the source:
//   E2G → source = .en, target = .de
//   G2E → source = .de, target = .en
//
// After loading, encode_pairs() turns raw text into TokenPairs:
//   - pairs with either side longer than MAX_LEN tokens are dropped
//   - targets are wrapped in <s> ... </s>, sources are not

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::{Path, PathBuf}, str::FromStr};

use crate::data::preprocessor::Preprocessor;
use crate::domain::activation::Split;
use crate::domain::sentence_pair::TokenPair;
use crate::domain::traits::CorpusSource;
use crate::infra::tokenizer_store::Vocabulary;

// ─── DatasetType ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetType {
    Iwslt,
    Wmt14,
}

impl DatasetType {
    /// Name used in CLI flags and activation file prefixes
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::Iwslt => "IWSLT",
            DatasetType::Wmt14 => "WMT14",
        }
    }

    fn dir_name(&self) -> &'static str {
        match self {
            DatasetType::Iwslt => "iwslt",
            DatasetType::Wmt14 => "wmt14",
        }
    }
}

impl FromStr for DatasetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IWSLT" => Ok(DatasetType::Iwslt),
            "WMT14" => Ok(DatasetType::Wmt14),
            _       => Err(format!("unknown dataset '{s}', expected IWSLT or WMT14")),
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── LanguageDirection ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LanguageDirection {
    E2G,
    G2E,
}

impl LanguageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageDirection::E2G => "E2G",
            LanguageDirection::G2E => "G2E",
        }
    }

    /// (source extension, target extension)
    pub fn languages(&self) -> (&'static str, &'static str) {
        match self {
            LanguageDirection::E2G => ("en", "de"),
            LanguageDirection::G2E => ("de", "en"),
        }
    }
}

impl FromStr for LanguageDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "E2G" => Ok(LanguageDirection::E2G),
            "G2E" => Ok(LanguageDirection::G2E),
            _     => Err(format!("unknown direction '{s}', expected E2G or G2E")),
        }
    }
}

impl fmt::Display for LanguageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ParallelCorpusLoader ─────────────────────────────────────────────────────
/// Implements the CorpusSource trait from Layer 3.
pub struct ParallelCorpusLoader {
    root:      PathBuf,
    dataset:   DatasetType,
    direction: LanguageDirection,
    cleaner:   Preprocessor,
}

impl ParallelCorpusLoader {
    pub fn new(root: impl Into<PathBuf>, dataset: DatasetType, direction: LanguageDirection) -> Self {
        Self {
            root: root.into(),
            dataset,
            direction,
            cleaner: Preprocessor::new(),
        }
    }

    fn split_path(&self, split: Split, lang: &str) -> PathBuf {
        self.root
            .join(self.dataset.dir_name())
            .join(format!("{}.{}", split.as_str(), lang))
    }
}

impl CorpusSource for ParallelCorpusLoader {
    fn load_split(&self, split: Split) -> Result<Vec<(String, String)>> {
        let (src_lang, trg_lang) = self.direction.languages();
        let src_lines = read_lines(&self.split_path(split, src_lang))?;
        let trg_lines = read_lines(&self.split_path(split, trg_lang))?;

        if src_lines.len() != trg_lines.len() {
            bail!(
                "{} {} split is misaligned: {} source lines vs {} target lines",
                self.dataset,
                split,
                src_lines.len(),
                trg_lines.len()
            );
        }

        let total = src_lines.len();
        let pairs: Vec<(String, String)> = src_lines
            .iter()
            .zip(trg_lines.iter())
            .map(|(s, t)| (self.cleaner.clean(s), self.cleaner.clean(t)))
            .filter(|(s, t)| !s.is_empty() && !t.is_empty())
            .collect();

        tracing::info!(
            "Loaded {} {} {} pairs ({} blank lines skipped)",
            pairs.len(),
            self.dataset,
            split,
            total - pairs.len()
        );
        Ok(pairs)
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read corpus file '{}'", path.display()))?;
    Ok(text.lines().map(str::to_string).collect())
}

// ─── Tokenisation ─────────────────────────────────────────────────────────────
/// Encode raw pairs, dropping any whose source or target exceeds
/// `max_len` tokens before the target gets its <s> ... </s>.
pub fn encode_pairs(
    raw:     &[(String, String)],
    src:     &Vocabulary,
    trg:     &Vocabulary,
    max_len: usize,
) -> Result<Vec<TokenPair>> {
    let mut pairs   = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;

    for (src_text, trg_text) in raw {
        let src_ids = src.encode(src_text)?;
        let trg_ids = trg.encode(trg_text)?;
        if src_ids.len() > max_len || trg_ids.len() > max_len {
            dropped += 1;
            continue;
        }
        pairs.push(TokenPair::new(src_ids, wrap_target(&trg_ids, trg.bos_id(), trg.eos_id())));
    }

    if dropped > 0 {
        tracing::debug!("Dropped {} pairs longer than {} tokens", dropped, max_len);
    }
    Ok(pairs)
}

fn wrap_target(ids: &[u32], bos: u32, eos: u32) -> Vec<u32> {
    let mut out = Vec::with_capacity(ids.len() + 2);
    out.push(bos);
    out.extend_from_slice(ids);
    out.push(eos);
    out
}
