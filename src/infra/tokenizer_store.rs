// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Builds, saves and loads the word-level vocabularies of the
// source and target languages.
//
// A vocabulary is written as a HuggingFace tokenizer JSON with a
// WordLevel model and a Whitespace pre-tokenizer, then loaded back
// through Tokenizer::from_file so encoding at train time and at
// extraction time goes through exactly the same code.
//
// Fixed ids:
//   <pad> = 0, <unk> = 1, <s> = 2, </s> = 3, words from 4 upward
//
// Files: {dir}/src_tokenizer.json, {dir}/trg_tokenizer.json

use anyhow::{Context, Result};
use std::{collections::HashMap, path::PathBuf};
use tokenizers::{
    pre_tokenizers::whitespace::Whitespace, OffsetReferential, OffsetType, PreTokenizedString,
    PreTokenizer, Tokenizer,
};

use crate::domain::constants::{BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, UNK_TOKEN};

const SPECIALS: [&str; 4] = [PAD_TOKEN, UNK_TOKEN, BOS_TOKEN, EOS_TOKEN];

/// Which side of the translation pair a vocabulary belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl Side {
    fn file_name(&self) -> &'static str {
        match self {
            Side::Source => "src_tokenizer.json",
            Side::Target => "trg_tokenizer.json",
        }
    }
}

// ─── Vocabulary ───────────────────────────────────────────────────────────────
/// A loaded tokenizer plus the ids of its special tokens.
pub struct Vocabulary {
    tokenizer: Tokenizer,
    pad_id:    u32,
    bos_id:    u32,
    eos_id:    u32,
}

impl Vocabulary {
    fn from_tokenizer(tokenizer: Tokenizer) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .with_context(|| format!("Tokenizer has no '{token}' entry"))
        };
        let pad_id = id(PAD_TOKEN)?;
        let bos_id = id(BOS_TOKEN)?;
        let eos_id = id(EOS_TOKEN)?;
        Ok(Self { tokenizer, pad_id, bos_id, eos_id })
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn bos_id(&self) -> u32 {
        self.bos_id
    }

    pub fn eos_id(&self) -> u32 {
        self.eos_id
    }
}

// ─── TokenizerStore ───────────────────────────────────────────────────────────
pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load an existing vocabulary or build one from `texts`
    pub fn load_or_build(
        &self,
        side:       Side,
        texts:      &[String],
        vocab_size: usize,
        min_freq:   usize,
    ) -> Result<Vocabulary> {
        if self.dir.join(side.file_name()).exists() {
            tracing::info!("Loading existing {:?} vocabulary from disk", side);
            self.load(side)
        } else {
            tracing::info!("Building new {:?} vocabulary (max {} entries)", side, vocab_size);
            self.build_and_save(side, texts, vocab_size, min_freq)
        }
    }

    /// Load a previously saved vocabulary
    pub fn load(&self, side: Side) -> Result<Vocabulary> {
        let path = self.dir.join(side.file_name());
        let tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))?;
        Vocabulary::from_tokenizer(tokenizer)
    }

    fn build_and_save(
        &self,
        side:       Side,
        texts:      &[String],
        vocab_size: usize,
        min_freq:   usize,
    ) -> Result<Vocabulary> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        // ── Step 1: Count pre-tokenised words ─────────────────────────────────
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for word in pre_tokenize(text)? {
                *freq.entry(word).or_insert(0) += 1;
            }
        }

        // Most frequent first, ties broken alphabetically so builds are reproducible
        let mut words: Vec<(String, usize)> = freq
            .into_iter()
            .filter(|(w, n)| *n >= min_freq && !SPECIALS.contains(&w.as_str()))
            .collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(vocab_size.saturating_sub(SPECIALS.len()));

        // ── Step 2: Assign ids ────────────────────────────────────────────────
        let mut vocab = serde_json::Map::new();
        for (id, token) in SPECIALS.iter().enumerate() {
            vocab.insert(token.to_string(), serde_json::json!(id));
        }
        for (offset, (word, _)) in words.iter().enumerate() {
            vocab.insert(word.clone(), serde_json::json!(SPECIALS.len() + offset));
        }

        // ── Step 3: Write tokenizer JSON in HuggingFace format ────────────────
        let added_tokens: Vec<serde_json::Value> = SPECIALS
            .iter()
            .enumerate()
            .map(|(id, token)| serde_json::json!({
                "id": id, "content": token, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            }))
            .collect();

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": UNK_TOKEN
            }
        });

        let tok_path = self.dir.join(side.file_name());
        std::fs::write(&tok_path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write '{}'", tok_path.display()))?;

        tracing::info!(
            "{:?} vocabulary built with {} entries, saved to '{}'",
            side,
            SPECIALS.len() + words.len(),
            tok_path.display()
        );

        self.load(side)
    }
}

/// Split text with the same Whitespace pre-tokenizer the saved
/// tokenizer runs at encode time, so every counted word is a word
/// the vocabulary can later look up.
fn pre_tokenize(text: &str) -> Result<Vec<String>> {
    let mut pretokenized = PreTokenizedString::from(text);
    Whitespace::default()
        .pre_tokenize(&mut pretokenized)
        .map_err(|e| anyhow::anyhow!("Pre-tokenisation error: {e}"))?;
    Ok(pretokenized
        .get_splits(OffsetReferential::Original, OffsetType::Byte)
        .into_iter()
        .map(|(word, _, _)| word.to_owned())
        .collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pre_tokenize_splits_punctuation() {
        assert_eq!(pre_tokenize("Hello, world!").unwrap(), vec!["Hello", ",", "world", "!"]);
        assert_eq!(pre_tokenize("  a  b ").unwrap(), vec!["a", "b"]);
        assert!(pre_tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_combining_marks_stay_inside_the_word() {
        assert_eq!(pre_tokenize("u\u{0308}ber alles").unwrap(), vec!["u\u{0308}ber", "alles"]);
    }

    #[test]
    fn test_every_training_word_is_in_the_vocabulary() {
        let dir   = TempDir::new().unwrap();
        let store = TokenizerStore::new(dir.path());
        let texts = vec![
            "u\u{0308}ber alles".to_string(),
            "Stra\u{00DF}e, na\u{0303}o \u{00E9}t\u{00E9}!".to_string(),
            "don't stop_here 3.14".to_string(),
        ];

        let vocab = store.load_or_build(Side::Source, &texts, 100, 1).unwrap();
        for text in &texts {
            let ids = vocab.encode(text).unwrap();
            assert!(!ids.is_empty());
            assert!(ids.iter().all(|&id| id != 1), "'{text}' encoded to {ids:?}");
        }
    }

    #[test]
    fn test_built_vocabulary_encodes_and_maps_unknowns() {
        let dir   = TempDir::new().unwrap();
        let store = TokenizerStore::new(dir.path());
        let texts = vec!["the cat sat".to_string(), "the cat ran".to_string()];

        let vocab = store.load_or_build(Side::Source, &texts, 100, 1).unwrap();
        assert_eq!(vocab.pad_id(), 0);
        assert_eq!(vocab.bos_id(), 2);
        assert_eq!(vocab.eos_id(), 3);
        // 4 specials + the, cat, ran, sat
        assert_eq!(vocab.size(), 8);

        let ids = vocab.encode("the cat flew").unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], 1); // <unk>
        assert!(ids[0] >= 4 && ids[1] >= 4);

        // Reloading gives the same ids
        let again = store.load(Side::Source).unwrap();
        assert_eq!(again.encode("the cat flew").unwrap(), ids);
    }

    #[test]
    fn test_min_freq_drops_rare_words() {
        let dir   = TempDir::new().unwrap();
        let store = TokenizerStore::new(dir.path());
        let texts = vec!["a a b".to_string()];
        let vocab = store.load_or_build(Side::Target, &texts, 100, 2).unwrap();
        assert_eq!(vocab.size(), 5);
    }
}
