// ============================================================
// Layer 5 — Encoder-Decoder Transformer
// ============================================================
// The translation model whose encoder layers the surrogates learn
// to imitate.
//
//   src ids ─► embed · √d ─► + positions ─► EncoderLayer × N ─► norm ─► memory
//   trg ids ─► embed · √d ─► + positions ─► DecoderLayer × N ─► norm ─► generator
//
// Every sublayer is pre-norm:
//   x = x + dropout(sublayer(norm(x)))
//
// Attention is written out explicitly rather than using the
// built-in module so the per-head context [B, H, S, Dh] is
// available to encoder hooks before the heads are merged.
//
// Masks are boolean with true = may attend:
//   src_mask [B, 1, 1, S]   trg_mask [B, 1, T, T]

use anyhow::Result;
use burn::{
    nn::{
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
        PositionalEncoding, PositionalEncodingConfig,
    },
    prelude::*,
    tensor::activation,
};

use crate::data::token_batcher::TranslationBatch;

const MASKED_SCORE: f32 = -1.0e9;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct TransformerConfig {
    pub src_vocab_size: usize,
    pub trg_vocab_size: usize,
    pub d_model:        usize,
    pub num_heads:      usize,
    pub num_layers:     usize,
    pub dropout:        f64,
}

impl TransformerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Transformer<B> {
        let encoder_layers = (0..self.num_layers)
            .map(|_| EncoderLayer {
                self_attn:    self.attention(device),
                feed_forward: self.feed_forward(device),
                norm_attn:    LayerNormConfig::new(self.d_model).init(device),
                norm_ff:      LayerNormConfig::new(self.d_model).init(device),
                dropout:      DropoutConfig::new(self.dropout).init(),
            })
            .collect();
        let decoder_layers = (0..self.num_layers)
            .map(|_| DecoderLayer {
                self_attn:    self.attention(device),
                cross_attn:   self.attention(device),
                feed_forward: self.feed_forward(device),
                norm_self:    LayerNormConfig::new(self.d_model).init(device),
                norm_cross:   LayerNormConfig::new(self.d_model).init(device),
                norm_ff:      LayerNormConfig::new(self.d_model).init(device),
                dropout:      DropoutConfig::new(self.dropout).init(),
            })
            .collect();

        Transformer {
            src_embedding: EmbeddingConfig::new(self.src_vocab_size, self.d_model).init(device),
            trg_embedding: EmbeddingConfig::new(self.trg_vocab_size, self.d_model).init(device),
            positional:    PositionalEncodingConfig::new(self.d_model).init(device),
            encoder_layers,
            encoder_norm:  LayerNormConfig::new(self.d_model).init(device),
            decoder_layers,
            decoder_norm:  LayerNormConfig::new(self.d_model).init(device),
            generator:     LinearConfig::new(self.d_model, self.trg_vocab_size).init(device),
            dropout:       DropoutConfig::new(self.dropout).init(),
            d_model:       self.d_model,
        }
    }

    fn attention<B: Backend>(&self, device: &B::Device) -> MultiHeadAttention<B> {
        let head_dim = self.d_model / self.num_heads;
        MultiHeadAttention {
            query:     LinearConfig::new(self.d_model, self.d_model).init(device),
            key:       LinearConfig::new(self.d_model, self.d_model).init(device),
            value:     LinearConfig::new(self.d_model, self.d_model).init(device),
            output:    LinearConfig::new(self.d_model, self.d_model).init(device),
            dropout:   DropoutConfig::new(self.dropout).init(),
            num_heads: self.num_heads,
            head_dim,
        }
    }

    fn feed_forward<B: Backend>(&self, device: &B::Device) -> FeedForward<B> {
        FeedForward {
            linear1: LinearConfig::new(self.d_model, 4 * self.d_model).init(device),
            linear2: LinearConfig::new(4 * self.d_model, self.d_model).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

// ─── Multi-Head Attention ─────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct MultiHeadAttention<B: Backend> {
    pub query:     Linear<B>,
    pub key:       Linear<B>,
    pub value:     Linear<B>,
    pub output:    Linear<B>,
    pub dropout:   Dropout,
    pub num_heads: usize,
    pub head_dim:  usize,
}

pub struct AttentionOutput<B: Backend> {
    /// `[B, H, Tq, Dh]` before the heads are merged
    pub heads:   Tensor<B, 4>,
    /// `[B, Tq, D]` after the output projection
    pub context: Tensor<B, 3>,
}

impl<B: Backend> MultiHeadAttention<B> {
    pub fn forward(
        &self,
        query:     Tensor<B, 3>,
        key_value: Tensor<B, 3>,
        mask:      Tensor<B, 4, Bool>,
    ) -> AttentionOutput<B> {
        let [batch, tq, _] = query.dims();
        let [_, tk, _]     = key_value.dims();

        let q = self.split_heads(self.query.forward(query), batch, tq);
        let k = self.split_heads(self.key.forward(key_value.clone()), batch, tk);
        let v = self.split_heads(self.value.forward(key_value), batch, tk);

        // [B, H, Tq, Tk]
        let scores = q
            .matmul(k.swap_dims(2, 3))
            .div_scalar((self.head_dim as f64).sqrt());
        let mask   = self.expand_mask(mask, tq);
        let scores = scores.mask_fill(mask.bool_not(), MASKED_SCORE);
        let weights = self.dropout.forward(activation::softmax(scores, 3));

        let heads  = weights.matmul(v);
        let merged = heads
            .clone()
            .swap_dims(1, 2)
            .reshape([batch, tq, self.num_heads * self.head_dim]);

        AttentionOutput { heads, context: self.output.forward(merged) }
    }

    /// [B, T, D] → [B, H, T, Dh]
    fn split_heads(&self, x: Tensor<B, 3>, batch: usize, len: usize) -> Tensor<B, 4> {
        x.reshape([batch, len, self.num_heads, self.head_dim]).swap_dims(1, 2)
    }

    /// Repeat singleton head / query axes so the mask matches the scores
    fn expand_mask(&self, mask: Tensor<B, 4, Bool>, tq: usize) -> Tensor<B, 4, Bool> {
        let [_, heads, queries, _] = mask.dims();
        let mask = if heads == 1 && self.num_heads > 1 {
            mask.repeat_dim(1, self.num_heads)
        } else {
            mask
        };
        if queries == 1 && tq > 1 {
            mask.repeat_dim(2, tq)
        } else {
            mask
        }
    }
}

// ─── Feed-Forward ─────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub linear1: Linear<B>,
    pub linear2: Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = activation::relu(self.linear1.forward(x));
        self.linear2.forward(self.dropout.forward(hidden))
    }
}

// ─── Encoder Hooks ────────────────────────────────────────────────────────────
/// What an encoder layer saw and produced during one forward pass.
pub struct LayerActivations<B: Backend> {
    /// Layer input `[B, S, D]`
    pub input:           Tensor<B, 3>,
    /// Layer output `[B, S, D]`
    pub output:          Tensor<B, 3>,
    /// Normalised input fed to self-attention `[B, S, D]`
    pub attention_input: Tensor<B, 3>,
    /// Per-head self-attention context `[B, H, S, Dh]`
    pub heads:           Tensor<B, 4>,
}

/// Observer attached for the duration of one `encode_hooked` call.
/// Receives clones, so nothing it does can change the encoding.
pub trait EncoderHook<B: Backend> {
    fn on_layer(&mut self, layer: usize, activations: LayerActivations<B>) -> Result<()>;
}

// ─── Encoder / Decoder Layers ─────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    pub self_attn:    MultiHeadAttention<B>,
    pub feed_forward: FeedForward<B>,
    pub norm_attn:    LayerNorm<B>,
    pub norm_ff:      LayerNorm<B>,
    pub dropout:      Dropout,
}

impl<B: Backend> EncoderLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 4, Bool>) -> LayerActivations<B> {
        let normed = self.norm_attn.forward(x.clone());
        let attn   = self.self_attn.forward(normed.clone(), normed.clone(), mask);
        let hidden = x.clone() + self.dropout.forward(attn.context);

        let ff     = self.feed_forward.forward(self.norm_ff.forward(hidden.clone()));
        let output = hidden + self.dropout.forward(ff);

        LayerActivations {
            input: x,
            output,
            attention_input: normed,
            heads: attn.heads,
        }
    }
}

#[derive(Module, Debug)]
pub struct DecoderLayer<B: Backend> {
    pub self_attn:    MultiHeadAttention<B>,
    pub cross_attn:   MultiHeadAttention<B>,
    pub feed_forward: FeedForward<B>,
    pub norm_self:    LayerNorm<B>,
    pub norm_cross:   LayerNorm<B>,
    pub norm_ff:      LayerNorm<B>,
    pub dropout:      Dropout,
}

impl<B: Backend> DecoderLayer<B> {
    pub fn forward(
        &self,
        x:        Tensor<B, 3>,
        memory:   Tensor<B, 3>,
        src_mask: Tensor<B, 4, Bool>,
        trg_mask: Tensor<B, 4, Bool>,
    ) -> Tensor<B, 3> {
        let normed = self.norm_self.forward(x.clone());
        let x = x + self.dropout.forward(
            self.self_attn.forward(normed.clone(), normed, trg_mask).context,
        );

        let normed = self.norm_cross.forward(x.clone());
        let x = x + self.dropout.forward(
            self.cross_attn.forward(normed, memory, src_mask).context,
        );

        let ff = self.feed_forward.forward(self.norm_ff.forward(x.clone()));
        x + self.dropout.forward(ff)
    }
}

// ─── Transformer ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Transformer<B: Backend> {
    pub src_embedding:  Embedding<B>,
    pub trg_embedding:  Embedding<B>,
    pub positional:     PositionalEncoding<B>,
    pub encoder_layers: Vec<EncoderLayer<B>>,
    pub encoder_norm:   LayerNorm<B>,
    pub decoder_layers: Vec<DecoderLayer<B>>,
    pub decoder_norm:   LayerNorm<B>,
    pub generator:      Linear<B>,
    pub dropout:        Dropout,
    pub d_model:        usize,
}

impl<B: Backend> Transformer<B> {
    pub fn num_encoder_layers(&self) -> usize {
        self.encoder_layers.len()
    }

    fn embed(&self, embedding: &Embedding<B>, ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let scaled = embedding.forward(ids).mul_scalar((self.d_model as f64).sqrt());
        self.dropout.forward(self.positional.forward(scaled))
    }

    /// src `[B, S]` → memory `[B, S, D]`
    pub fn encode(&self, src: Tensor<B, 2, Int>, src_mask: Tensor<B, 4, Bool>) -> Tensor<B, 3> {
        let mut x = self.embed(&self.src_embedding, src);
        for layer in &self.encoder_layers {
            x = layer.forward(x, src_mask.clone()).output;
        }
        self.encoder_norm.forward(x)
    }

    /// Same as `encode`, reporting every layer to `hook`. A hook
    /// error stops the pass and is returned.
    pub fn encode_hooked(
        &self,
        src:      Tensor<B, 2, Int>,
        src_mask: Tensor<B, 4, Bool>,
        hook:     &mut dyn EncoderHook<B>,
    ) -> Result<Tensor<B, 3>> {
        let mut x = self.embed(&self.src_embedding, src);
        for (index, layer) in self.encoder_layers.iter().enumerate() {
            let activations = layer.forward(x, src_mask.clone());
            x = activations.output.clone();
            hook.on_layer(index, activations)?;
        }
        Ok(self.encoder_norm.forward(x))
    }

    /// trg_input `[B, T]` → logits `[B, T, V]`
    pub fn decode(
        &self,
        trg_input: Tensor<B, 2, Int>,
        memory:    Tensor<B, 3>,
        src_mask:  Tensor<B, 4, Bool>,
        trg_mask:  Tensor<B, 4, Bool>,
    ) -> Tensor<B, 3> {
        let mut x = self.embed(&self.trg_embedding, trg_input);
        for layer in &self.decoder_layers {
            x = layer.forward(x, memory.clone(), src_mask.clone(), trg_mask.clone());
        }
        self.generator.forward(self.decoder_norm.forward(x))
    }

    pub fn forward(&self, batch: &TranslationBatch<B>) -> Tensor<B, 3> {
        let memory = self.encode(batch.src.clone(), batch.src_mask.clone());
        self.decode(
            batch.trg_input.clone(),
            memory,
            batch.src_mask.clone(),
            batch.trg_mask.clone(),
        )
    }

    /// Label-smoothed cross-entropy over every non-pad target token.
    pub fn forward_loss(&self, batch: &TranslationBatch<B>, pad_id: u32, smoothing: f32) -> Tensor<B, 1> {
        let logits = self.forward(batch);
        let [b, t, vocab] = logits.dims();

        let mut ce = CrossEntropyLossConfig::new().with_pad_tokens(Some(vec![pad_id as usize]));
        if smoothing > 0.0 {
            ce = ce.with_smoothing(Some(smoothing));
        }
        ce.init(&logits.device()).forward(
            logits.reshape([b * t, vocab]),
            batch.trg_output.clone().reshape([b * t]),
        )
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::token_batcher::{collate_pairs, SourceBatch};
    use crate::domain::sentence_pair::TokenPair;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn tiny() -> TransformerConfig {
        TransformerConfig::new(20, 22, 8, 2, 2, 0.0)
    }

    fn source(device: &<TestBackend as Backend>::Device) -> (Tensor<TestBackend, 2, Int>, Tensor<TestBackend, 4, Bool>) {
        let a = [4u32, 5, 6];
        let b = [7u32, 8];
        let batch = SourceBatch::from_rows(&[&a, &b], 0);
        (batch.ids_tensor(device), batch.mask_tensor(device))
    }

    struct Recorder {
        layers: Vec<usize>,
        shapes: Vec<([usize; 3], [usize; 4])>,
    }

    impl EncoderHook<TestBackend> for Recorder {
        fn on_layer(&mut self, layer: usize, acts: LayerActivations<TestBackend>) -> Result<()> {
            self.layers.push(layer);
            self.shapes.push((acts.output.dims(), acts.heads.dims()));
            Ok(())
        }
    }

    struct Failing;

    impl EncoderHook<TestBackend> for Failing {
        fn on_layer(&mut self, layer: usize, _: LayerActivations<TestBackend>) -> Result<()> {
            anyhow::bail!("sink full at layer {layer}")
        }
    }

    #[test]
    fn test_hook_sees_every_layer_and_does_not_change_output() {
        let device = Default::default();
        let model: Transformer<TestBackend> = tiny().init(&device);
        let (src, mask) = source(&device);

        let plain = model.encode(src.clone(), mask.clone());
        let mut hook = Recorder { layers: vec![], shapes: vec![] };
        let hooked = model.encode_hooked(src, mask, &mut hook).unwrap();

        assert_eq!(hook.layers, vec![0, 1]);
        assert_eq!(hook.shapes[0], ([2, 3, 8], [2, 2, 3, 4]));
        plain.into_data().assert_approx_eq(&hooked.into_data(), 5);
    }

    #[test]
    fn test_hook_error_aborts_pass() {
        let device = Default::default();
        let model: Transformer<TestBackend> = tiny().init(&device);
        let (src, mask) = source(&device);
        assert!(model.encode_hooked(src, mask, &mut Failing).is_err());
    }

    #[test]
    fn test_padding_does_not_leak_into_real_positions() {
        let device = Default::default();
        let model: Transformer<TestBackend> = tiny().init(&device);

        // the same sentence alone and padded next to a longer one
        let short = [7u32, 8];
        let long  = [4u32, 5, 6, 9];
        let alone  = SourceBatch::from_rows(&[&short], 0);
        let padded = SourceBatch::from_rows(&[&long, &short], 0);

        let a = model.encode(alone.ids_tensor(&device), alone.mask_tensor(&device));
        let b = model.encode(padded.ids_tensor(&device), padded.mask_tensor(&device));
        let b = b.slice([1..2, 0..2, 0..8]);
        a.into_data().assert_approx_eq(&b.into_data(), 4);
    }

    #[test]
    fn test_forward_loss_is_finite() {
        let device = Default::default();
        let model: Transformer<TestBackend> = tiny().init(&device);
        let pairs = vec![
            TokenPair::new(vec![4, 5, 6], vec![2, 9, 10, 3]),
            TokenPair::new(vec![7], vec![2, 11, 3]),
        ];
        let batch = collate_pairs::<TestBackend>(&pairs, &[0, 1], 0, &device);

        assert_eq!(model.forward(&batch).dims(), [2, 3, 22]);
        let loss: f32 = model.forward_loss(&batch, 0, 0.1).into_scalar();
        assert!(loss.is_finite() && loss > 0.0);
    }
}
