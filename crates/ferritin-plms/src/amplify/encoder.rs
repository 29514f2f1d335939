use super::config::AMPLIFYConfig;
use super::rmsnorm::RMSNorm;
use super::rotary::apply_rotary_emb;
use candle_core::{Module, Result, Tensor, D};
use candle_nn::{linear_b, ops::softmax, Dropout, Linear, VarBuilder};

/// Amplify EncoderBlock
///
/// Pre-norm attention followed by a SwiGLU feed-forward block.
///
/// - [T5](https://github.com/huggingface/candle/blob/e2b6b367fa852ed30ac532f8d77cd8479c7ed092/candle-transformers/src/models/t5.rs#L331)
/// - [SwiGLu Implementation](https://github.com/facebookresearch/xformers/blob/main/xformers/ops/swiglu_op.py#L462)
#[derive(Debug)]
pub struct EncoderBlock {
    q: Linear,
    k: Linear,
    v: Linear,
    wo: Linear,
    resid_dropout: Dropout,
    w12: Linear,
    w3: Linear,
    ffn_norm: RMSNorm,
    attention_norm: RMSNorm,
    ffn_dropout: Dropout,
    attn_dropout: f32,
    num_heads: usize,
    d_head: usize,
}

impl EncoderBlock {
    pub fn load(vb: VarBuilder, config: &AMPLIFYConfig, layer: usize) -> Result<Self> {
        let vb = vb.pp(layer);
        let hidden = config.hidden_size;
        let ffn_hidden = config.swiglu_hidden_size();
        let q = linear_b(hidden, hidden, config.att_bias, vb.pp("q"))?;
        let k = linear_b(hidden, hidden, config.att_bias, vb.pp("k"))?;
        let v = linear_b(hidden, hidden, config.att_bias, vb.pp("v"))?;
        let wo = linear_b(hidden, hidden, config.att_bias, vb.pp("wo"))?;
        let w12 = linear_b(hidden, ffn_hidden * 2, config.ffn_bias, vb.pp("ffn.w12"))?;
        let w3 = linear_b(ffn_hidden, hidden, config.ffn_bias, vb.pp("ffn.w3"))?;
        let ffn_norm = RMSNorm::new(hidden, config.norm_eps, vb.pp("ffn_norm"))?;
        let attention_norm = RMSNorm::new(hidden, config.norm_eps, vb.pp("attention_norm"))?;

        Ok(Self {
            q,
            k,
            v,
            wo,
            resid_dropout: Dropout::new(config.dropout_prob as f32),
            w12,
            w3,
            attention_norm,
            ffn_norm,
            ffn_dropout: Dropout::new(config.dropout_prob as f32),
            attn_dropout: config.dropout_prob as f32,
            num_heads: config.num_attention_heads,
            d_head: config.head_dim(),
        })
    }

    /// `attn_bias` is additive and broadcastable to `[batch, heads, seq, seq]`.
    pub fn forward(
        &self,
        x: &Tensor,
        attn_bias: Option<&Tensor>,
        freqs_cis: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let normed = self.attention_norm.forward(x)?;
        let attn = self.attention_block(&normed, attn_bias, freqs_cis, train)?;
        let x = (x + attn)?;
        let normed = self.ffn_norm.forward(&x)?;
        let ff = self.ffn_dropout.forward(&self.ffn_forward(&normed)?, train)?;
        x + ff
    }

    fn ffn_forward(&self, x: &Tensor) -> Result<Tensor> {
        let w12_out = self.w12.forward(x)?;
        let chunks = w12_out.chunk(2, D::Minus1)?;
        let hidden = (chunks[0].silu()? * &chunks[1])?;
        self.w3.forward(&hidden)
    }

    fn attention_block(
        &self,
        x: &Tensor,
        attn_bias: Option<&Tensor>,
        freqs_cis: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;
        let shape = (batch_size, seq_len, self.num_heads, self.d_head);
        let xq = self.q.forward(x)?.reshape(shape)?;
        let xk = self.k.forward(x)?.reshape(shape)?;
        let xv = self.v.forward(x)?.reshape(shape)?;
        let (xq, xk) = apply_rotary_emb(&xq, &xk, freqs_cis)?;

        // [batch, heads, seq, d_head]
        let q = xq.transpose(1, 2)?.contiguous()?;
        let k = xk.transpose(1, 2)?.contiguous()?;
        let v = xv.transpose(1, 2)?.contiguous()?;

        let scale = 1.0 / (self.d_head as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? * scale)?;
        let scores = match attn_bias {
            Some(bias) => scores.broadcast_add(bias)?,
            None => scores,
        };
        let attn = softmax(&scores, D::Minus1)?;
        let attn = if train && self.attn_dropout > 0.0 {
            candle_nn::ops::dropout(&attn, self.attn_dropout)?
        } else {
            attn
        };
        let out = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.num_heads * self.d_head))?;
        self.resid_dropout.forward(&self.wo.forward(&out)?, train)
    }
}
