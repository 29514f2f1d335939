//! AMPLIFY is an optimized transformer model focused on optimizing the context of sequence models
//! while maintaining computational efficiency.
//!
//! Key features:
//! - Rotary positional embeddings
//! - RMSNorm for improved training stability
//! - SwiGLU activation function
//!
//! Only the encoder trunk is built here: the masked-language-model decoder is not
//! needed to fine-tune per-residue heads, and its weights are left in the checkpoint.
use super::config::AMPLIFYConfig;
use super::encoder::EncoderBlock;
use super::rmsnorm::RMSNorm;
use super::rotary::precompute_freqs_cis;
use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{embedding, Embedding, VarBuilder};

/// The AMPLIFY model
///
/// - [GH PythonModel](https://github.com/chandar-lab/AMPLIFY/blob/rc-0.1/src/amplify/model/amplify.py)
/// - [paper](https://www.biorxiv.org/content/10.1101/2024.09.23.614603v1)
/// - [HF](https://huggingface.co/chandar-lab/AMPLIFY_120M)
///
#[derive(Debug)]
pub struct AMPLIFY {
    encoder: Embedding,
    layer_norm_1: Option<RMSNorm>,
    transformer_encoder: Vec<EncoderBlock>,
    layer_norm_2: Option<RMSNorm>,
    freqs_cis: Tensor,
    config: AMPLIFYConfig,
}

impl AMPLIFY {
    pub fn load(vb: VarBuilder, cfg: &AMPLIFYConfig) -> Result<Self> {
        let encoder = embedding(cfg.vocab_size, cfg.hidden_size, vb.pp("encoder"))?;
        let layer_norm_1 = if cfg.layer_norm_after_embedding {
            Some(RMSNorm::new(cfg.hidden_size, cfg.norm_eps, vb.pp("layer_norm_1"))?)
        } else {
            None
        };
        let mut transformer_encoder = Vec::with_capacity(cfg.num_hidden_layers);
        for i in 0..cfg.num_hidden_layers {
            transformer_encoder.push(EncoderBlock::load(vb.pp("transformer_encoder"), cfg, i)?);
        }
        let layer_norm_2 = if cfg.layer_norm_before_last_layer {
            Some(RMSNorm::new(cfg.hidden_size, cfg.norm_eps, vb.pp("layer_norm_2"))?)
        } else {
            None
        };
        let freqs_cis = precompute_freqs_cis(cfg.head_dim(), cfg.max_length)?.to_device(vb.device())?;

        Ok(Self {
            encoder,
            layer_norm_1,
            transformer_encoder,
            layer_norm_2,
            freqs_cis,
            config: cfg.clone(),
        })
    }

    /// Additive attention bias from a `[batch, seq]` pad mask (1 = padding).
    ///
    /// Returns `[batch, 1, 1, seq]`, `-inf`-like at padded keys and 0 elsewhere.
    pub fn attention_bias(pad_mask: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len) = pad_mask.dims2()?;
        (pad_mask.to_dtype(DType::F32)? * -1e9)?.reshape((batch_size, 1, 1, seq_len))
    }

    /// Final hidden states `[batch, seq, hidden]` for token ids `[batch, seq]`.
    ///
    /// `train` enables dropout inside the encoder blocks.
    pub fn forward(&self, src: &Tensor, pad_mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let seq_len = src.dim(1)?;
        if seq_len > self.config.max_length {
            candle_core::bail!(
                "sequence length {} exceeds the model maximum of {}",
                seq_len,
                self.config.max_length
            );
        }
        let attn_bias = pad_mask.map(Self::attention_bias).transpose()?;
        let freqs_cis = self.freqs_cis.narrow(0, 0, seq_len)?;
        let mut x = self.encoder.forward(src)?;
        if let Some(norm) = &self.layer_norm_1 {
            x = norm.forward(&x)?;
        }
        for layer in self.transformer_encoder.iter() {
            x = layer.forward(&x, attn_bias.as_ref(), &freqs_cis, train)?;
        }
        match &self.layer_norm_2 {
            Some(norm) => norm.forward(&x),
            None => Ok(x),
        }
    }

    pub fn config(&self) -> &AMPLIFYConfig {
        &self.config
    }

    pub fn get_device(&self) -> &Device {
        self.freqs_cis.device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn tiny_config() -> AMPLIFYConfig {
        AMPLIFYConfig {
            hidden_size: 16,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 24,
            max_length: 32,
            ..AMPLIFYConfig::default()
        }
    }

    #[test]
    fn test_forward_shape() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = AMPLIFY::load(vb, &tiny_config())?;
        let src = Tensor::new(&[[3u32, 5, 6, 7, 4, 0], [3, 8, 9, 4, 0, 0]], &Device::Cpu)?;
        let pad = src.eq(0u32)?;
        let hidden = model.forward(&src, Some(&pad), false)?;
        assert_eq!(hidden.dims(), &[2, 6, 16]);
        Ok(())
    }

    #[test]
    fn test_padding_does_not_leak() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = AMPLIFY::load(vb, &tiny_config())?;
        let short = Tensor::new(&[[3u32, 5, 6, 4, 0, 0]], &Device::Cpu)?;
        let other = Tensor::new(&[[3u32, 5, 6, 4, 0, 9]], &Device::Cpu)?;
        let pad = Tensor::new(&[[0u8, 0, 0, 0, 1, 1]], &Device::Cpu)?;
        let a = model.forward(&short, Some(&pad), false)?.narrow(1, 0, 4)?;
        let b = model.forward(&other, Some(&pad), false)?.narrow(1, 0, 4)?;
        let diff = (a - b)?.abs()?.max_keepdim(2)?.flatten_all()?.max(0)?;
        assert!(diff.to_scalar::<f32>()? < 1e-5);
        Ok(())
    }

    #[test]
    fn test_rejects_long_sequence() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = AMPLIFY::load(vb, &tiny_config())?;
        let src = Tensor::zeros((1, 40), DType::U32, &Device::Cpu)?;
        assert!(model.forward(&src, None, false).is_err());
        Ok(())
    }
}
