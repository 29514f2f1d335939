//! Fine-tuning heads over pretrained protein language models.
use super::{masked_mean, token_mask, OutputSpec, PtmModel};
use crate::data::{EncodedSplit, ProteinTokenizer, TokenLayout};
use crate::error::{PtmError, Result};
use candle_core::{DType, Device, Module, ModuleT, Tensor};
use candle_nn::{linear, Dropout, Linear, VarBuilder, VarMap};
use ferritin_plms::{AmplifyWeights, PretrainedSource, AMPLIFY};

/// A pretrained encoder producing per-token hidden states.
pub trait PretrainedEncoder: Sized {
    type Source;

    /// Load the encoder. With `freeze` its weights are constants; otherwise they are
    /// registered in the returned `VarMap`.
    fn load(source: &Self::Source, device: &Device, freeze: bool) -> Result<(Self, VarMap)>;

    /// The vocabulary the encoder was trained with.
    fn tokenizer(&self) -> &ProteinTokenizer;

    fn hidden_size(&self) -> usize;

    /// Longest token row the encoder accepts.
    fn max_length(&self) -> Option<usize> {
        None
    }

    fn token_layout(&self) -> TokenLayout {
        TokenLayout::WithSpecialTokens
    }

    /// Hidden states `[batch, seq, hidden]`; `pad_mask` is 1 at padding.
    fn hidden_states(
        &self,
        tokens: &Tensor,
        pad_mask: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor>;
}

/// AMPLIFY from `ferritin-plms`.
pub struct AmplifyEncoder {
    model: AMPLIFY,
    tokenizer: ProteinTokenizer,
}

impl PretrainedEncoder for AmplifyEncoder {
    type Source = PretrainedSource;

    fn load(source: &PretrainedSource, device: &Device, freeze: bool) -> Result<(Self, VarMap)> {
        let weights = AmplifyWeights::resolve(source)?;
        let tokenizer = ProteinTokenizer::from_file(&weights.tokenizer)?;
        let (model, varmap) = weights.load(device, !freeze)?;
        log::info!(
            "Loaded AMPLIFY encoder: {} layers, hidden size {}, {}",
            weights.config.num_hidden_layers,
            weights.config.hidden_size,
            if freeze { "frozen" } else { "trainable" }
        );
        Ok((Self { model, tokenizer }, varmap))
    }

    fn tokenizer(&self) -> &ProteinTokenizer {
        &self.tokenizer
    }

    fn hidden_size(&self) -> usize {
        self.model.config().hidden_size
    }

    fn max_length(&self) -> Option<usize> {
        Some(self.model.config().max_length)
    }

    fn hidden_states(
        &self,
        tokens: &Tensor,
        pad_mask: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        self.model.forward(tokens, Some(pad_mask), train)
    }
}

/// A pretrained encoder with a dropout and dense head.
pub struct FinetuneModel<E> {
    encoder: E,
    dropout: Dropout,
    head: Linear,
    spec: OutputSpec,
    varmap: VarMap,
}

impl<E: PretrainedEncoder> FinetuneModel<E> {
    pub const DROPOUT: f32 = 0.5;

    /// Add a head for `spec` to the encoder's variables.
    pub fn build(encoder: E, varmap: VarMap, spec: OutputSpec, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let head = linear(encoder.hidden_size(), spec.num_outputs(), vb.pp("head"))?;
        Ok(Self {
            encoder,
            dropout: Dropout::new(Self::DROPOUT),
            head,
            spec,
            varmap,
        })
    }

    pub fn load(
        source: &E::Source,
        spec: OutputSpec,
        device: &Device,
        freeze: bool,
    ) -> Result<Self> {
        let (encoder, varmap) = E::load(source, device, freeze)?;
        Self::build(encoder, varmap, spec, device)
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Check the model against the first record of an encoded split.
    pub fn prime(&self, split: &EncodedSplit, device: &Device) -> Result<()> {
        if let Some(max_length) = self.encoder.max_length() {
            if split.seq_len > max_length {
                return Err(PtmError::Config(format!(
                    "seq_len {} exceeds the encoder maximum of {}",
                    split.seq_len, max_length
                )));
            }
        }
        let tokens = split.select_tokens(&[0], device)?;
        self.check_output_shape(&tokens)
    }
}

impl<E: PretrainedEncoder> PtmModel for FinetuneModel<E> {
    fn forward_t(&self, tokens: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let pad_id = self.encoder.tokenizer().pad_token_id();
        let pad_mask = tokens.eq(pad_id)?;
        let hidden = self.encoder.hidden_states(tokens, &pad_mask, train)?;
        let hidden = if self.spec.per_residue {
            hidden
        } else {
            masked_mean(&hidden, &token_mask(tokens, pad_id)?)?
        };
        let hidden = self.dropout.forward_t(&hidden, train)?;
        self.spec.shape_logits(self.head.forward(&hidden)?)
    }

    fn output_spec(&self) -> &OutputSpec {
        &self.spec
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn name(&self) -> &'static str {
        "finetune"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{encode_records, EncodeOptions, Record, TaskMode, UniqueLabels};
    use crate::models::OutputKind;
    use candle_nn::{embedding, Embedding};

    /// An embedding lookup standing in for a transformer.
    struct TinyEncoder {
        embedding: Embedding,
        hidden: usize,
        tokenizer: ProteinTokenizer,
    }

    impl PretrainedEncoder for TinyEncoder {
        type Source = usize;

        fn load(hidden: &usize, device: &Device, freeze: bool) -> Result<(Self, VarMap)> {
            let tokenizer = ProteinTokenizer::amino_acids()?;
            let varmap = VarMap::new();
            let embedding = if freeze {
                let weights = Tensor::randn(0f32, 1., (tokenizer.len(), *hidden), device)?;
                Embedding::new(weights, *hidden)
            } else {
                let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
                embedding(tokenizer.len(), *hidden, vb.pp("encoder"))?
            };
            Ok((
                Self {
                    embedding,
                    hidden: *hidden,
                    tokenizer,
                },
                varmap,
            ))
        }

        fn tokenizer(&self) -> &ProteinTokenizer {
            &self.tokenizer
        }

        fn hidden_size(&self) -> usize {
            self.hidden
        }

        fn max_length(&self) -> Option<usize> {
            Some(32)
        }

        fn hidden_states(
            &self,
            tokens: &Tensor,
            _pad_mask: &Tensor,
            _train: bool,
        ) -> candle_core::Result<Tensor> {
            self.embedding.forward(tokens)
        }
    }

    fn split(seq_len: usize, mode: TaskMode) -> EncodedSplit {
        let tokenizer = ProteinTokenizer::amino_acids().unwrap();
        let records = vec![Record::new("MSKTY", &[(1, "p")])];
        let labels = UniqueLabels::new(["p", "q"]);
        let opts = EncodeOptions::new(seq_len, mode, TokenLayout::WithSpecialTokens);
        encode_records(&records, &labels, &tokenizer, &opts).unwrap()
    }

    fn labels() -> Vec<String> {
        vec!["p".into(), "q".into()]
    }

    #[test]
    fn test_frozen_encoder_trains_only_the_head() -> Result<()> {
        let spec = OutputSpec::new(OutputKind::Multilabel, true, &labels());
        let model = FinetuneModel::<TinyEncoder>::load(&8, spec, &Device::Cpu, true)?;
        assert_eq!(model.trainable_vars().len(), 2);

        let spec = OutputSpec::new(OutputKind::Multilabel, true, &labels());
        let model = FinetuneModel::<TinyEncoder>::load(&8, spec, &Device::Cpu, false)?;
        assert_eq!(model.trainable_vars().len(), 3);
        Ok(())
    }

    #[test]
    fn test_prime_checks_shapes() -> Result<()> {
        let spec = OutputSpec::new(OutputKind::Binary, true, &labels());
        let model = FinetuneModel::<TinyEncoder>::load(&8, spec, &Device::Cpu, true)?;
        model.prime(&split(10, TaskMode::BinaryPerLabel), &Device::Cpu)?;

        let err = model
            .prime(&split(40, TaskMode::BinaryPerLabel), &Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, PtmError::Config(_)));
        Ok(())
    }

    #[test]
    fn test_sequence_level_head() -> Result<()> {
        let spec = OutputSpec::new(OutputKind::Multilabel, false, &labels());
        let model = FinetuneModel::<TinyEncoder>::load(&8, spec, &Device::Cpu, true)?;
        let tokens = split(10, TaskMode::Multilabel).select_tokens(&[0], &Device::Cpu)?;
        assert_eq!(model.forward_t(&tokens, true)?.dims(), &[1, 2]);
        Ok(())
    }

    #[test]
    #[ignore = "downloads AMPLIFY_120M from the hub"]
    fn test_amplify_from_hub() -> Result<()> {
        let spec = OutputSpec::new(OutputKind::Multilabel, true, &labels());
        let model = FinetuneModel::<AmplifyEncoder>::load(
            &PretrainedSource::default(),
            spec,
            &Device::Cpu,
            true,
        )?;
        let tokenizer = model.encoder().tokenizer();
        let row = tokenizer.encode("MSKTY", 10, TokenLayout::WithSpecialTokens)?;
        let tokens = Tensor::new(row.ids.as_slice(), &Device::Cpu)?.unsqueeze(0)?;
        model.check_output_shape(&tokens)
    }
}
