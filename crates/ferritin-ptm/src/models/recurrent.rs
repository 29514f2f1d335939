use super::bilstm::BiLstm;
use super::{masked_mean, token_mask, OutputSpec, PtmModel};
use crate::error::Result;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder, VarMap};

pub const EMBEDDING_DIM: usize = 128;
pub const LSTM_HIDDEN: usize = 128;

/// Embedding, bidirectional LSTM and a dense projection to the output logits.
///
/// Sequence-level outputs mean-pool the LSTM states over non-pad tokens before the
/// projection.
pub struct RecurrentModel {
    embedding: Embedding,
    lstm: BiLstm,
    dense: Linear,
    spec: OutputSpec,
    pad_token_id: u32,
    varmap: VarMap,
}

impl RecurrentModel {
    pub fn new(
        vocab_size: usize,
        pad_token_id: u32,
        spec: OutputSpec,
        device: &Device,
    ) -> Result<Self> {
        Self::with_dims(
            vocab_size,
            pad_token_id,
            EMBEDDING_DIM,
            LSTM_HIDDEN,
            spec,
            device,
        )
    }

    pub fn with_dims(
        vocab_size: usize,
        pad_token_id: u32,
        embedding_dim: usize,
        hidden_size: usize,
        spec: OutputSpec,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let embedding = embedding(vocab_size, embedding_dim, vb.pp("embedding"))?;
        let lstm = BiLstm::new(embedding_dim, hidden_size, vb.pp("lstm"))?;
        let dense = linear(lstm.output_size(), spec.num_outputs(), vb.pp("dense"))?;
        log::info!(
            "Built recurrent model: vocab {}, embedding {}, bilstm {}x2, {} outputs",
            vocab_size,
            embedding_dim,
            hidden_size,
            spec.num_outputs()
        );
        Ok(Self {
            embedding,
            lstm,
            dense,
            spec,
            pad_token_id,
            varmap,
        })
    }
}

impl PtmModel for RecurrentModel {
    fn forward_t(&self, tokens: &Tensor, _train: bool) -> candle_core::Result<Tensor> {
        let xs = self.embedding.forward(tokens)?;
        let xs = self.lstm.forward(&xs)?;
        let xs = if self.spec.per_residue {
            xs
        } else {
            masked_mean(&xs, &token_mask(tokens, self.pad_token_id)?)?
        };
        self.spec.shape_logits(self.dense.forward(&xs)?)
    }

    fn output_spec(&self) -> &OutputSpec {
        &self.spec
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn name(&self) -> &'static str {
        "recurrent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputKind;

    fn labels() -> Vec<String> {
        vec!["a".into(), "b".into(), "c".into()]
    }

    #[test]
    fn test_per_residue_outputs() -> Result<()> {
        let device = Device::Cpu;
        let tokens = Tensor::new(&[[5u32, 6, 7, 0], [8, 9, 0, 0]], &device)?;

        let spec = OutputSpec::new(OutputKind::Multilabel, true, &labels());
        let model = RecurrentModel::with_dims(30, 0, 8, 4, spec, &device)?;
        model.check_output_shape(&tokens)?;
        assert_eq!(model.forward_t(&tokens, true)?.dims(), &[2, 4, 3]);

        let spec = OutputSpec::new(OutputKind::Binary, true, &labels());
        let model = RecurrentModel::with_dims(30, 0, 8, 4, spec, &device)?;
        assert_eq!(model.forward_t(&tokens, false)?.dims(), &[2, 4]);
        Ok(())
    }

    #[test]
    fn test_sequence_level_outputs() -> Result<()> {
        let device = Device::Cpu;
        let tokens = Tensor::new(&[[5u32, 6, 7, 0]], &device)?;
        let spec = OutputSpec::new(OutputKind::Multilabel, false, &labels());
        let model = RecurrentModel::with_dims(30, 0, 8, 4, spec, &device)?;
        assert_eq!(model.forward_t(&tokens, false)?.dims(), &[1, 3]);

        let spec = OutputSpec::new(OutputKind::Binary, false, &labels());
        let model = RecurrentModel::with_dims(30, 0, 8, 4, spec, &device)?;
        assert_eq!(model.forward_t(&tokens, false)?.dims(), &[1]);
        Ok(())
    }

    #[test]
    fn test_default_dims() -> Result<()> {
        let spec = OutputSpec::new(OutputKind::Binary, true, &labels());
        let model = RecurrentModel::new(30, 0, spec, &Device::Cpu)?;
        // embedding + 8 lstm tensors + dense weight and bias
        assert_eq!(model.trainable_vars().len(), 11);
        Ok(())
    }
}
