//! Trainable PTM site predictors.
//!
//! Two model families share the [`PtmModel`] contract:
//! - [`RecurrentModel`]: embedding, bidirectional LSTM and a dense projection.
//! - [`FinetuneModel`]: a pretrained encoder behind [`PretrainedEncoder`] with a dropout
//!   and dense head.
use crate::error::{PtmError, Result};
use candle_core::{DType, Tensor, Var, D};
use candle_nn::VarMap;
use strum::{Display, EnumString};

pub mod bilstm;
pub mod pretrained;
pub mod recurrent;

pub use pretrained::{AmplifyEncoder, FinetuneModel, PretrainedEncoder};
pub use recurrent::RecurrentModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// A single logit per prediction.
    Binary,
    /// One logit per label per prediction.
    Multilabel,
}

/// Shape of the model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub kind: OutputKind,
    /// Per-token predictions; otherwise one prediction per sequence.
    pub per_residue: bool,
    pub labels: Vec<String>,
}

impl OutputSpec {
    pub fn new(kind: OutputKind, per_residue: bool, labels: &[String]) -> Self {
        Self {
            kind,
            per_residue,
            labels: labels.to_vec(),
        }
    }

    pub fn num_outputs(&self) -> usize {
        match self.kind {
            OutputKind::Binary => 1,
            OutputKind::Multilabel => self.labels.len(),
        }
    }

    /// Expected output dims for a batch of token rows of `seq_len`.
    pub fn output_shape(&self, batch_size: usize, seq_len: usize) -> Vec<usize> {
        let mut shape = vec![batch_size];
        if self.per_residue {
            shape.push(seq_len);
        }
        if self.kind == OutputKind::Multilabel {
            shape.push(self.labels.len());
        }
        shape
    }

    /// Drop the trailing unit axis of binary outputs.
    pub(crate) fn shape_logits(&self, logits: Tensor) -> candle_core::Result<Tensor> {
        match self.kind {
            OutputKind::Binary => logits.squeeze(D::Minus1),
            OutputKind::Multilabel => Ok(logits),
        }
    }
}

/// Which model the driver builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ModelKind {
    /// The pretrained transformer encoder with a fine-tuning head.
    ProteinBert,
    /// The recurrent baseline.
    Recurrent,
}

impl ModelKind {
    /// `proteinbert` selects the pretrained model, any other name the recurrent baseline.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("proteinbert") {
            ModelKind::ProteinBert
        } else {
            ModelKind::Recurrent
        }
    }
}

pub trait PtmModel {
    /// Logits shaped by [`OutputSpec::output_shape`] for token ids `[batch, seq_len]`.
    fn forward_t(&self, tokens: &Tensor, train: bool) -> candle_core::Result<Tensor>;

    fn output_spec(&self) -> &OutputSpec;

    /// Every trainable variable, for optimizers and checkpoints.
    fn varmap(&self) -> &VarMap;

    fn name(&self) -> &'static str;

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap().all_vars()
    }

    /// Run one record through the model and compare with the shape its targets have.
    fn check_output_shape(&self, tokens: &Tensor) -> Result<()> {
        let (batch_size, seq_len) = tokens.dims2()?;
        let logits = self.forward_t(tokens, false)?;
        let expected = self.output_spec().output_shape(batch_size, seq_len);
        if logits.dims() != expected.as_slice() {
            return Err(PtmError::ShapeMismatch {
                expected,
                actual: logits.dims().to_vec(),
            });
        }
        Ok(())
    }
}

/// 1.0 at real tokens and 0.0 at padding, `[batch, seq_len]`.
pub(crate) fn token_mask(tokens: &Tensor, pad_token_id: u32) -> candle_core::Result<Tensor> {
    tokens.ne(pad_token_id)?.to_dtype(DType::F32)
}

/// Mean of `hidden` `[batch, seq, dim]` over positions where `mask` `[batch, seq]` is 1.
pub(crate) fn masked_mean(hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let summed = hidden.broadcast_mul(&mask.unsqueeze(D::Minus1)?)?.sum(1)?;
    let counts = mask.sum_keepdim(1)?.clamp(1f32, f32::MAX)?;
    summed.broadcast_div(&counts)
}
