use super::callbacks::{
    default_callbacks, CallbackAction, CallbackContext, TrainState, TrainerCallback,
};
use super::loss::masked_bce_with_logits;
use crate::data::{ClassWeights, EncodedSplit, LabelTensor, UniqueLabels};
use crate::error::{PtmError, Result};
use crate::metrics::{sigmoid, LabelMetrics};
use crate::models::PtmModel;
use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub batch_size: usize,
    pub num_epochs: usize,
    pub learning_rate: f64,
    /// Seeds batch shuffling.
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            num_epochs: 10,
            learning_rate: 1e-3,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f32,
    pub val_loss: Option<f32>,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TrainHistory {
    pub epochs: Vec<EpochRecord>,
    pub stopped_early: bool,
}

/// Per-label metrics of one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub metrics: Vec<LabelMetrics>,
}

impl Evaluation {
    pub fn get(&self, label: &str) -> Option<&LabelMetrics> {
        self.metrics.iter().find(|m| m.label == label)
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.metrics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{m}")?;
        }
        Ok(())
    }
}

/// Fits and evaluates [`PtmModel`]s on encoded splits.
///
/// `label_index` selects the binary target of one label; `None` trains the joint
/// multilabel target.
pub struct Trainer {
    device: Device,
    options: TrainOptions,
    rng: StdRng,
    class_weights: Option<ClassWeights>,
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl Trainer {
    pub fn new(device: Device, options: TrainOptions) -> Self {
        let rng = StdRng::seed_from_u64(options.seed);
        Self {
            device,
            options,
            rng,
            class_weights: None,
            callbacks: default_callbacks(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: Vec<Box<dyn TrainerCallback>>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Scale the loss of positive positions by the weight of their label.
    pub fn with_class_weights(mut self, class_weights: Option<ClassWeights>) -> Self {
        self.class_weights = class_weights;
        self
    }

    pub fn options(&self) -> &TrainOptions {
        &self.options
    }

    fn pos_weight(&self, label_index: Option<usize>) -> Result<Option<Tensor>> {
        let Some(weights) = &self.class_weights else {
            return Ok(None);
        };
        let tensor = match label_index {
            Some(i) => Tensor::new(weights.get(i), &self.device)?,
            None => Tensor::new(weights.as_slice(), &self.device)?,
        };
        Ok(Some(tensor))
    }

    pub fn train(
        &mut self,
        model: &dyn PtmModel,
        train_set: &EncodedSplit,
        val_set: &EncodedSplit,
        label_index: Option<usize>,
    ) -> Result<TrainHistory> {
        if self.options.batch_size == 0 {
            return Err(PtmError::Config("batch_size must be positive".to_string()));
        }
        let target = train_set.target(label_index)?;
        let total_weight: f32 = target.weights.iter().sum();
        if total_weight == 0.0 {
            log::warn!("Training target {label_index:?} has no weighted positions; weights stay unchanged");
        }
        let pos_weight = self.pos_weight(label_index)?;

        let vars = model.trainable_vars();
        let params = ParamsAdamW {
            lr: self.options.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut opt = AdamW::new(vars.clone(), params)?;
        log::info!(
            "Training {} model ({} tensors) on {} records for up to {} epochs",
            model.name(),
            vars.len(),
            train_set.num_records,
            self.options.num_epochs
        );

        let mut ctx = CallbackContext {
            max_epochs: self.options.num_epochs,
            learning_rate: self.options.learning_rate,
            ..Default::default()
        };
        for cb in self.callbacks.iter_mut() {
            cb.on_train_begin(&ctx);
        }

        let mut history = TrainHistory::default();
        let mut order: Vec<usize> = (0..train_set.num_records).collect();
        for epoch in 0..self.options.num_epochs {
            order.shuffle(&mut self.rng);
            let (mut loss_sum, mut weight_sum) = (0f32, 0f32);
            for chunk in order.chunks(self.options.batch_size) {
                let batch = train_set.batch(chunk, label_index, &self.device)?;
                let logits = model.forward_t(&batch.tokens, true)?;
                let Some(loss) = masked_bce_with_logits(
                    &logits,
                    &batch.labels,
                    &batch.weights,
                    pos_weight.as_ref(),
                )?
                else {
                    continue;
                };
                opt.backward_step(&loss)?;
                let batch_weight = batch.weights.sum_all()?.to_scalar::<f32>()?;
                loss_sum += loss.to_scalar::<f32>()? * batch_weight;
                weight_sum += batch_weight;
            }

            let val_loss = self.loss(model, val_set, label_index, pos_weight.as_ref())?;
            ctx = CallbackContext {
                epoch,
                max_epochs: self.options.num_epochs,
                loss: if weight_sum > 0.0 { loss_sum / weight_sum } else { 0.0 },
                val_loss,
                learning_rate: opt.learning_rate(),
            };
            log::info!(
                "Epoch {}/{}: loss {:.4}, val_loss {}, lr {:.3e}",
                epoch + 1,
                self.options.num_epochs,
                ctx.loss,
                val_loss.map_or_else(|| "n/a".to_string(), |l| format!("{l:.4}")),
                ctx.learning_rate
            );

            let mut state = TrainState {
                vars: &vars,
                learning_rate: opt.learning_rate(),
            };
            let mut stop = false;
            for cb in self.callbacks.iter_mut() {
                if cb.on_epoch_end(&ctx, &mut state)? == CallbackAction::Stop {
                    log::debug!("{} requested a stop", cb.name());
                    stop = true;
                }
            }
            opt.set_learning_rate(state.learning_rate);
            history.epochs.push(EpochRecord {
                epoch,
                loss: ctx.loss,
                val_loss,
                learning_rate: ctx.learning_rate,
            });
            if stop {
                history.stopped_early = true;
                break;
            }
        }

        let mut state = TrainState {
            vars: &vars,
            learning_rate: opt.learning_rate(),
        };
        for cb in self.callbacks.iter_mut() {
            cb.on_train_end(&ctx, &mut state)?;
        }
        Ok(history)
    }

    /// Weighted mean loss over a split without updating the model.
    pub fn loss(
        &self,
        model: &dyn PtmModel,
        split: &EncodedSplit,
        label_index: Option<usize>,
        pos_weight: Option<&Tensor>,
    ) -> Result<Option<f32>> {
        let (mut loss_sum, mut weight_sum) = (0f32, 0f32);
        let records: Vec<usize> = (0..split.num_records).collect();
        for chunk in records.chunks(self.options.batch_size.max(1)) {
            let batch = split.batch(chunk, label_index, &self.device)?;
            let logits = model.forward_t(&batch.tokens, false)?;
            if let Some(loss) =
                masked_bce_with_logits(&logits, &batch.labels, &batch.weights, pos_weight)?
            {
                let batch_weight = batch.weights.sum_all()?.to_scalar::<f32>()?;
                loss_sum += loss.to_scalar::<f32>()? * batch_weight;
                weight_sum += batch_weight;
            }
        }
        Ok((weight_sum > 0.0).then(|| loss_sum / weight_sum))
    }

    /// Logits for every record, flattened in record order.
    pub fn predict(&self, model: &dyn PtmModel, split: &EncodedSplit) -> Result<Vec<f32>> {
        let records: Vec<usize> = (0..split.num_records).collect();
        let mut logits = Vec::new();
        for chunk in records.chunks(self.options.batch_size.max(1)) {
            let tokens = split.select_tokens(chunk, &self.device)?;
            let out = model.forward_t(&tokens, false)?;
            logits.extend(out.flatten_all()?.to_vec1::<f32>()?);
        }
        Ok(logits)
    }

    /// ROC-AUC, PR-AUC and confusion matrix per label over weight-1 positions.
    pub fn eval(
        &self,
        model: &dyn PtmModel,
        test_set: &EncodedSplit,
        labels: &UniqueLabels,
        label_index: Option<usize>,
    ) -> Result<Evaluation> {
        let target = test_set.target(label_index)?;
        let logits = self.predict(model, test_set)?;
        if logits.len() != target.labels.len() {
            return Err(PtmError::ShapeMismatch {
                expected: target.shape.clone(),
                actual: vec![logits.len()],
            });
        }
        let probabilities: Vec<f32> = logits.into_iter().map(sigmoid).collect();

        let metrics = match label_index {
            Some(i) => vec![label_metrics(&labels[i], target, &probabilities, 0, 1)],
            None => (0..labels.len())
                .map(|u| label_metrics(&labels[u], target, &probabilities, u, labels.len()))
                .collect(),
        };
        for m in metrics.iter() {
            log::debug!("{}: AUC {:?}, PR-AUC {:?}", m.label, m.roc_auc, m.pr_auc);
        }
        Ok(Evaluation { metrics })
    }
}

/// Metrics of the label at `offset` in rows laid out with `stride` labels per position.
fn label_metrics(
    label: &str,
    target: &LabelTensor,
    probabilities: &[f32],
    offset: usize,
    stride: usize,
) -> LabelMetrics {
    let (mut y_true, mut y_prob) = (Vec::new(), Vec::new());
    for idx in (offset..target.labels.len()).step_by(stride) {
        if target.weights[idx] == 1.0 {
            y_true.push(target.labels[idx]);
            y_prob.push(probabilities[idx]);
        }
    }
    LabelMetrics::compute(label, &y_true, &y_prob)
}
