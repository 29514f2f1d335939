//! Epoch-level training callbacks.
//!
//! Both built-in callbacks monitor the validation loss and fall back to the training
//! loss when no validation loss was computed.
use crate::error::Result;
use candle_core::{Tensor, Var};

/// Training state passed to callbacks.
#[derive(Clone, Debug, Default)]
pub struct CallbackContext {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    pub max_epochs: usize,
    /// Mean training loss of the epoch
    pub loss: f32,
    pub val_loss: Option<f32>,
    pub learning_rate: f64,
}

impl CallbackContext {
    pub fn monitored_loss(&self) -> f32 {
        self.val_loss.unwrap_or(self.loss)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Mutable handles a callback may act on.
pub struct TrainState<'a> {
    pub vars: &'a [Var],
    pub learning_rate: f64,
}

pub trait TrainerCallback {
    /// Reset per-run state. Called at the start of every `train` call.
    fn on_train_begin(&mut self, _ctx: &CallbackContext) {}

    fn on_epoch_end(
        &mut self,
        _ctx: &CallbackContext,
        _state: &mut TrainState,
    ) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_train_end(&mut self, _ctx: &CallbackContext, _state: &mut TrainState) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TrainerCallback"
    }
}

/// Scale the learning rate by `factor` after `patience` epochs without improvement.
#[derive(Clone, Debug)]
pub struct ReduceLrOnPlateau {
    patience: usize,
    factor: f64,
    min_lr: f64,
    min_delta: f32,
    best: f32,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(patience: usize, factor: f64, min_lr: f64) -> Self {
        Self {
            patience,
            factor,
            min_lr,
            min_delta: 1e-4,
            best: f32::INFINITY,
            wait: 0,
        }
    }
}

impl Default for ReduceLrOnPlateau {
    fn default() -> Self {
        Self::new(1, 0.25, 1e-5)
    }
}

impl TrainerCallback for ReduceLrOnPlateau {
    fn on_train_begin(&mut self, _ctx: &CallbackContext) {
        self.best = f32::INFINITY;
        self.wait = 0;
    }

    fn on_epoch_end(
        &mut self,
        ctx: &CallbackContext,
        state: &mut TrainState,
    ) -> Result<CallbackAction> {
        let current = ctx.monitored_loss();
        if current < self.best - self.min_delta {
            self.best = current;
            self.wait = 0;
            return Ok(CallbackAction::Continue);
        }
        self.wait += 1;
        if self.wait >= self.patience {
            let old_lr = state.learning_rate;
            if old_lr > self.min_lr {
                let new_lr = (old_lr * self.factor).max(self.min_lr);
                log::info!(
                    "Epoch {}: reducing learning rate from {:.3e} to {:.3e}",
                    ctx.epoch + 1,
                    old_lr,
                    new_lr
                );
                state.learning_rate = new_lr;
            }
            self.wait = 0;
        }
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &'static str {
        "ReduceLrOnPlateau"
    }
}

/// Stop after `patience` epochs without improvement.
///
/// With `restore_best` the variables are reset at the end of training to the values
/// they had after the best epoch.
pub struct EarlyStopping {
    patience: usize,
    restore_best: bool,
    best: f32,
    best_epoch: usize,
    wait: usize,
    best_weights: Option<Vec<Tensor>>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            restore_best: false,
            best: f32::INFINITY,
            best_epoch: 0,
            wait: 0,
            best_weights: None,
        }
    }

    pub fn with_restore_best(mut self) -> Self {
        self.restore_best = true;
        self
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    fn snapshot(vars: &[Var]) -> Result<Vec<Tensor>> {
        Ok(vars
            .iter()
            .map(|v| v.as_tensor().copy())
            .collect::<candle_core::Result<Vec<_>>>()?)
    }
}

impl Default for EarlyStopping {
    fn default() -> Self {
        Self::new(2).with_restore_best()
    }
}

impl TrainerCallback for EarlyStopping {
    fn on_train_begin(&mut self, _ctx: &CallbackContext) {
        self.best = f32::INFINITY;
        self.best_epoch = 0;
        self.wait = 0;
        self.best_weights = None;
    }

    fn on_epoch_end(
        &mut self,
        ctx: &CallbackContext,
        state: &mut TrainState,
    ) -> Result<CallbackAction> {
        let current = ctx.monitored_loss();
        if current < self.best {
            self.best = current;
            self.best_epoch = ctx.epoch;
            self.wait = 0;
            if self.restore_best {
                self.best_weights = Some(Self::snapshot(state.vars)?);
            }
            return Ok(CallbackAction::Continue);
        }
        self.wait += 1;
        if self.wait >= self.patience && ctx.epoch > 0 {
            log::info!(
                "Epoch {}: early stopping, best loss {:.4} at epoch {}",
                ctx.epoch + 1,
                self.best,
                self.best_epoch + 1
            );
            return Ok(CallbackAction::Stop);
        }
        Ok(CallbackAction::Continue)
    }

    fn on_train_end(&mut self, ctx: &CallbackContext, state: &mut TrainState) -> Result<()> {
        if let Some(best_weights) = self.best_weights.take() {
            if self.best_epoch != ctx.epoch {
                log::info!(
                    "Restoring weights from the end of epoch {}",
                    self.best_epoch + 1
                );
                for (var, value) in state.vars.iter().zip(best_weights.iter()) {
                    var.set(value)?;
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EarlyStopping"
    }
}

/// The schedule used for every training round: learning-rate reduction on plateau and
/// early stopping with best-weight restoration.
pub fn default_callbacks() -> Vec<Box<dyn TrainerCallback>> {
    vec![
        Box::new(ReduceLrOnPlateau::default()),
        Box::new(EarlyStopping::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn ctx(epoch: usize, val_loss: f32) -> CallbackContext {
        CallbackContext {
            epoch,
            max_epochs: 10,
            loss: 1.0,
            val_loss: Some(val_loss),
            learning_rate: 0.0,
        }
    }

    #[test]
    fn test_reduce_lr_on_plateau() -> Result<()> {
        let mut cb = ReduceLrOnPlateau::default();
        let mut state = TrainState {
            vars: &[],
            learning_rate: 1e-3,
        };
        cb.on_train_begin(&ctx(0, 0.0));
        cb.on_epoch_end(&ctx(0, 0.5), &mut state)?;
        assert_eq!(state.learning_rate, 1e-3);
        cb.on_epoch_end(&ctx(1, 0.6), &mut state)?;
        assert!((state.learning_rate - 2.5e-4).abs() < 1e-12);
        cb.on_epoch_end(&ctx(2, 0.6), &mut state)?;
        assert!((state.learning_rate - 6.25e-5).abs() < 1e-12);
        cb.on_epoch_end(&ctx(3, 0.6), &mut state)?;
        cb.on_epoch_end(&ctx(4, 0.6), &mut state)?;
        assert_eq!(state.learning_rate, 1e-5);
        Ok(())
    }

    #[test]
    fn test_early_stopping_patience() -> Result<()> {
        let mut cb = EarlyStopping::new(2);
        let mut state = TrainState {
            vars: &[],
            learning_rate: 1e-3,
        };
        cb.on_train_begin(&ctx(0, 0.0));
        assert_eq!(cb.on_epoch_end(&ctx(0, 0.5), &mut state)?, CallbackAction::Continue);
        assert_eq!(cb.on_epoch_end(&ctx(1, 0.4), &mut state)?, CallbackAction::Continue);
        assert_eq!(cb.on_epoch_end(&ctx(2, 0.45), &mut state)?, CallbackAction::Continue);
        assert_eq!(cb.on_epoch_end(&ctx(3, 0.41), &mut state)?, CallbackAction::Stop);
        assert_eq!(cb.best_epoch(), 1);
        Ok(())
    }

    #[test]
    fn test_early_stopping_restores_best_weights() -> Result<()> {
        let var = Var::new(&[1.0f32, 2.0], &Device::Cpu)?;
        let vars = vec![var.clone()];
        let mut state = TrainState {
            vars: &vars,
            learning_rate: 1e-3,
        };
        let mut cb = EarlyStopping::default();
        cb.on_train_begin(&ctx(0, 0.0));
        cb.on_epoch_end(&ctx(0, 0.3), &mut state)?;
        var.set(&Tensor::new(&[5.0f32, 5.0], &Device::Cpu)?)?;
        cb.on_epoch_end(&ctx(1, 0.9), &mut state)?;
        cb.on_train_end(&ctx(1, 0.9), &mut state)?;
        assert_eq!(var.as_tensor().to_vec1::<f32>()?, vec![1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_state_resets_between_runs() -> Result<()> {
        let mut cb = EarlyStopping::new(1);
        let mut state = TrainState {
            vars: &[],
            learning_rate: 1e-3,
        };
        cb.on_train_begin(&ctx(0, 0.0));
        cb.on_epoch_end(&ctx(0, 0.1), &mut state)?;
        cb.on_train_begin(&ctx(0, 0.0));
        // a worse loss than the previous run still counts as the first improvement
        assert_eq!(cb.on_epoch_end(&ctx(0, 0.8), &mut state)?, CallbackAction::Continue);
        Ok(())
    }
}
