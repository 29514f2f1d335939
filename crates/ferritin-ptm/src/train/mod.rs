pub mod callbacks;
pub mod loss;
pub mod trainer;

pub use callbacks::{
    default_callbacks, CallbackAction, CallbackContext, EarlyStopping, ReduceLrOnPlateau,
    TrainState, TrainerCallback,
};
pub use loss::{bce_with_logits, masked_bce_with_logits};
pub use trainer::{EpochRecord, Evaluation, TrainHistory, TrainOptions, Trainer};
