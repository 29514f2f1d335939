//! ferritin-ptm
//!
//! Fine-tune protein language models to predict post-translational modification sites.
//!
//! - encode PTM datasets into fixed-length token, label and weight tensors
//! - train a recurrent baseline or a fine-tuned [AMPLIFY](https://github.com/chandar-lab/AMPLIFY) encoder
//! - report per-label ROC-AUC, PR-AUC and confusion matrices
//!
//! ```shell
//! cargo run -p ferritin-ptm --release -- --config config.yaml --binary --model rnn --cpu
//! ```
pub mod config;
pub mod data;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod models;
pub mod train;

pub use config::{PathsConfig, RunConfig};
pub use data::{Dataset, ProteinTokenizer, Record, TaskMode, TokenLayout, UniqueLabels};
pub use driver::{run, run_with_builder, LabelOrder, ModelBuilder, RunReport, Splits, WarmStart};
pub use error::{PtmError, Result};
pub use metrics::LabelMetrics;
pub use models::{ModelKind, OutputKind, OutputSpec, PtmModel};
pub use train::{TrainOptions, Trainer};
