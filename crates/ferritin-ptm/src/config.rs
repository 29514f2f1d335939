//! Run configuration: the YAML paths file plus every command-line setting.
use crate::data::{EncodeOptions, NegativeSampling, TaskMode, TokenLayout};
use crate::driver::{LabelOrder, WarmStart};
use crate::error::{PtmError, Result};
use crate::models::ModelKind;
use crate::train::TrainOptions;
use candle_core::Device;
use ferritin_plms::PretrainedSource;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Directories read from the YAML config file.
///
/// Unknown keys are ignored; both keys are required.
#[derive(Debug, Clone, PartialEq)]
pub struct PathsConfig {
    pub path_data: PathBuf,
    pub path_pred: PathBuf,
}

#[derive(Deserialize)]
struct RawPaths {
    path_data: Option<serde_yaml::Value>,
    path_pred: Option<serde_yaml::Value>,
}

fn scalar_to_string(key: &str, value: Option<serde_yaml::Value>) -> Result<String> {
    match value {
        Some(serde_yaml::Value::String(s)) => Ok(s),
        Some(serde_yaml::Value::Number(n)) => Ok(n.to_string()),
        Some(serde_yaml::Value::Bool(b)) => Ok(b.to_string()),
        Some(other) => Err(PtmError::Config(format!(
            "`{key}` must be a string, found {other:?}"
        ))),
        None => Err(PtmError::Config(format!("missing config key `{key}`"))),
    }
}

impl PathsConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let raw: RawPaths = serde_yaml::from_str(raw)?;
        Ok(Self {
            path_data: scalar_to_string("path_data", raw.path_data)?.into(),
            path_pred: scalar_to_string("path_pred", raw.path_pred)?.into(),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PtmError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// `<path_data>/PTM_<split>.json`
    pub fn split_file(&self, split: &str) -> PathBuf {
        self.path_data.join(format!("PTM_{split}.json"))
    }
}

/// Resolve the task mode from the `--binary` / `--multilabel` pair.
///
/// Setting both is rejected; setting neither means multilabel.
pub fn task_mode(binary: bool, multilabel: bool) -> Result<TaskMode> {
    match (binary, multilabel) {
        (true, true) => Err(PtmError::Config(
            "--binary and --multilabel are mutually exclusive".to_string(),
        )),
        (true, false) => Ok(TaskMode::BinaryPerLabel),
        (false, _) => Ok(TaskMode::Multilabel),
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub paths: PathsConfig,
    pub model: ModelKind,
    pub seq_len: usize,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub learning_rate: f64,
    pub random_seed: u64,
    pub mode: TaskMode,
    /// Sequence-level targets.
    pub short: bool,
    pub class_weights: bool,
    /// Restrict binary negatives to residues observed carrying the label.
    pub spec_neg_sam: bool,
    pub neg_ratio: f64,
    pub freeze_pretrained: bool,
    pub pretrained: PretrainedSource,
    pub label_order: LabelOrder,
    pub warm_start: WarmStart,
    pub cpu: bool,
    pub save_model: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(paths: PathsConfig) -> Self {
        Self {
            paths,
            model: ModelKind::ProteinBert,
            seq_len: 512,
            batch_size: 32,
            num_epochs: 10,
            learning_rate: 1e-3,
            random_seed: 0,
            mode: TaskMode::Multilabel,
            short: false,
            class_weights: false,
            spec_neg_sam: false,
            neg_ratio: 1.0,
            freeze_pretrained: false,
            pretrained: PretrainedSource::default(),
            label_order: LabelOrder::default(),
            warm_start: WarmStart::default(),
            cpu: false,
            save_model: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("seq_len", self.seq_len),
            ("batch_size", self.batch_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PtmError::Config(format!("{name} must be positive")));
            }
        }
        if self.layout() == TokenLayout::WithSpecialTokens && self.seq_len < 3 {
            return Err(PtmError::Config(
                "seq_len must leave room for the start and end tokens".to_string(),
            ));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(PtmError::Config("learning_rate must be positive".to_string()));
        }
        if self.neg_ratio.is_nan() || self.neg_ratio < 0.0 {
            return Err(PtmError::Config("neg_ratio must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn layout(&self) -> TokenLayout {
        match self.model {
            ModelKind::ProteinBert => TokenLayout::WithSpecialTokens,
            ModelKind::Recurrent => TokenLayout::ResiduesOnly,
        }
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            batch_size: self.batch_size,
            num_epochs: self.num_epochs,
            learning_rate: self.learning_rate,
            seed: self.random_seed,
        }
    }

    /// Encoding of the training split, or of validation/test with `evaluate`.
    pub fn encode_options(
        &self,
        layout: TokenLayout,
        evaluate: bool,
        sampling: NegativeSampling,
    ) -> EncodeOptions {
        EncodeOptions::new(self.seq_len, self.mode, layout)
            .short(self.short)
            .evaluate(evaluate)
            .sampling(sampling)
    }

    /// Seed accelerator RNGs. Host-side randomness is seeded where it is drawn.
    pub fn seed_device(&self, device: &Device) -> Result<()> {
        if !device.is_cpu() {
            device.set_seed(self.random_seed)?;
        }
        Ok(())
    }
}
