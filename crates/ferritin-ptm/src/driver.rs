//! The end-to-end pipeline: load splits, encode, build, train, evaluate.
use crate::config::{PathsConfig, RunConfig};
use crate::data::{
    get_class_weights, get_unique_labels, label_residues, positive_counts, Dataset, EncodedSplit,
    NegativeSampling, ProteinTokenizer, TaskMode, TokenLayout, UniqueLabels,
};
use crate::error::{PtmError, Result};
use crate::metrics::LabelMetrics;
use crate::models::{
    FinetuneModel, ModelKind, OutputKind, OutputSpec, PretrainedEncoder, PtmModel,
    RecurrentModel,
};
use crate::train::{TrainHistory, Trainer};
use candle_core::Device;
use itertools::Itertools;
use std::fmt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

/// Order in which binary per-label rounds run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LabelOrder {
    /// Most training positives first; ties keep label order.
    #[default]
    ByFrequency,
    /// Label order.
    AsListed,
}

/// Whether binary per-label rounds share model weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum WarmStart {
    /// A freshly built model for every label.
    #[default]
    Reset,
    /// One model trained label after label.
    Carry,
}

/// Label indices in training order.
pub fn training_order(counts: &[usize], order: LabelOrder) -> Vec<usize> {
    match order {
        LabelOrder::AsListed => (0..counts.len()).collect(),
        LabelOrder::ByFrequency => (0..counts.len())
            .sorted_by(|&a, &b| counts[b].cmp(&counts[a]))
            .collect(),
    }
}

/// Train, validation and test splits.
pub struct Splits {
    pub train: Dataset,
    pub val: Dataset,
    pub test: Dataset,
}

impl Splits {
    pub fn load(paths: &PathsConfig) -> Result<Self> {
        Ok(Self {
            train: Dataset::load("train", paths.split_file("train"))?,
            val: Dataset::load("val", paths.split_file("val"))?,
            test: Dataset::load("test", paths.split_file("test"))?,
        })
    }

    pub fn all(&self) -> [&Dataset; 3] {
        [&self.train, &self.val, &self.test]
    }
}

/// Builds a fresh model for every training round.
pub trait ModelBuilder {
    /// The vocabulary the built models expect.
    fn tokenizer(&self) -> &ProteinTokenizer;

    fn layout(&self) -> TokenLayout;

    /// A model for `spec`, checked against the first record of `primer`.
    fn build(&mut self, spec: OutputSpec, primer: &EncodedSplit) -> Result<Box<dyn PtmModel>>;
}

pub struct RecurrentBuilder {
    tokenizer: ProteinTokenizer,
    device: Device,
}

impl RecurrentBuilder {
    pub fn new(device: &Device) -> Result<Self> {
        Ok(Self {
            tokenizer: ProteinTokenizer::amino_acids()?,
            device: device.clone(),
        })
    }
}

impl ModelBuilder for RecurrentBuilder {
    fn tokenizer(&self) -> &ProteinTokenizer {
        &self.tokenizer
    }

    fn layout(&self) -> TokenLayout {
        TokenLayout::ResiduesOnly
    }

    fn build(&mut self, spec: OutputSpec, primer: &EncodedSplit) -> Result<Box<dyn PtmModel>> {
        let model = RecurrentModel::new(
            self.tokenizer.len(),
            self.tokenizer.pad_token_id(),
            spec,
            &self.device,
        )?;
        model.check_output_shape(&primer.select_tokens(&[0], &self.device)?)?;
        Ok(Box::new(model))
    }
}

/// Fine-tuning models over a pretrained encoder.
///
/// The encoder loaded to read its vocabulary is used by the first build; later builds
/// reload the checkpoint.
pub struct PretrainedBuilder<E: PretrainedEncoder> {
    source: E::Source,
    freeze: bool,
    device: Device,
    tokenizer: ProteinTokenizer,
    layout: TokenLayout,
    loaded: Option<(E, candle_nn::VarMap)>,
}

impl<E: PretrainedEncoder> PretrainedBuilder<E> {
    pub fn new(source: E::Source, device: &Device, freeze: bool) -> Result<Self> {
        let (encoder, varmap) = E::load(&source, device, freeze)?;
        Ok(Self {
            tokenizer: encoder.tokenizer().clone(),
            layout: encoder.token_layout(),
            source,
            freeze,
            device: device.clone(),
            loaded: Some((encoder, varmap)),
        })
    }
}

impl<E: PretrainedEncoder + 'static> ModelBuilder for PretrainedBuilder<E> {
    fn tokenizer(&self) -> &ProteinTokenizer {
        &self.tokenizer
    }

    fn layout(&self) -> TokenLayout {
        self.layout
    }

    fn build(&mut self, spec: OutputSpec, primer: &EncodedSplit) -> Result<Box<dyn PtmModel>> {
        let (encoder, varmap) = match self.loaded.take() {
            Some(loaded) => loaded,
            None => E::load(&self.source, &self.device, self.freeze)?,
        };
        let model = FinetuneModel::build(encoder, varmap, spec, &self.device)?;
        model.prime(primer, &self.device)?;
        Ok(Box::new(model))
    }
}

/// Metrics of every label plus the training history of every round.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub labels: UniqueLabels,
    /// In label order.
    pub metrics: Vec<LabelMetrics>,
    /// `(label, history)` per round; the label is `None` for the joint multilabel round.
    pub histories: Vec<(Option<String>, TrainHistory)>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in self.metrics.iter() {
            writeln!(f, "{m}")?;
        }
        Ok(())
    }
}

/// `model.safetensors` becomes `model_<label>.safetensors`.
fn label_checkpoint(path: &Path, label: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let safe: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    path.with_file_name(format!("{stem}_{safe}{ext}"))
}

fn save(model: &dyn PtmModel, path: &Path) -> Result<()> {
    log::info!("Saving {} model weights to {}", model.name(), path.display());
    model.varmap().save(path)?;
    Ok(())
}

/// Run the whole pipeline from the paths in `cfg`.
pub fn run(cfg: &RunConfig) -> Result<RunReport> {
    cfg.validate()?;
    let device = ferritin_plms::device(cfg.cpu)?;
    cfg.seed_device(&device)?;
    let mut splits = Splits::load(&cfg.paths)?;
    match cfg.model {
        ModelKind::ProteinBert => {
            let mut builder = PretrainedBuilder::<crate::models::AmplifyEncoder>::new(
                cfg.pretrained.clone(),
                &device,
                cfg.freeze_pretrained,
            )?;
            run_with_builder(cfg, &mut splits, &mut builder, &device)
        }
        ModelKind::Recurrent => {
            let mut builder = RecurrentBuilder::new(&device)?;
            run_with_builder(cfg, &mut splits, &mut builder, &device)
        }
    }
}

/// Encode the loaded splits and run the training rounds with models from `builder`.
pub fn run_with_builder(
    cfg: &RunConfig,
    splits: &mut Splits,
    builder: &mut dyn ModelBuilder,
    device: &Device,
) -> Result<RunReport> {
    cfg.validate()?;
    let labels = get_unique_labels(&splits.all());
    if labels.is_empty() {
        return Err(PtmError::Config(
            "no PTM labels found in any split".to_string(),
        ));
    }
    log::info!("{} labels: {}", labels.len(), labels.iter().join(", "));

    let class_weights = cfg
        .class_weights
        .then(|| get_class_weights(&splits.all(), &labels));
    if let Some(weights) = &class_weights {
        log::info!("Class weights: {:?}", weights.to_map(&labels));
    }
    let sampling = NegativeSampling {
        ratio: cfg.neg_ratio,
        seed: cfg.random_seed,
        allowed_residues: cfg
            .spec_neg_sam
            .then(|| label_residues(&splits.all(), &labels)),
    };

    let layout = builder.layout();
    let tokenizer = builder.tokenizer().clone();
    splits.train.encode(
        &tokenizer,
        &labels,
        &cfg.encode_options(layout, false, sampling.clone()),
    )?;
    splits.val.encode(
        &tokenizer,
        &labels,
        &cfg.encode_options(layout, true, sampling.clone()),
    )?;
    splits.test.encode(
        &tokenizer,
        &labels,
        &cfg.encode_options(layout, true, sampling),
    )?;
    let (train, val, test) = (
        splits.train.encoded()?,
        splits.val.encoded()?,
        splits.test.encoded()?,
    );

    let mut trainer =
        Trainer::new(device.clone(), cfg.train_options()).with_class_weights(class_weights);

    match cfg.mode {
        TaskMode::Multilabel => {
            let spec = OutputSpec::new(OutputKind::Multilabel, !cfg.short, labels.as_slice());
            let model = builder.build(spec, train)?;
            let history = trainer.train(model.as_ref(), train, val, None)?;
            log::info!("------------------ evaluate ------------------");
            let evaluation = trainer.eval(model.as_ref(), test, &labels, None)?;
            if let Some(path) = &cfg.save_model {
                save(model.as_ref(), path)?;
            }
            Ok(RunReport {
                labels,
                metrics: evaluation.metrics,
                histories: vec![(None, history)],
            })
        }
        TaskMode::BinaryPerLabel => {
            let counts = positive_counts(&splits.train, &labels);
            let order = training_order(&counts, cfg.label_order);
            let spec = OutputSpec::new(OutputKind::Binary, !cfg.short, labels.as_slice());

            let mut model: Option<Box<dyn PtmModel>> = None;
            let mut metrics: Vec<Option<LabelMetrics>> = vec![None; labels.len()];
            let mut histories = Vec::with_capacity(labels.len());
            for (round, &idx) in order.iter().enumerate() {
                let label = &labels[idx];
                log::info!(
                    "Label {}/{}: {} ({} training positives)",
                    round + 1,
                    labels.len(),
                    label,
                    counts[idx]
                );
                let current = match model.take() {
                    Some(m) if cfg.warm_start == WarmStart::Carry => m,
                    _ => builder.build(spec.clone(), train)?,
                };
                let history = trainer.train(current.as_ref(), train, val, Some(idx))?;
                let mut evaluation = trainer.eval(current.as_ref(), test, &labels, Some(idx))?;
                if let Some(path) = &cfg.save_model {
                    save(current.as_ref(), &label_checkpoint(path, label))?;
                }
                metrics[idx] = evaluation.metrics.pop();
                histories.push((Some(label.to_string()), history));
                model = Some(current);
            }
            Ok(RunReport {
                labels,
                metrics: metrics.into_iter().flatten().collect(),
                histories,
            })
        }
    }
}
