use super::commands;
use clap::{Args, Parser};
use ferritin_ptm::{LabelOrder, WarmStart};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML file with `path_data` and `path_pred`
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// `proteinbert` fine-tunes the pretrained encoder, anything else trains the recurrent model
    #[arg(long, default_value = "proteinbert")]
    pub model: String,

    #[arg(long = "seq_len", default_value_t = 512)]
    pub seq_len: usize,

    #[arg(long = "batch_size", default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long = "num_epochs", default_value_t = 10)]
    pub num_epochs: usize,

    #[arg(long = "learning_rate", default_value_t = 1e-3)]
    pub learning_rate: f64,

    #[arg(long = "random_seed", default_value_t = 0)]
    pub random_seed: u64,

    /// One binary model per label
    #[arg(long)]
    pub binary: bool,

    /// One model over all labels (the default)
    #[arg(long)]
    pub multilabel: bool,

    /// Predict one label vector per sequence instead of per residue
    #[arg(long)]
    pub short: bool,

    /// Scale positive terms of the loss by inverse label frequency
    #[arg(long = "class_weights")]
    pub class_weights: bool,

    /// Draw binary negatives only from residues seen carrying the label
    #[arg(long = "spec_neg_sam")]
    pub spec_neg_sam: bool,

    /// Log verbosity: 0 debug, 1 info, 2 warnings, 3 errors only
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub tflog: u8,

    /// Negatives sampled per positive for binary training
    #[arg(long = "neg_ratio", default_value_t = 1.0)]
    pub neg_ratio: f64,

    /// Keep the pretrained encoder fixed and train only the head
    #[arg(long = "freeze_pretrained")]
    pub freeze_pretrained: bool,

    /// HuggingFace repo id (optionally `repo@revision`) or a local checkpoint directory
    #[arg(long)]
    pub pretrained: Option<String>,

    /// `by_frequency` or `as_listed`
    #[arg(long = "label_order", default_value_t = LabelOrder::ByFrequency)]
    pub label_order: LabelOrder,

    /// `reset` or `carry`
    #[arg(long = "warm_start", default_value_t = WarmStart::Reset)]
    pub warm_start: WarmStart,

    /// Run on the CPU even when an accelerator is available
    #[arg(long)]
    pub cpu: bool,

    /// Write the fine-tuned weights to this safetensors file
    #[arg(long = "save_model")]
    pub save_model: Option<PathBuf>,
}

impl Cli {
    pub fn execute(self) -> anyhow::Result<()> {
        commands::run::execute(self.run)
    }
}
