use crate::cli::RunArgs;
use anyhow::{Context, Result};
use ferritin_plms::PretrainedSource;
use ferritin_ptm::config::task_mode;
use ferritin_ptm::{ModelKind, PathsConfig, RunConfig};

fn log_filter(tflog: u8) -> &'static str {
    match tflog {
        0 => "debug",
        1 => "info",
        2 => "warn",
        _ => "error",
    }
}

pub fn execute(args: RunArgs) -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(args.tflog)),
    )
    .init();

    let paths = PathsConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let mut cfg = RunConfig::new(paths);
    cfg.model = ModelKind::from_name(&args.model);
    cfg.seq_len = args.seq_len;
    cfg.batch_size = args.batch_size;
    cfg.num_epochs = args.num_epochs;
    cfg.learning_rate = args.learning_rate;
    cfg.random_seed = args.random_seed;
    cfg.mode = task_mode(args.binary, args.multilabel)?;
    cfg.short = args.short;
    cfg.class_weights = args.class_weights;
    cfg.spec_neg_sam = args.spec_neg_sam;
    cfg.neg_ratio = args.neg_ratio;
    cfg.freeze_pretrained = args.freeze_pretrained;
    if let Some(pretrained) = &args.pretrained {
        cfg.pretrained = PretrainedSource::parse(pretrained);
    }
    cfg.label_order = args.label_order;
    cfg.warm_start = args.warm_start;
    cfg.cpu = args.cpu;
    cfg.save_model = args.save_model;

    log::info!(
        "Training {} ({:?}) on {}",
        cfg.model,
        cfg.mode,
        cfg.paths.path_data.display()
    );
    let report = ferritin_ptm::run(&cfg).context("PTM training run failed")?;
    print!("{report}");
    Ok(())
}
