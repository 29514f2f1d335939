//! Resolve and load AMPLIFY checkpoints.
//!
//! Weights come either from the HuggingFace hub or from a local directory holding the
//! same three files the hub repositories publish.
use super::amplify::AMPLIFY;
use super::config::AMPLIFYConfig;
use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::path::{Path, PathBuf};

pub enum AmplifyModels {
    AMP120M,
    AMP350M,
}

impl AmplifyModels {
    pub fn get_model_files(model: Self) -> (&'static str, &'static str) {
        match model {
            AmplifyModels::AMP120M => ("chandar-lab/AMPLIFY_120M", "main"),
            AmplifyModels::AMP350M => ("chandar-lab/AMPLIFY_350M", "main"),
        }
    }
}

/// Where a pretrained checkpoint lives.
#[derive(Debug, Clone, PartialEq)]
pub enum PretrainedSource {
    Hub { repo: String, revision: String },
    Local(PathBuf),
}

impl PretrainedSource {
    /// An existing directory is read locally, anything else is treated as a hub repo id.
    pub fn parse(value: &str) -> Self {
        let path = Path::new(value);
        if path.is_dir() {
            PretrainedSource::Local(path.to_path_buf())
        } else {
            let (repo, revision) = match value.split_once('@') {
                Some((repo, rev)) => (repo.to_string(), rev.to_string()),
                None => (value.to_string(), "main".to_string()),
            };
            PretrainedSource::Hub { repo, revision }
        }
    }
}

impl Default for PretrainedSource {
    fn default() -> Self {
        let (repo, revision) = AmplifyModels::get_model_files(AmplifyModels::AMP120M);
        PretrainedSource::Hub {
            repo: repo.to_string(),
            revision: revision.to_string(),
        }
    }
}

/// The files making up one checkpoint.
#[derive(Debug, Clone)]
pub struct AmplifyWeights {
    pub config: AMPLIFYConfig,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl AmplifyWeights {
    pub fn resolve(source: &PretrainedSource) -> Result<Self> {
        let (config_filename, tokenizer, weights) = match source {
            PretrainedSource::Hub { repo, revision } => {
                log::info!("Fetching {repo}@{revision} from the hub");
                let repo = Repo::with_revision(repo.clone(), RepoType::Model, revision.clone());
                let api = Api::new()?.repo(repo);
                (
                    api.get("config.json")?,
                    api.get("tokenizer.json")?,
                    api.get("model.safetensors")?,
                )
            }
            PretrainedSource::Local(dir) => (
                dir.join("config.json"),
                dir.join("tokenizer.json"),
                dir.join("model.safetensors"),
            ),
        };
        let config_str = std::fs::read_to_string(&config_filename)
            .with_context(|| format!("reading {}", config_filename.display()))?;
        let config: AMPLIFYConfig = serde_json::from_str(&config_str)
            .with_context(|| format!("parsing {}", config_filename.display()))?;
        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    /// Build the encoder.
    ///
    /// Trainable weights are registered in the returned `VarMap`, then overwritten with
    /// the checkpoint values. A frozen encoder reads the checkpoint as constants and
    /// the returned `VarMap` is empty.
    pub fn load(&self, device: &Device, trainable: bool) -> Result<(AMPLIFY, VarMap)> {
        if trainable {
            let mut varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
            let model = AMPLIFY::load(vb, &self.config)?;
            varmap
                .load(&self.weights)
                .with_context(|| format!("loading weights {}", self.weights.display()))?;
            Ok((model, varmap))
        } else {
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[&self.weights], DType::F32, device)?
            };
            let model = AMPLIFY::load(vb, &self.config)?;
            Ok((model, VarMap::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source() {
        let tmp = tempfile::tempdir().unwrap();
        let local = PretrainedSource::parse(tmp.path().to_str().unwrap());
        assert_eq!(local, PretrainedSource::Local(tmp.path().to_path_buf()));

        let hub = PretrainedSource::parse("chandar-lab/AMPLIFY_350M@v1");
        assert_eq!(
            hub,
            PretrainedSource::Hub {
                repo: "chandar-lab/AMPLIFY_350M".into(),
                revision: "v1".into()
            }
        );
    }

    #[test]
    fn test_local_round_trip() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let config = AMPLIFYConfig {
            hidden_size: 8,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            intermediate_size: 12,
            max_length: 16,
            ..AMPLIFYConfig::default()
        };
        let config_json = format!(
            r#"{{"hidden_size": 8, "num_hidden_layers": 1, "num_attention_heads": 2,
                "intermediate_size": 12, "max_length": 16, "vocab_size": {}}}"#,
            config.vocab_size
        );
        std::fs::write(tmp.path().join("config.json"), config_json)?;

        // write a checkpoint from a freshly initialised encoder
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        AMPLIFY::load(vb, &config)?;
        varmap.save(tmp.path().join("model.safetensors"))?;

        let weights = AmplifyWeights::resolve(&PretrainedSource::Local(tmp.path().to_path_buf()))?;
        let (_, trainable) = weights.load(&Device::Cpu, true)?;
        assert_eq!(trainable.all_vars().len(), varmap.all_vars().len());
        let (_, frozen) = weights.load(&Device::Cpu, false)?;
        assert!(frozen.all_vars().is_empty());
        Ok(())
    }
}
