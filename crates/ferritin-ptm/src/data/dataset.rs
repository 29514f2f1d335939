use super::encode::{encode_records, EncodeOptions, EncodedSplit};
use super::labels::UniqueLabels;
use super::record::{load_records, Record};
use super::tokenizer::ProteinTokenizer;
use crate::error::{PtmError, Result};
use std::path::Path;

/// One data split: its raw records and, once encoded, its tensors.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    records: Vec<Record>,
    encoded: Option<EncodedSplit>,
}

impl Dataset {
    pub fn from_records(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
            encoded: None,
        }
    }

    pub fn load<P: AsRef<Path>>(name: impl Into<String>, path: P) -> Result<Self> {
        let name = name.into();
        let records = load_records(path.as_ref())?;
        log::info!(
            "Loaded {} records for split `{}` from {}",
            records.len(),
            name,
            path.as_ref().display()
        );
        Ok(Self::from_records(name, records))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Encode the split, replacing any previous encoding.
    pub fn encode(
        &mut self,
        tokenizer: &ProteinTokenizer,
        labels: &UniqueLabels,
        opts: &EncodeOptions,
    ) -> Result<&EncodedSplit> {
        if self.records.is_empty() {
            return Err(PtmError::EmptyDataset(self.name.clone()));
        }
        let encoded = encode_records(&self.records, labels, tokenizer, opts)?;
        log::debug!(
            "Encoded split `{}`: {} records x {} tokens ({:?}, evaluate={})",
            self.name,
            encoded.num_records,
            encoded.seq_len,
            opts.mode,
            opts.evaluate
        );
        Ok(&*self.encoded.insert(encoded))
    }

    pub fn encoded(&self) -> Result<&EncodedSplit> {
        self.encoded
            .as_ref()
            .ok_or_else(|| PtmError::NotEncoded(self.name.clone()))
    }
}
