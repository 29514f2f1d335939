//! Raw PTM records as stored in the `PTM_*.json` split files.
use crate::error::{PtmError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One modified site: 0-based residue index and the PTM label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AnnotationRepr")]
pub struct Annotation {
    pub site: usize,
    pub ptm_type: String,
}

/// Annotations are written either as objects or as `[site, label]` pairs.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnnotationRepr {
    Object {
        #[serde(alias = "position", alias = "pos")]
        site: usize,
        #[serde(alias = "label", alias = "ptm")]
        ptm_type: String,
    },
    Pair(usize, String),
}

impl From<AnnotationRepr> for Annotation {
    fn from(repr: AnnotationRepr) -> Self {
        match repr {
            AnnotationRepr::Object { site, ptm_type } | AnnotationRepr::Pair(site, ptm_type) => {
                Annotation { site, ptm_type }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(alias = "sequence")]
    pub seq: String,
    #[serde(default, alias = "labels")]
    pub label: Vec<Annotation>,
}

impl Record {
    pub fn new(seq: &str, label: &[(usize, &str)]) -> Self {
        Self {
            uid: None,
            seq: seq.to_string(),
            label: label
                .iter()
                .map(|(site, ptm_type)| Annotation {
                    site: *site,
                    ptm_type: ptm_type.to_string(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Residue letter at `site`, if the site lies inside the sequence.
    pub fn residue(&self, site: usize) -> Option<char> {
        self.seq.as_bytes().get(site).map(|b| *b as char)
    }

    /// Sites carrying `ptm_type`.
    pub fn sites_of<'a>(&'a self, ptm_type: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.label
            .iter()
            .filter(move |a| a.ptm_type == ptm_type)
            .map(|a| a.site)
    }

    fn validate(&self, source_name: &str, index: usize) -> Result<()> {
        if !self.seq.is_ascii() {
            return Err(PtmError::data_format(
                source_name,
                format!("record {index}: sequence contains non-ASCII characters"),
            ));
        }
        if let Some(bad) = self.label.iter().find(|a| a.site >= self.seq.len()) {
            return Err(PtmError::data_format(
                source_name,
                format!(
                    "record {index}: site {} ({}) is outside a sequence of length {}",
                    bad.site,
                    bad.ptm_type,
                    self.seq.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Parse a JSON array of records.
pub fn parse_records(source_name: &str, raw: &str) -> Result<Vec<Record>> {
    let records: Vec<Record> = serde_json::from_str(raw)
        .map_err(|e| PtmError::data_format(source_name, e.to_string()))?;
    for (i, record) in records.iter().enumerate() {
        record.validate(source_name, i)?;
    }
    Ok(records)
}

pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    parse_records(&path.display().to_string(), &raw)
}
