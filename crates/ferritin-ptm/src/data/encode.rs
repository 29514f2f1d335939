//! Fixed-length tensors for one split.
//!
//! Every record becomes a row of `seq_len` token ids plus, per target, a label row and a
//! sample-weight row of the same shape. A weight of 0 removes a position from the loss
//! and from every metric.
use super::labels::UniqueLabels;
use super::record::Record;
use super::tokenizer::{ProteinTokenizer, TokenLayout, TokenRow};
use crate::error::{PtmError, Result};
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// One output per label per position, trained jointly.
    Multilabel,
    /// An independent binary target per label.
    BinaryPerLabel,
}

/// Negative selection for binary targets.
#[derive(Debug, Clone)]
pub struct NegativeSampling {
    /// Negatives kept per positive in a record during training encoding.
    pub ratio: f64,
    pub seed: u64,
    /// Per label, the residues allowed as negatives. `None` allows every residue.
    pub allowed_residues: Option<Vec<BTreeSet<char>>>,
}

impl Default for NegativeSampling {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            seed: 0,
            allowed_residues: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub seq_len: usize,
    pub mode: TaskMode,
    /// Sequence-level targets instead of per-residue ones.
    pub short: bool,
    pub layout: TokenLayout,
    /// Keep every candidate negative.
    pub evaluate: bool,
    pub sampling: NegativeSampling,
}

impl EncodeOptions {
    pub fn new(seq_len: usize, mode: TaskMode, layout: TokenLayout) -> Self {
        Self {
            seq_len,
            mode,
            short: false,
            layout,
            evaluate: false,
            sampling: NegativeSampling::default(),
        }
    }

    pub fn evaluate(mut self, evaluate: bool) -> Self {
        self.evaluate = evaluate;
        self
    }

    pub fn short(mut self, short: bool) -> Self {
        self.short = short;
        self
    }

    pub fn sampling(mut self, sampling: NegativeSampling) -> Self {
        self.sampling = sampling;
        self
    }
}

/// Flat, row-major labels and weights sharing one shape. The first axis is the record.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTensor {
    pub shape: Vec<usize>,
    pub labels: Vec<f32>,
    pub weights: Vec<f32>,
}

impl LabelTensor {
    fn zeros(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self {
            shape,
            labels: vec![0.0; n],
            weights: vec![0.0; n],
        }
    }

    pub fn num_records(&self) -> usize {
        self.shape[0]
    }

    /// Elements per record.
    pub fn row_len(&self) -> usize {
        self.shape[1..].iter().product()
    }

    pub fn row_labels(&self, record: usize) -> &[f32] {
        let n = self.row_len();
        &self.labels[record * n..(record + 1) * n]
    }

    pub fn row_weights(&self, record: usize) -> &[f32] {
        let n = self.row_len();
        &self.weights[record * n..(record + 1) * n]
    }

    pub fn weight_sum(&self, record: usize) -> f32 {
        self.row_weights(record).iter().sum()
    }

    /// Labels and weights of the selected records, as `f32` tensors.
    pub fn select(&self, records: &[usize], device: &Device) -> Result<(Tensor, Tensor)> {
        let n = self.row_len();
        let mut labels = Vec::with_capacity(records.len() * n);
        let mut weights = Vec::with_capacity(records.len() * n);
        for &r in records {
            labels.extend_from_slice(self.row_labels(r));
            weights.extend_from_slice(self.row_weights(r));
        }
        let mut shape = self.shape.clone();
        shape[0] = records.len();
        Ok((
            Tensor::from_vec(labels, shape.as_slice(), device)?,
            Tensor::from_vec(weights, shape.as_slice(), device)?,
        ))
    }

    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        Ok((
            Tensor::from_slice(&self.labels, self.shape.as_slice(), device)?,
            Tensor::from_slice(&self.weights, self.shape.as_slice(), device)?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    Multilabel(LabelTensor),
    PerLabel(Vec<LabelTensor>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSplit {
    pub seq_len: usize,
    pub num_records: usize,
    pub layout: TokenLayout,
    pub short: bool,
    /// `(num_records, seq_len)`, row-major.
    pub token_ids: Vec<u32>,
    pub targets: Targets,
}

impl EncodedSplit {
    pub fn token_row(&self, record: usize) -> &[u32] {
        &self.token_ids[record * self.seq_len..(record + 1) * self.seq_len]
    }

    /// The joint target, or the target of one label in binary mode.
    pub fn target(&self, label_index: Option<usize>) -> Result<&LabelTensor> {
        match (&self.targets, label_index) {
            (Targets::Multilabel(t), None) => Ok(t),
            (Targets::PerLabel(ts), Some(i)) => ts.get(i).ok_or_else(|| {
                PtmError::Config(format!(
                    "label index {i} out of range for {} binary targets",
                    ts.len()
                ))
            }),
            (Targets::Multilabel(_), Some(_)) => Err(PtmError::Config(
                "a label index was given for a multilabel encoding".to_string(),
            )),
            (Targets::PerLabel(_), None) => Err(PtmError::Config(
                "binary encodings need a label index".to_string(),
            )),
        }
    }

    pub fn select_tokens(&self, records: &[usize], device: &Device) -> Result<Tensor> {
        let mut ids = Vec::with_capacity(records.len() * self.seq_len);
        for &r in records {
            ids.extend_from_slice(self.token_row(r));
        }
        Ok(Tensor::from_vec(ids, (records.len(), self.seq_len), device)?)
    }

    pub fn batch(
        &self,
        records: &[usize],
        label_index: Option<usize>,
        device: &Device,
    ) -> Result<Batch> {
        let (labels, weights) = self.target(label_index)?.select(records, device)?;
        Ok(Batch {
            tokens: self.select_tokens(records, device)?,
            labels,
            weights,
        })
    }
}

/// One mini-batch on the training device.
#[derive(Debug)]
pub struct Batch {
    pub tokens: Tensor,
    pub labels: Tensor,
    pub weights: Tensor,
}

pub fn encode_records(
    records: &[Record],
    labels: &UniqueLabels,
    tokenizer: &ProteinTokenizer,
    opts: &EncodeOptions,
) -> Result<EncodedSplit> {
    if opts.seq_len == 0 {
        return Err(PtmError::Config("seq_len must be positive".to_string()));
    }
    if let Some(allowed) = &opts.sampling.allowed_residues {
        if allowed.len() != labels.len() {
            return Err(PtmError::ShapeMismatch {
                expected: vec![labels.len()],
                actual: vec![allowed.len()],
            });
        }
    }

    let rows = tokenizer.encode_all(records.iter().map(|r| r.seq.as_str()), opts.seq_len, opts.layout)?;

    let targets = match (opts.mode, opts.short) {
        (TaskMode::Multilabel, false) => {
            Targets::Multilabel(multilabel_residues(records, &rows, labels, opts)?)
        }
        (TaskMode::Multilabel, true) => Targets::Multilabel(multilabel_sequences(records, labels)?),
        (TaskMode::BinaryPerLabel, false) => {
            Targets::PerLabel(binary_residues(records, &rows, labels, opts)?)
        }
        (TaskMode::BinaryPerLabel, true) => Targets::PerLabel(binary_sequences(records, labels)?),
    };

    Ok(EncodedSplit {
        seq_len: opts.seq_len,
        num_records: records.len(),
        layout: opts.layout,
        short: opts.short,
        token_ids: rows.into_iter().flat_map(|row| row.ids).collect(),
        targets,
    })
}

/// Training rows of annotation-free records keep weight 0 everywhere.
fn multilabel_residues(
    records: &[Record],
    rows: &[TokenRow],
    labels: &UniqueLabels,
    opts: &EncodeOptions,
) -> Result<LabelTensor> {
    let (seq_len, num_labels) = (opts.seq_len, labels.len());
    let mut out = LabelTensor::zeros(vec![records.len(), seq_len, num_labels]);
    for (r, (record, tokens)) in records.iter().zip(rows).enumerate() {
        let row = r * seq_len * num_labels;
        let (offset, kept) = (tokens.offset, tokens.residues);
        if opts.evaluate || !record.label.is_empty() {
            for pos in offset..offset + kept {
                out.weights[row + pos * num_labels..row + (pos + 1) * num_labels].fill(1.0);
            }
        }
        for annotation in record.label.iter() {
            let idx = labels.index_of(&annotation.ptm_type)?;
            if annotation.site < kept {
                out.labels[row + (offset + annotation.site) * num_labels + idx] = 1.0;
            }
        }
    }
    Ok(out)
}

fn multilabel_sequences(records: &[Record], labels: &UniqueLabels) -> Result<LabelTensor> {
    let num_labels = labels.len();
    let mut out = LabelTensor::zeros(vec![records.len(), num_labels]);
    out.weights.fill(1.0);
    for (r, record) in records.iter().enumerate() {
        for annotation in record.label.iter() {
            let idx = labels.index_of(&annotation.ptm_type)?;
            out.labels[r * num_labels + idx] = 1.0;
        }
    }
    Ok(out)
}

fn binary_residues(
    records: &[Record],
    rows: &[TokenRow],
    labels: &UniqueLabels,
    opts: &EncodeOptions,
) -> Result<Vec<LabelTensor>> {
    for annotation in records.iter().flat_map(|r| r.label.iter()) {
        labels.index_of(&annotation.ptm_type)?;
    }

    let seq_len = opts.seq_len;
    let mut rng = StdRng::seed_from_u64(opts.sampling.seed);
    let mut out = Vec::with_capacity(labels.len());

    for (idx, label) in labels.iter().enumerate() {
        let allowed = opts.sampling.allowed_residues.as_ref().map(|a| &a[idx]);
        let mut tensor = LabelTensor::zeros(vec![records.len(), seq_len]);
        for (r, (record, tokens)) in records.iter().zip(rows).enumerate() {
            let row = r * seq_len;
            let (offset, kept) = (tokens.offset, tokens.residues);
            let positives: BTreeSet<usize> =
                record.sites_of(label).filter(|&site| site < kept).collect();
            let candidates: Vec<usize> = (0..kept)
                .filter(|site| !positives.contains(site))
                .filter(|&site| match (allowed, record.residue(site)) {
                    (Some(allowed), Some(residue)) => {
                        allowed.contains(&residue.to_ascii_uppercase())
                    }
                    _ => true,
                })
                .collect();

            for &site in positives.iter() {
                tensor.labels[row + offset + site] = 1.0;
                tensor.weights[row + offset + site] = 1.0;
            }

            if opts.evaluate {
                for &site in candidates.iter() {
                    tensor.weights[row + offset + site] = 1.0;
                }
            } else {
                let wanted = (opts.sampling.ratio * positives.len() as f64).ceil() as usize;
                for &site in candidates.choose_multiple(&mut rng, wanted) {
                    tensor.weights[row + offset + site] = 1.0;
                }
            }
        }
        out.push(tensor);
    }
    Ok(out)
}

fn binary_sequences(records: &[Record], labels: &UniqueLabels) -> Result<Vec<LabelTensor>> {
    let joint = multilabel_sequences(records, labels)?;
    let num_labels = labels.len();
    Ok((0..num_labels)
        .map(|idx| LabelTensor {
            shape: vec![records.len()],
            labels: (0..records.len())
                .map(|r| joint.labels[r * num_labels + idx])
                .collect(),
            weights: vec![1.0; records.len()],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> ProteinTokenizer {
        ProteinTokenizer::amino_acids().unwrap()
    }

    #[test]
    fn test_multilabel_example() {
        let records = vec![Record::new("MAVST", &[(2, "phospho")])];
        let labels = UniqueLabels::new(["phospho", "acetyl"]);
        let opts = EncodeOptions::new(8, TaskMode::Multilabel, TokenLayout::ResiduesOnly);
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();

        assert_eq!(encoded.token_row(0).len(), 8);
        let target = encoded.target(None).unwrap();
        assert_eq!(target.shape, vec![1, 8, 2]);
        let phospho = labels.index_of("phospho").unwrap();
        let ones: Vec<usize> = target
            .row_labels(0)
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == 1.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(ones, vec![2 * 2 + phospho]);
        for pos in 0..8 {
            let w = &target.row_weights(0)[pos * 2..pos * 2 + 2];
            let expected = if pos < 5 { 1.0 } else { 0.0 };
            assert_eq!(w, &[expected, expected]);
        }
    }

    #[test]
    fn test_special_token_layout_shifts_targets() {
        let records = vec![Record::new("MAVST", &[(2, "phospho")])];
        let labels = UniqueLabels::new(["phospho"]);
        let opts = EncodeOptions::new(8, TaskMode::Multilabel, TokenLayout::WithSpecialTokens);
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        let target = encoded.target(None).unwrap();
        assert_eq!(target.row_labels(0)[3], 1.0);
        assert_eq!(target.row_weights(0), &[0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_truncated_sites_are_dropped() {
        let records = vec![Record::new("MAVSTKK", &[(1, "a"), (6, "a")])];
        let labels = UniqueLabels::new(["a"]);
        let opts = EncodeOptions::new(4, TaskMode::Multilabel, TokenLayout::ResiduesOnly);
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        let target = encoded.target(None).unwrap();
        assert_eq!(target.row_labels(0), &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(target.weight_sum(0), 4.0);
    }

    #[test]
    fn test_unannotated_record_has_no_training_weight() {
        let records = vec![Record::new("MSKTY", &[(1, "p")]), Record::new("MAAAA", &[])];
        let labels = UniqueLabels::new(["p"]);
        let opts = EncodeOptions::new(8, TaskMode::Multilabel, TokenLayout::ResiduesOnly);
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        let target = encoded.target(None).unwrap();
        assert_eq!(target.weight_sum(0), 5.0);
        assert_eq!(target.weight_sum(1), 0.0);

        let binary = EncodeOptions::new(8, TaskMode::BinaryPerLabel, TokenLayout::ResiduesOnly);
        let encoded = encode_records(&records, &labels, &tokenizer(), &binary).unwrap();
        assert_eq!(encoded.target(Some(0)).unwrap().weight_sum(1), 0.0);

        // evaluation still scores every residue
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts.evaluate(true)).unwrap();
        assert_eq!(encoded.target(None).unwrap().weight_sum(1), 5.0);
    }

    #[test]
    fn test_binary_sampling_ratio() {
        let records = vec![
            Record::new("MSSSSSSSSS", &[(1, "p"), (2, "p")]),
            Record::new("MAAAA", &[]),
        ];
        let labels = UniqueLabels::new(["p"]);
        let opts = EncodeOptions::new(12, TaskMode::BinaryPerLabel, TokenLayout::ResiduesOnly);
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        let target = encoded.target(Some(0)).unwrap();
        assert_eq!(target.shape, vec![2, 12]);
        // two positives and two sampled negatives
        assert_eq!(target.weight_sum(0), 4.0);
        assert_eq!(target.weight_sum(1), 0.0);
        assert!(encoded.target(None).is_err());
    }

    #[test]
    fn test_binary_sampling_is_seeded() {
        let records = vec![Record::new(&"S".repeat(40), &[(3, "p"), (9, "p")])];
        let labels = UniqueLabels::new(["p"]);
        let opts = EncodeOptions::new(40, TaskMode::BinaryPerLabel, TokenLayout::ResiduesOnly);
        let a = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        let b = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_binary_evaluate_keeps_all_candidates() {
        let records = vec![Record::new("MSKTS", &[(1, "p")])];
        let labels = UniqueLabels::new(["p"]);
        let sampling = NegativeSampling {
            allowed_residues: Some(vec![['S', 'T'].into_iter().collect()]),
            ..Default::default()
        };
        let opts = EncodeOptions::new(6, TaskMode::BinaryPerLabel, TokenLayout::ResiduesOnly)
            .sampling(sampling)
            .evaluate(true);
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        let target = encoded.target(Some(0)).unwrap();
        assert_eq!(target.row_weights(0), &[0.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
        assert_eq!(target.row_labels(0), &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_short_encoding() {
        let records = vec![
            Record::new("MSK", &[(1, "b")]),
            Record::new("MKK", &[]),
        ];
        let labels = UniqueLabels::new(["a", "b"]);
        let opts = EncodeOptions::new(5, TaskMode::Multilabel, TokenLayout::ResiduesOnly).short(true);
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        let target = encoded.target(None).unwrap();
        assert_eq!(target.shape, vec![2, 2]);
        assert_eq!(target.labels, vec![0.0, 1.0, 0.0, 0.0]);
        assert_eq!(target.weights, vec![1.0; 4]);

        let opts = EncodeOptions::new(5, TaskMode::BinaryPerLabel, TokenLayout::ResiduesOnly).short(true);
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        assert_eq!(encoded.target(Some(1)).unwrap().labels, vec![1.0, 0.0]);
    }

    #[test]
    fn test_unknown_label_is_an_error() {
        let records = vec![Record::new("MSK", &[(1, "b")])];
        let labels = UniqueLabels::new(["a"]);
        let opts = EncodeOptions::new(5, TaskMode::Multilabel, TokenLayout::ResiduesOnly);
        let err = encode_records(&records, &labels, &tokenizer(), &opts).unwrap_err();
        assert!(matches!(err, PtmError::UnknownLabel(_)));
    }

    #[test]
    fn test_batch_selection() {
        let records = vec![
            Record::new("MSK", &[(1, "a")]),
            Record::new("MKKS", &[(3, "a")]),
        ];
        let labels = UniqueLabels::new(["a"]);
        let opts = EncodeOptions::new(4, TaskMode::Multilabel, TokenLayout::ResiduesOnly);
        let encoded = encode_records(&records, &labels, &tokenizer(), &opts).unwrap();
        let batch = encoded.batch(&[1], None, &Device::Cpu).unwrap();
        assert_eq!(batch.tokens.dims(), &[1, 4]);
        assert_eq!(batch.labels.dims(), &[1, 4, 1]);
        let labels: Vec<f32> = batch.labels.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(labels, vec![0.0, 0.0, 0.0, 1.0]);
    }
}
