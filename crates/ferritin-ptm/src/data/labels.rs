//! Label bookkeeping shared by every split.
use super::dataset::Dataset;
use crate::error::{PtmError, Result};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Index;

/// The global, ordered label set.
///
/// Built once from all splits and passed to every encoder so that label index `i`
/// names the same PTM in train, validation and test tensors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueLabels(Vec<String>);

impl UniqueLabels {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = labels.into_iter().map(Into::into).collect();
        Self(set.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Result<usize> {
        self.0
            .binary_search_by(|l| l.as_str().cmp(label))
            .map_err(|_| PtmError::UnknownLabel(label.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl Index<usize> for UniqueLabels {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.0[index]
    }
}

/// Union of label names over all splits, sorted.
pub fn get_unique_labels(splits: &[&Dataset]) -> UniqueLabels {
    UniqueLabels::new(
        splits
            .iter()
            .flat_map(|d| d.records())
            .flat_map(|r| r.label.iter().map(|a| a.ptm_type.clone())),
    )
}

/// Positive positions per label in one split, in label order.
///
/// A site annotated twice with the same label is one positive.
pub fn positive_counts(split: &Dataset, labels: &UniqueLabels) -> Vec<usize> {
    let counts = split
        .records()
        .iter()
        .flat_map(|r| r.label.iter().unique_by(|a| (a.site, a.ptm_type.clone())))
        .counts_by(|a| a.ptm_type.as_str());
    labels
        .iter()
        .map(|l| counts.get(l).copied().unwrap_or(0))
        .collect()
}

/// Inverse-frequency class weights over all splits combined.
///
/// `weight(label) = total residue positions / positive sites of label`. A label without
/// any site gets the weight of a single occurrence.
pub fn get_class_weights(splits: &[&Dataset], labels: &UniqueLabels) -> ClassWeights {
    let total_positions: usize = splits
        .iter()
        .flat_map(|d| d.records())
        .map(|r| r.len())
        .sum();
    let mut positives = vec![0usize; labels.len()];
    for split in splits {
        for (count, n) in positives.iter_mut().zip(positive_counts(split, labels)) {
            *count += n;
        }
    }
    let weights = positives
        .iter()
        .map(|&n| total_positions as f32 / n.max(1) as f32)
        .collect();
    ClassWeights(weights)
}

/// Per-label loss multiplier for positive positions, in label order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassWeights(Vec<f32>);

impl ClassWeights {
    pub fn uniform(num_labels: usize) -> Self {
        Self(vec![1.0; num_labels])
    }

    pub fn get(&self, label_index: usize) -> f32 {
        self.0[label_index]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn to_map(&self, labels: &UniqueLabels) -> BTreeMap<String, f32> {
        labels
            .iter()
            .zip(self.0.iter())
            .map(|(l, w)| (l.to_string(), *w))
            .collect()
    }
}

/// Amino acids observed at the sites of each label, over all splits.
///
/// Restricts negative candidates to residues that can carry the modification.
pub fn label_residues(splits: &[&Dataset], labels: &UniqueLabels) -> Vec<BTreeSet<char>> {
    let mut residues = vec![BTreeSet::new(); labels.len()];
    for record in splits.iter().flat_map(|d| d.records()) {
        for annotation in record.label.iter() {
            if let (Ok(idx), Some(residue)) = (
                labels.index_of(&annotation.ptm_type),
                record.residue(annotation.site),
            ) {
                residues[idx].insert(residue.to_ascii_uppercase());
            }
        }
    }
    residues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::Record;

    fn splits() -> (Dataset, Dataset, Dataset) {
        let train = Dataset::from_records(
            "train",
            vec![
                Record::new("MSKTY", &[(1, "Phospho"), (2, "Acetyl")]),
                Record::new("MSSAK", &[(2, "Phospho")]),
            ],
        );
        let val = Dataset::from_records("val", vec![Record::new("MTK", &[(1, "Phospho")])]);
        let test = Dataset::from_records("test", vec![Record::new("MKY", &[(2, "Nitro")])]);
        (train, val, test)
    }

    #[test]
    fn test_unique_labels_sorted_and_stable() {
        let (train, val, test) = splits();
        let a = get_unique_labels(&[&train, &val, &test]);
        let b = get_unique_labels(&[&test, &val, &train]);
        assert_eq!(a, b);
        assert_eq!(a.as_slice(), &["Acetyl", "Nitro", "Phospho"]);
        assert_eq!(a.index_of("Phospho").unwrap(), 2);
        assert!(a.index_of("Glyco").is_err());
    }

    #[test]
    fn test_positive_counts() {
        let (train, val, test) = splits();
        let labels = get_unique_labels(&[&train, &val, &test]);
        assert_eq!(positive_counts(&train, &labels), vec![1, 0, 2]);
    }

    #[test]
    fn test_class_weights_inverse_frequency() {
        let records: Vec<Record> = (0..10)
            .map(|i| {
                let mut labels = vec![(0, "Common")];
                if i == 0 {
                    labels.push((1, "Rare"));
                }
                Record::new(&"A".repeat(100), &labels)
            })
            .collect();
        let data = Dataset::from_records("all", records);
        let labels = get_unique_labels(&[&data]);
        let weights = get_class_weights(&[&data], &labels);
        // 1000 positions, 10 common sites, 1 rare site
        assert!((weights.get(labels.index_of("Common").unwrap()) - 100.0).abs() < 1e-3);
        assert!((weights.get(labels.index_of("Rare").unwrap()) - 1000.0).abs() < 1e-3);
        assert!(weights.get(1) > weights.get(0));
    }

    #[test]
    fn test_duplicate_annotations_count_once() {
        let data = Dataset::from_records(
            "dup",
            vec![Record::new(
                &"A".repeat(10),
                &[(1, "Phospho"), (1, "Phospho"), (1, "Acetyl"), (4, "Phospho")],
            )],
        );
        let labels = get_unique_labels(&[&data]);
        assert_eq!(positive_counts(&data, &labels), vec![1, 2]);
        let weights = get_class_weights(&[&data], &labels);
        assert!((weights.get(labels.index_of("Phospho").unwrap()) - 5.0).abs() < 1e-6);
        assert!((weights.get(labels.index_of("Acetyl").unwrap()) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_label_residues() {
        let (train, val, test) = splits();
        let labels = get_unique_labels(&[&train, &val, &test]);
        let residues = label_residues(&[&train, &val, &test], &labels);
        let phospho = &residues[labels.index_of("Phospho").unwrap()];
        assert_eq!(phospho.iter().collect::<String>(), "ST");
        assert_eq!(residues[labels.index_of("Acetyl").unwrap()].len(), 1);
    }
}
