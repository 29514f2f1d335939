pub mod dataset;
pub mod encode;
pub mod labels;
pub mod record;
pub mod tokenizer;

pub use dataset::Dataset;
pub use encode::{
    encode_records, Batch, EncodeOptions, EncodedSplit, LabelTensor, NegativeSampling, TaskMode,
    Targets,
};
pub use labels::{
    get_class_weights, get_unique_labels, label_residues, positive_counts, ClassWeights,
    UniqueLabels,
};
pub use record::{load_records, parse_records, Annotation, Record};
pub use tokenizer::{ProteinTokenizer, TokenLayout, TokenRow};
