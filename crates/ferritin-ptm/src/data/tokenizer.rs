//! A residue-level protein tokenizer.
//!
//! Wraps a `tokenizers::Tokenizer` whose vocabulary has one token per amino acid plus the
//! special tokens `<pad>`, `<unk>`, `<bos>` and `<eos>`. The built-in vocabulary is
//! embedded in the crate; pretrained checkpoints ship their own `tokenizer.json`.
//! Truncation, padding and the `<bos> ... <eos>` template are all left to the wrapped
//! tokenizer.
use crate::error::{PtmError, Result};
use std::path::Path;
use tokenizers::processors::template::TemplateProcessing;
use tokenizers::{
    PaddingParams, PaddingStrategy, PostProcessor, PostProcessorWrapper, Tokenizer,
    TruncationParams,
};

/// How residues are placed in the fixed-length token row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLayout {
    /// `<bos> residues <eos> <pad>...`, as pretrained encoders expect.
    WithSpecialTokens,
    /// `residues <pad>...`
    ResiduesOnly,
}

impl TokenLayout {
    fn add_special_tokens(&self) -> bool {
        matches!(self, TokenLayout::WithSpecialTokens)
    }
}

/// One encoded sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRow {
    /// Exactly `seq_len` ids.
    pub ids: Vec<u32>,
    /// Token position of residue 0.
    pub offset: usize,
    /// Residues that survived truncation.
    pub residues: usize,
}

#[derive(Clone)]
pub struct ProteinTokenizer {
    tokenizer: Tokenizer,
    pad_token_id: u32,
    bos_token_id: u32,
    eos_token_id: u32,
    unk_token_id: u32,
}

impl ProteinTokenizer {
    /// The embedded amino-acid vocabulary.
    pub fn amino_acids() -> Result<Self> {
        let tokenizer_bytes = include_bytes!("amino_acids.tokenizer.json");
        let tokenizer =
            Tokenizer::from_bytes(tokenizer_bytes).map_err(|e| PtmError::Tokenizer(e.to_string()))?;
        Self::from_tokenizer(tokenizer)
    }

    pub fn from_file<P: AsRef<Path>>(tokenizer_path: P) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| PtmError::Tokenizer(format!("Failed to load tokenizer: {}", e)))?;
        Self::from_tokenizer(tokenizer)
    }

    fn from_tokenizer(mut tokenizer: Tokenizer) -> Result<Self> {
        let special = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| PtmError::Tokenizer(format!("Missing {token} token")))
        };
        let pad_token_id = special("<pad>")?;
        let bos_token_id = special("<bos>")?;
        let eos_token_id = special("<eos>")?;
        let unk_token_id = special("<unk>")?;

        // vocabularies without a post-processor get the encoder's `<bos> $A <eos>` template
        if tokenizer.get_post_processor().is_none() {
            let template = TemplateProcessing::builder()
                .try_single("<bos> $A <eos>")
                .map_err(PtmError::Tokenizer)?
                .special_tokens(vec![("<bos>", bos_token_id), ("<eos>", eos_token_id)])
                .build()
                .map_err(|e| PtmError::Tokenizer(e.to_string()))?;
            tokenizer.with_post_processor(Some(template));
        }

        Ok(Self {
            tokenizer,
            pad_token_id,
            bos_token_id,
            eos_token_id,
            unk_token_id,
        })
    }

    pub fn len(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    pub fn bos_token_id(&self) -> u32 {
        self.bos_token_id
    }

    pub fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    pub fn unk_token_id(&self) -> u32 {
        self.unk_token_id
    }

    pub fn residue_id(&self, residue: char) -> u32 {
        let mut buf = [0u8; 4];
        let token = residue.to_ascii_uppercase().encode_utf8(&mut buf);
        self.tokenizer
            .token_to_id(token)
            .unwrap_or(self.unk_token_id)
    }

    pub fn id_to_token(&self, id: u32) -> String {
        self.tokenizer
            .id_to_token(id)
            .unwrap_or_else(|| "<unk>".to_string())
    }

    /// A copy of the tokenizer that truncates and pads every row to `seq_len` tokens.
    fn fixed_length(&self, seq_len: usize, layout: TokenLayout) -> Result<Tokenizer> {
        let mut tokenizer = self.tokenizer.clone();
        if !layout.add_special_tokens() {
            tokenizer.with_post_processor(None::<PostProcessorWrapper>);
        }
        let added = tokenizer
            .get_post_processor()
            .map_or(0, |processor| processor.added_tokens(false));
        if seq_len < added {
            return Err(PtmError::Config(format!(
                "seq_len {seq_len} cannot hold the {added} special tokens of this layout"
            )));
        }
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: seq_len,
                ..Default::default()
            }))
            .map_err(|e| PtmError::Tokenizer(e.to_string()))?
            .with_padding(Some(PaddingParams {
                strategy: PaddingStrategy::Fixed(seq_len),
                pad_id: self.pad_token_id,
                pad_token: self.id_to_token(self.pad_token_id),
                ..Default::default()
            }));
        Ok(tokenizer)
    }

    fn encode_with(tokenizer: &Tokenizer, seq: &str, layout: TokenLayout) -> Result<TokenRow> {
        // one pre-tokenized word per residue
        let residues: Vec<String> = seq
            .chars()
            .map(|c| c.to_ascii_uppercase().to_string())
            .collect();
        let encoding = tokenizer
            .encode(residues, layout.add_special_tokens())
            .map_err(|e| PtmError::Tokenizer(e.to_string()))?;
        let mask = encoding.get_special_tokens_mask();
        Ok(TokenRow {
            offset: mask.iter().position(|&m| m == 0).unwrap_or(0),
            residues: mask.iter().filter(|&&m| m == 0).count(),
            ids: encoding.get_ids().to_vec(),
        })
    }

    /// Token row for `seq`, truncated and padded to exactly `seq_len`.
    pub fn encode(&self, seq: &str, seq_len: usize, layout: TokenLayout) -> Result<TokenRow> {
        let tokenizer = self.fixed_length(seq_len, layout)?;
        Self::encode_with(&tokenizer, seq, layout)
    }

    /// Token rows for many sequences sharing one `seq_len`.
    pub fn encode_all<'a, I>(&self, seqs: I, seq_len: usize, layout: TokenLayout) -> Result<Vec<TokenRow>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tokenizer = self.fixed_length(seq_len, layout)?;
        seqs.into_iter()
            .map(|seq| Self::encode_with(&tokenizer, seq, layout))
            .collect()
    }
}
