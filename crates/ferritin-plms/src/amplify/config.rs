use serde::Deserialize;

/// Hyperparameters of an AMPLIFY checkpoint.
///
/// Field names follow the `config.json` published alongside the weights on the hub,
/// so the file deserializes directly. Keys the encoder does not use are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AMPLIFYConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub dropout_prob: f64,
    pub embedding_init_range: f64,
    pub decoder_init_range: f64,
    pub rms_norm: bool,
    pub norm_eps: f64,
    pub hidden_act: String,
    pub layer_norm_after_embedding: bool,
    pub layer_norm_before_last_layer: bool,
    pub vocab_size: usize,
    pub ffn_bias: bool,
    pub att_bias: bool,
    pub pad_token_id: usize,
    pub max_length: usize,
}

impl Default for AMPLIFYConfig {
    /// AMPLIFY 350M
    fn default() -> Self {
        Self {
            hidden_size: 960,
            num_hidden_layers: 32,
            num_attention_heads: 15,
            intermediate_size: 3840,
            dropout_prob: 0.0,
            embedding_init_range: 0.02,
            decoder_init_range: 0.02,
            rms_norm: true,
            norm_eps: 1e-5,
            hidden_act: "swiglu".to_string(),
            layer_norm_after_embedding: false,
            layer_norm_before_last_layer: true,
            vocab_size: 27,
            ffn_bias: false,
            att_bias: false,
            pad_token_id: 0,
            max_length: 2048,
        }
    }
}

impl AMPLIFYConfig {
    pub fn amp_120m() -> Self {
        Self {
            hidden_size: 640,
            num_hidden_layers: 24,
            num_attention_heads: 10,
            intermediate_size: 2560,
            ..Self::default()
        }
    }
    pub fn amp_350m() -> Self {
        Self::default()
    }
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
    /// SwiGLU keeps parameter count constant by shrinking the hidden units to 2/3,
    /// rounded up to a multiple of 8.
    pub fn swiglu_hidden_size(&self) -> usize {
        let multiple_of = 8;
        let intermediate_size = (self.intermediate_size * 2) / 3;
        multiple_of * intermediate_size.div_ceil(multiple_of)
    }
}
