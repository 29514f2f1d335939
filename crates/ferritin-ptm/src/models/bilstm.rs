use candle_core::{Module, Result, Tensor};
use candle_nn::rnn::{self, Direction, LSTMConfig, RNN};
use candle_nn::VarBuilder;

/// Single-layer bidirectional LSTM returning the full sequence.
///
/// Output is `[batch, seq, 2 * hidden]`, forward states first. The backward LSTM reads
/// the time-reversed input and its states are flipped back so that position `t` of
/// both halves refers to the same token.
#[derive(Debug, Clone)]
pub struct BiLstm {
    forward: rnn::LSTM,
    backward: rnn::LSTM,
    hidden_size: usize,
}

impl BiLstm {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let forward = rnn::lstm(input_size, hidden_size, LSTMConfig::default(), vb.clone())?;
        let backward = rnn::lstm(
            input_size,
            hidden_size,
            LSTMConfig {
                direction: Direction::Backward,
                ..Default::default()
            },
            vb,
        )?;
        Ok(Self {
            forward,
            backward,
            hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn output_size(&self) -> usize {
        2 * self.hidden_size
    }
}

fn reverse_time(xs: &Tensor) -> Result<Tensor> {
    let seq_len = xs.dim(1)?;
    let index: Vec<u32> = (0..seq_len as u32).rev().collect();
    let index = Tensor::new(index.as_slice(), xs.device())?;
    xs.index_select(&index, 1)
}

impl Module for BiLstm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let states = self.forward.seq(xs)?;
        let forward = self.forward.states_to_tensor(&states)?;

        let states = self.backward.seq(&reverse_time(xs)?)?;
        let backward = reverse_time(&self.backward.states_to_tensor(&states)?)?;

        Tensor::cat(&[forward, backward], 2)
    }
}
