use candle_core::{Device, Result, Tensor, D};

/// Precompute the rotary table as `(max_len, head_dim / 2, 2)` holding `[cos, sin]`.
pub fn precompute_freqs_cis(head_dim: usize, max_len: usize) -> Result<Tensor> {
    let theta: f32 = 10000.0;
    let freqs = (0..head_dim / 2).map(|i| 1.0 / theta.powf((2 * i) as f32 / head_dim as f32));
    let freqs = Tensor::from_iter(freqs, &Device::Cpu)?;
    let t = Tensor::from_iter((0..max_len).map(|x| x as f32), &Device::Cpu)?;
    let freqs = t.unsqueeze(1)?.matmul(&freqs.unsqueeze(0)?)?;
    Tensor::stack(&[freqs.cos()?, freqs.sin()?], D::Minus1)
}

/// Rotate query and key, both `[batch, seq_len, heads, head_dim]`, treating adjacent
/// channel pairs as complex numbers.
pub fn apply_rotary_emb(xq: &Tensor, xk: &Tensor, freqs_cis: &Tensor) -> Result<(Tensor, Tensor)> {
    let (_, seq_len, _, head_dim) = xq.dims4()?;
    let half = head_dim / 2;
    let freqs_cis = freqs_cis.narrow(0, 0, seq_len)?;
    let cos = freqs_cis.narrow(2, 0, 1)?.reshape((1, seq_len, 1, half))?;
    let sin = freqs_cis.narrow(2, 1, 1)?.reshape((1, seq_len, 1, half))?;

    let rotate = |x: &Tensor| -> Result<Tensor> {
        let (b, l, h, d) = x.dims4()?;
        let x = x.reshape((b, l, h, d / 2, 2))?;
        let real = x.narrow(4, 0, 1)?.squeeze(4)?;
        let imag = x.narrow(4, 1, 1)?.squeeze(4)?;
        let out_real = (real.broadcast_mul(&cos)? - imag.broadcast_mul(&sin)?)?;
        let out_imag = (real.broadcast_mul(&sin)? + imag.broadcast_mul(&cos)?)?;
        Tensor::stack(&[out_real, out_imag], 4)?.reshape((b, l, h, d))
    };

    Ok((rotate(xq)?, rotate(xk)?))
}
