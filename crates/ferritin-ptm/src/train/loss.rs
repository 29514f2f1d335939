//! Masked, sample-weighted binary cross-entropy on logits.
//!
//! ```text
//! l_i = max(x_i, 0) - x_i * y_i + log(1 + exp(-|x_i|))
//! L   = sum(w_i * s_i * l_i) / sum(w_i)
//! ```
//!
//! `w` is the sample-weight mask and `s_i = 1 + y_i * (c - 1)` scales positives by the
//! class weight `c` of their label.
use candle_core::{Result, Tensor};

/// Element-wise loss, same shape as `logits`.
pub fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let relu = logits.relu()?;
    let log_term = (logits.abs()?.neg()?.exp()? + 1.0)?.log()?;
    ((relu - (logits * targets)?)? + log_term)
}

/// Mean loss over weighted positions, or `None` when every weight is 0.
///
/// `pos_weight` broadcasts against the last axis of `targets` (one value per label) or
/// is a scalar tensor in binary mode.
pub fn masked_bce_with_logits(
    logits: &Tensor,
    targets: &Tensor,
    weights: &Tensor,
    pos_weight: Option<&Tensor>,
) -> Result<Option<Tensor>> {
    let weight_sum = weights.sum_all()?.to_scalar::<f32>()?;
    if weight_sum <= 0.0 {
        return Ok(None);
    }
    let mut loss = bce_with_logits(logits, targets)?;
    if let Some(pos_weight) = pos_weight {
        let scale = (targets.broadcast_mul(&(pos_weight - 1.0)?)? + 1.0)?;
        loss = (loss * scale)?;
    }
    let total = (loss * weights)?.sum_all()?;
    Ok(Some((total / weight_sum as f64)?))
}
