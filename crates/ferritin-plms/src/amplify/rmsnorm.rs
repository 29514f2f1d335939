use candle_core::{Module, Result, Tensor, D};
use candle_nn::VarBuilder;

/// RMSNorm built from primitive tensor ops so gradients flow through it when
/// the backbone is fine-tuned.
#[derive(Debug, Clone)]
pub struct RMSNorm {
    weight: Tensor,
    eps: f64,
}

impl RMSNorm {
    pub fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(dim, "weight", candle_nn::Init::Const(1.0))?;
        Ok(Self { weight, eps })
    }
}

impl Module for RMSNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let variance = x.sqr()?.mean_keepdim(D::Minus1)?;
        let denom = (variance + self.eps)?.sqrt()?;
        x.broadcast_div(&denom)?.broadcast_mul(&self.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_unit_rms() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = RMSNorm::new(4, 1e-6, vb.pp("norm"))?;
        let x = Tensor::new(&[[2f32, -2., 2., -2.]], &Device::Cpu)?;
        let out: Vec<Vec<f32>> = norm.forward(&x)?.to_vec2()?;
        for v in out[0].iter() {
            assert!((v.abs() - 1.0).abs() < 1e-4);
        }
        Ok(())
    }
}
