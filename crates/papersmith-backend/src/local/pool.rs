use anyhow::{ensure, Result};
use candle_core::{DType, Tensor};

/// Mean over unmasked tokens followed by L2 normalization:
/// `[B, T, H]` hidden states and a `[B, T]` mask give `[B, H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let dims = hidden.dims();
    ensure!(dims.len() == 3, "hidden shape must be [B,T,H], got {:?}", dims);
    let (batch, hidden_dim) = (dims[0], dims[2]);

    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let mask_3d = mask.unsqueeze(2)?;
    let mask_broadcast = mask_3d.broadcast_as(hidden.shape())?;
    let masked = (hidden * &mask_broadcast)?;
    let sum = masked.sum(1)?;
    let lengths = mask.sum(1)?.unsqueeze(1)?.to_dtype(sum.dtype())?;
    let mean = sum.broadcast_div(&lengths)?;
    let eps_val = match hidden.dtype() {
        DType::F16 => 1e-6f32,
        _ => 1e-12f32,
    };
    let eps = Tensor::new(&[eps_val], hidden.device())?.to_dtype(hidden.dtype())?.unsqueeze(0)?;
    let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
    let out = mean.broadcast_div(&norm)?;
    ensure!(out.dims() == [batch, hidden_dim], "pooled shape {:?}", out.dims());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn masked_tokens_do_not_contribute() {
        let dev = Device::Cpu;
        // Two tokens with hidden dim 4; second token is masked out.
        let h = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], (1, 2, 4), &dev).unwrap();
        let mask = Tensor::from_slice(&[1u32, 0u32], (1, 2), &dev).unwrap();
        let out: Vec<Vec<f32>> = masked_mean_l2(&h, &mask).unwrap().to_vec2().unwrap();
        let norm = 30.0f32.sqrt();
        for (a, b) in out[0].iter().zip([1.0 / norm, 2.0 / norm, 3.0 / norm, 4.0 / norm]) {
            assert!((a - b).abs() < 1e-5, "a={} b={}", a, b);
        }
    }

    #[test]
    fn rejects_rank_two_input() {
        let dev = Device::Cpu;
        let h = Tensor::zeros((2, 4), DType::F32, &dev).unwrap();
        let mask = Tensor::ones((2, 4), DType::F32, &dev).unwrap();
        assert!(masked_mean_l2(&h, &mask).is_err());
    }
}
