use candle_core::{Result, Tensor};

///
/// z = mu + sigma * eps
/// where sigma = exp(ln_std)
///
/// # Arguments
/// * `mean` - mean of Gaussian distribution
/// * `ln_std` - log standard deviation of Gaussian distribution
/// * `eps` - standard normal noise, same shape as the output
pub fn reparameterize(mean: &Tensor, ln_std: &Tensor, eps: &Tensor) -> Result<Tensor> {
    mean.broadcast_add(&eps.broadcast_mul(&ln_std.exp()?)?)
}

/// Draw one reparameterized sample per entry of `mean`
///
/// z = mu + exp(ln_std) * eps, eps ~ N(0, 1)
pub fn sample_diag_gaussian(mean: &Tensor, ln_std: &Tensor) -> Result<Tensor> {
    let eps = Tensor::randn_like(mean, 0., 1.)?;
    reparameterize(mean, ln_std, &eps)
}

/// Independent coin flips, one per entry of `prob`
///
/// x = 1 if u < p else 0, u ~ U(0, 1)
pub fn sample_bernoulli(prob: &Tensor) -> Result<Tensor> {
    let u = Tensor::rand_like(prob, 0., 1.)?;
    u.lt(prob)?.to_dtype(prob.dtype())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn tiny_std_returns_mean() -> Result<()> {
        let dev = Device::Cpu;
        let mean = Tensor::new(&[[1.5f32, -2.0], [0.25, 3.0]], &dev)?;

        let ln_std = Tensor::full(-1e4f32, (2, 2), &dev)?;
        let z = sample_diag_gaussian(&mean, &ln_std)?;
        assert_eq!(z.to_vec2::<f32>()?, mean.to_vec2::<f32>()?);

        let ln_std = Tensor::full(f32::NEG_INFINITY, (2, 2), &dev)?;
        let z = sample_diag_gaussian(&mean, &ln_std)?;
        assert_eq!(z.to_vec2::<f32>()?, mean.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn gaussian_sample_moments() -> Result<()> {
        let dev = Device::Cpu;
        let n = 20_000;
        let mean = Tensor::full(2f32, (n, 1), &dev)?;
        let ln_std = Tensor::full(0.5f32.ln(), (n, 1), &dev)?;

        let z = sample_diag_gaussian(&mean, &ln_std)?;
        let m = z.mean_all()?.to_scalar::<f32>()?;
        let v = (z - 2.0)?.sqr()?.mean_all()?.to_scalar::<f32>()?;
        assert!((m - 2.0).abs() < 0.05, "mean {}", m);
        assert!((v - 0.25).abs() < 0.05, "var {}", v);
        Ok(())
    }

    #[test]
    fn bernoulli_sample_is_binary() -> Result<()> {
        let dev = Device::Cpu;
        let prob = Tensor::new(&[[0f32, 1., 0.5], [0., 1., 0.5]], &dev)?;
        let x = sample_bernoulli(&prob)?.to_vec2::<f32>()?;
        for row in x.iter() {
            assert_eq!(row[0], 0.0);
            assert_eq!(row[1], 1.0);
            assert!(row[2] == 0.0 || row[2] == 1.0);
        }
        Ok(())
    }
}
