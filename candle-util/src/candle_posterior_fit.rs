//! Non-amortized variational inference of one latent code.
//!
//! Fit q(z) = N(μ, σ²I) to p(z | x_obs) for a single partially observed
//! data point by plain gradient descent on a K-sample Monte Carlo ELBO,
//!
//! ```text
//! ELBO ≈ 1/K Σ_s [ log p(x_obs | z_s) + log p(z_s) - log q(z_s) ],
//! z_s = μ + σ ε_s,  ε_s ~ N(0, I)
//! ```
//!
//! The decoder is held fixed; only `(μ, ln σ)` move.

use crate::candle_loss_functions::{
    bernoulli_log_density, gaussian_log_density, standard_normal_log_density,
};
use crate::candle_model_traits::DecoderModuleT;
use crate::candle_samplers::sample_diag_gaussian;

use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{Optimizer, SGD};
use log::info;

/// Configuration of the posterior fitting loop.
#[derive(Debug, Clone)]
pub struct PosteriorFitConfig {
    /// Number of gradient steps
    pub num_iters: usize,
    /// Step size of gradient descent
    pub learning_rate: f64,
    /// Number of Monte Carlo samples K per step
    pub num_samples: usize,
    /// Log the loss every this many iterations
    pub report_interval: usize,
    /// Starting mean; zeros if `None`
    pub init_mean: Option<Vec<f32>>,
    /// Starting log standard deviation (shared by all dimensions)
    pub init_ln_std: f32,
}

impl Default for PosteriorFitConfig {
    fn default() -> Self {
        Self {
            num_iters: 200,
            learning_rate: 0.01,
            num_samples: 10,
            report_interval: 10,
            init_mean: None,
            init_ln_std: 0.0,
        }
    }
}

/// Gaussian variational distribution q(z) = N(μ, σ²I)
///
/// Parameters are stored as mean μ and log standard deviation ln(σ),
/// each of shape (1, k).
pub struct GaussianVar {
    mean: Var,
    ln_std: Var,
}

impl GaussianVar {
    pub fn new(init_mean: &[f32], init_ln_std: f32, device: &Device) -> Result<Self> {
        let k = init_mean.len();
        let mean = Var::from_tensor(&Tensor::from_slice(init_mean, (1, k), device)?)?;
        let ln_std = Var::from_tensor(&Tensor::full(init_ln_std, (1, k), device)?)?;
        Ok(Self { mean, ln_std })
    }

    /// Variational mean μ: (1, k)
    pub fn mean(&self) -> &Tensor {
        self.mean.as_tensor()
    }

    /// Log standard deviation ln(σ): (1, k)
    pub fn ln_std(&self) -> &Tensor {
        self.ln_std.as_tensor()
    }

    pub fn dim(&self) -> usize {
        self.mean.dims()[1]
    }

    /// Draw `num_samples` reparameterized samples: (S, k)
    pub fn sample(&self, num_samples: usize) -> Result<Tensor> {
        let shape = (num_samples, self.dim());
        let mean = self.mean.broadcast_as(shape)?;
        let ln_std = self.ln_std.broadcast_as(shape)?;
        sample_diag_gaussian(&mean, &ln_std)
    }

    /// log q(z) for each row of `z_sk`
    pub fn log_prob(&self, z_sk: &Tensor) -> Result<Tensor> {
        gaussian_log_density(self.mean(), self.ln_std(), z_sk)
    }

    fn vars(&self) -> Vec<Var> {
        vec![self.mean.clone(), self.ln_std.clone()]
    }

    /// Detached copies of `(mean, ln_std)`
    pub fn params(&self) -> (Tensor, Tensor) {
        (self.mean.as_detached_tensor(), self.ln_std.as_detached_tensor())
    }
}

/// Fitted variational posterior with the loss (negative ELBO) trace
pub struct FittedPosterior {
    pub posterior: GaussianVar,
    pub loss_trace: Vec<f32>,
}

/// Monte Carlo ELBO of `q` against the decoder's joint density on `x_obs`
///
/// # Arguments
/// * `decoder` - fixed p(x|z)
/// * `x_obs` - observed part of one data point (1 x d_obs)
/// * `q` - variational distribution
/// * `llik` - fn (observed, logits) -> log-likelihood per sample
/// * `num_samples` - K
pub fn posterior_elbo<Dec, LlikFn>(
    decoder: &Dec,
    x_obs: &Tensor,
    q: &GaussianVar,
    llik: &LlikFn,
    num_samples: usize,
) -> Result<Tensor>
where
    Dec: DecoderModuleT,
    LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    let z_sk = q.sample(num_samples)?;
    let log_joint_s = log_joint(decoder, x_obs, &z_sk, llik)?;
    let log_q_s = q.log_prob(&z_sk)?;
    (log_joint_s - log_q_s)?.mean_all()
}

/// Unnormalized log posterior, log p(x_obs | z) + log p(z), per row of `z_sk`
pub fn log_joint<Dec, LlikFn>(
    decoder: &Dec,
    x_obs: &Tensor,
    z_sk: &Tensor,
    llik: &LlikFn,
) -> Result<Tensor>
where
    Dec: DecoderModuleT,
    LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    let (_, llik_s) = decoder.forward_with_llik(z_sk, x_obs, llik)?;
    llik_s + standard_normal_log_density(z_sk)?
}

/// Likelihood of the first `n_obs` pixels only
///
/// Returns a closure usable as `llik` that compares the leading `n_obs`
/// decoded logits with the observed pixels (broadcast across samples).
pub fn top_half_llik(n_obs: usize) -> impl Fn(&Tensor, &Tensor) -> Result<Tensor> {
    move |x_obs: &Tensor, logit_sd: &Tensor| {
        let last = logit_sd.rank() - 1;
        let logit_obs = logit_sd.narrow(last, 0, n_obs)?;
        bernoulli_log_density(&logit_obs, x_obs)
    }
}

/// Fit q(z) for one partially observed data point
///
/// # Arguments
/// * `decoder` - trained decoder (held fixed)
/// * `x_obs` - observed pixels (1 x d_obs)
/// * `llik` - fn (observed, logits) -> log-likelihood per sample
/// * `config` - iterations, step size, K, initial values
pub fn fit_variational_dist<Dec, LlikFn>(
    decoder: &Dec,
    x_obs: &Tensor,
    llik: &LlikFn,
    config: &PosteriorFitConfig,
) -> anyhow::Result<FittedPosterior>
where
    Dec: DecoderModuleT,
    LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    let k = decoder.dim_latent();
    let init_mean = match config.init_mean.as_ref() {
        Some(m) if m.len() != k => {
            return Err(anyhow::anyhow!(
                "initial mean has {} elements, latent dim is {}",
                m.len(),
                k
            ));
        }
        Some(m) => m.clone(),
        None => vec![0f32; k],
    };

    let x_obs = x_obs.to_dtype(DType::F32)?;
    let q = GaussianVar::new(&init_mean, config.init_ln_std, x_obs.device())?;
    let mut sgd = SGD::new(q.vars(), config.learning_rate)?;
    let report_interval = config.report_interval.max(1);

    let mut loss_trace = Vec::with_capacity(config.num_iters);

    for iter in 0..config.num_iters {
        let loss = posterior_elbo(decoder, &x_obs, &q, llik, config.num_samples)?.neg()?;
        sgd.backward_step(&loss)?;

        let loss_val = loss.to_scalar::<f32>()?;
        loss_trace.push(loss_val);

        if iter % report_interval == 0 || iter + 1 == config.num_iters {
            info!("iter {:4}: loss = {:10.4}", iter, loss_val);
        }
    }

    Ok(FittedPosterior {
        posterior: q,
        loss_trace,
    })
}

/// Fill in the unobserved pixels of one data point
///
/// Draws z ~ q, decodes it, and keeps the observed leading pixels,
/// returning observed ⊕ decoded-rest (1 x d), entries in [0, 1].
pub fn complete_image<Dec>(decoder: &Dec, x_obs: &Tensor, q: &GaussianVar) -> Result<Tensor>
where
    Dec: DecoderModuleT,
{
    let (n, n_obs) = x_obs.dims2()?;
    let d = decoder.dim_obs();
    if n != 1 {
        candle_core::bail!("expected one observed row, got {}", n);
    }
    if n_obs > d {
        candle_core::bail!("{} observed pixels exceed the decoder's {}", n_obs, d);
    }
    let z_1k = q.sample(1)?.detach();
    let recon_1d = decoder.forward(&z_1k)?;
    let rest = recon_1d.narrow(1, n_obs, d - n_obs)?;
    Tensor::cat(&[&x_obs.to_dtype(rest.dtype())?, &rest], 1)
}

/// Regular grid of 2-d points spanning `[lb, ub]²`, (steps², 2) row-major
pub fn latent_grid(lb: f32, ub: f32, steps: usize, device: &Device) -> Result<Tensor> {
    if steps < 2 {
        candle_core::bail!("need at least 2 grid steps, got {}", steps);
    }
    let delta = (ub - lb) / (steps - 1) as f32;
    let mut points = Vec::with_capacity(steps * steps * 2);
    for i in 0..steps {
        for j in 0..steps {
            points.push(lb + delta * i as f32);
            points.push(lb + delta * j as f32);
        }
    }
    Tensor::from_vec(points, (steps * steps, 2), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_decoder_bernoulli::BernoulliDecoder;
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn complete_image_has_full_length() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let d = 784;
        let n_obs = d / 2;
        let decoder = BernoulliDecoder::new(d, 2, &[32], vb)?;

        let x_obs = Tensor::rand(0f32, 1f32, (1, n_obs), &dev)?.ge(0.7)?.to_dtype(DType::F32)?;

        let config = PosteriorFitConfig {
            num_iters: 20,
            init_mean: Some(vec![2.0, -2.0]),
            ..Default::default()
        };
        let fitted = fit_variational_dist(&decoder, &x_obs, &top_half_llik(n_obs), &config)?;
        assert_eq!(fitted.loss_trace.len(), 20);
        assert!(fitted.loss_trace.iter().all(|v| v.is_finite()));

        let (mean, ln_std) = fitted.posterior.params();
        assert_eq!(mean.dims(), &[1, 2]);
        assert_eq!(ln_std.dims(), &[1, 2]);

        let image = complete_image(&decoder, &x_obs, &fitted.posterior)?;
        assert_eq!(image.dims(), &[1, d]);

        let image = image.flatten_all()?.to_vec1::<f32>()?;
        assert!(image.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(&image[..n_obs], &x_obs.flatten_all()?.to_vec1::<f32>()?[..]);
        Ok(())
    }

    #[test]
    fn fitting_moves_parameters() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let decoder = BernoulliDecoder::new(8, 2, &[4], vb)?;
        let x_obs = Tensor::new(&[[1f32, 1., 0., 0.]], &dev)?;

        let config = PosteriorFitConfig {
            num_iters: 5,
            ..Default::default()
        };
        let fitted = fit_variational_dist(&decoder, &x_obs, &top_half_llik(4), &config)?;
        let (mean, _) = fitted.posterior.params();
        assert!(mean.abs()?.sum_all()?.to_scalar::<f32>()? > 0.0);
        Ok(())
    }

    #[test]
    fn wrong_initial_mean_is_rejected() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let decoder = BernoulliDecoder::new(8, 2, &[4], vb)?;
        let x_obs = Tensor::new(&[[1f32, 1., 0., 0.]], &dev)?;

        let config = PosteriorFitConfig {
            init_mean: Some(vec![0.0; 3]),
            ..Default::default()
        };
        assert!(fit_variational_dist(&decoder, &x_obs, &top_half_llik(4), &config).is_err());
        Ok(())
    }

    #[test]
    fn grid_covers_corners() -> Result<()> {
        let grid = latent_grid(-2.0, 2.0, 5, &Device::Cpu)?;
        assert_eq!(grid.dims(), &[25, 2]);
        let rows = grid.to_vec2::<f32>()?;
        assert_eq!(rows[0], vec![-2.0, -2.0]);
        assert_eq!(rows[24], vec![2.0, 2.0]);

        assert!(latent_grid(-2.0, 2.0, 1, &Device::Cpu).is_err());
        assert!(latent_grid(-2.0, 2.0, 0, &Device::Cpu).is_err());
        Ok(())
    }

    #[test]
    fn complete_image_rejects_mismatched_input() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let decoder = BernoulliDecoder::new(8, 2, &[4], vb)?;
        let q = GaussianVar::new(&[0.0, 0.0], 0.0, &dev)?;

        // more observed pixels than the decoder produces
        let too_wide = Tensor::ones((1, 10), DType::F32, &dev)?;
        assert!(complete_image(&decoder, &too_wide, &q).is_err());

        // more than one row
        let two_rows = Tensor::ones((2, 4), DType::F32, &dev)?;
        assert!(complete_image(&decoder, &two_rows, &q).is_err());

        let top = Tensor::ones((1, 4), DType::F32, &dev)?;
        assert_eq!(complete_image(&decoder, &top, &q)?.dims(), &[1, 8]);
        Ok(())
    }
}
