use crate::candle_loss_functions::{gaussian_log_density, standard_normal_log_density};
use crate::candle_model_traits::{DecoderModuleT, EncoderModuleT};
use crate::candle_samplers::reparameterize;

use candle_core::{Result, Tensor};

/// Single-sample Monte Carlo ELBO for each row of `x_nd`, given the
/// standard normal noise `eps_nk` used for reparameterization
///
/// elbo(i) = log p(x(i) | z(i)) + log p(z(i)) - log q(z(i) | x(i))
/// z(i) = mu(x(i)) + sigma(x(i)) * eps(i)
///
/// # Arguments
/// * `encoder` - amortized q(z|x)
/// * `decoder` - p(x|z)
/// * `x_nd` - data (n x d)
/// * `eps_nk` - noise (n x k)
/// * `llik` - fn (observed, logits) -> log-likelihood (n)
///
/// # Returns `elbo_n`
pub fn elbo_with_noise<Enc, Dec, LlikFn>(
    encoder: &Enc,
    decoder: &Dec,
    x_nd: &Tensor,
    eps_nk: &Tensor,
    llik: &LlikFn,
) -> Result<Tensor>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
    LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    let (z_mean_nk, z_ln_std_nk) = encoder.latent_gaussian_params(x_nd)?;
    let z_nk = reparameterize(&z_mean_nk, &z_ln_std_nk, eps_nk)?;

    let (_, llik_n) = decoder.forward_with_llik(&z_nk, x_nd, llik)?;
    let log_joint_n = (llik_n + standard_normal_log_density(&z_nk)?)?;
    let log_q_n = gaussian_log_density(&z_mean_nk, &z_ln_std_nk, &z_nk)?;

    log_joint_n - log_q_n
}

/// Batch ELBO estimate: the average of single-sample ELBOs across rows
pub fn elbo<Enc, Dec, LlikFn>(
    encoder: &Enc,
    decoder: &Dec,
    x_nd: &Tensor,
    llik: &LlikFn,
) -> Result<Tensor>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
    LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    let (n, _) = x_nd.dims2()?;
    let eps_nk = Tensor::randn(0f32, 1f32, (n, encoder.dim_latent()), x_nd.device())?
        .to_dtype(x_nd.dtype())?;
    elbo_with_noise(encoder, decoder, x_nd, &eps_nk, llik)?.mean_all()
}

/// Negative batch ELBO (scalar), the loss to minimize
pub fn vae_loss<Enc, Dec, LlikFn>(
    encoder: &Enc,
    decoder: &Dec,
    x_nd: &Tensor,
    llik: &LlikFn,
) -> Result<Tensor>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
    LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    elbo(encoder, decoder, x_nd, llik)?.neg()
}
