use candle_core::{Result, Tensor};

/// ln(2π)
const LN_2PI: f64 = 1.8378770664093453;

/// Diagonal Gaussian log-density, elementwise
///
/// log N(x; μ, σ²) = -0.5 * ((x - μ)/σ)^2 - ln(σ) - 0.5 * ln(2π)
///
/// * `mean` - mean μ (broadcast against `x`)
/// * `ln_std` - log standard deviation ln(σ) (broadcast against `x`)
/// * `x` - where to evaluate
///
pub fn gaussian_log_pdf(mean: &Tensor, ln_std: &Tensor, x: &Tensor) -> Result<Tensor> {
    let std = ln_std.exp()?;
    let zsq = x.broadcast_sub(mean)?.broadcast_div(&std)?.sqr()?;
    ((zsq * -0.5)?.broadcast_sub(ln_std)? - 0.5 * LN_2PI)
}

/// Diagonal Gaussian log-density summed over the last (feature) axis
///
/// llik(i) = sum_k log N(x(i,k); μ(i,k), σ(i,k)²)
///
/// A vector `x` of length `k` gives a scalar; an `n x k` batch gives `n`
/// values, one per row.
///
pub fn gaussian_log_density(mean: &Tensor, ln_std: &Tensor, x: &Tensor) -> Result<Tensor> {
    let log_pdf = gaussian_log_pdf(mean, ln_std, x)?;
    log_pdf.sum(log_pdf.rank() - 1)
}

/// Standard normal log-density, `N(0, I)`, summed over the last axis
pub fn standard_normal_log_density(z: &Tensor) -> Result<Tensor> {
    let zeros = z.zeros_like()?;
    gaussian_log_density(&zeros, &zeros, z)
}

/// Bernoulli log-density parameterized by logits, elementwise
///
/// log p(x | logit) = -log(1 + exp(-b * logit)),  b = 2x - 1
///
/// evaluated as `-softplus(-b * logit)` where
/// softplus(u) = max(u, 0) + log(1 + exp(-|u|))
///
/// * `logit_mean` - logit of the success probability
/// * `x` - binary data in {0, 1}
///
pub fn bernoulli_log_pdf(logit_mean: &Tensor, x: &Tensor) -> Result<Tensor> {
    let b = x.affine(2.0, -1.0)?;
    let u = logit_mean.broadcast_mul(&b)?.neg()?;
    let log1p_exp = (u.abs()?.neg()?.exp()? + 1.0)?.log()?;
    (u.relu()? + log1p_exp)?.neg()
}

/// Bernoulli log-density summed over the last (feature) axis
///
/// llik(i) = sum_w log p(x(i,w) | logit(i,w))
///
pub fn bernoulli_log_density(logit_mean: &Tensor, x: &Tensor) -> Result<Tensor> {
    let log_pdf = bernoulli_log_pdf(logit_mean, x)?;
    log_pdf.sum(log_pdf.rank() - 1)
}

/// Convert probabilities to logits, `log(p / (1 - p))`
///
/// `p` is clamped to `[eps, 1 - eps]` first so that saturated
/// probabilities still give finite logits.
///
pub fn prob_to_logit(p: &Tensor, eps: f64) -> Result<Tensor> {
    let p = p.clamp(eps, 1.0 - eps)?;
    let one_minus_p = p.affine(-1.0, 1.0)?;
    p.log()? - one_minus_p.log()?
}
