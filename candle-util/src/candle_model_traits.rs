use candle_core::{Result, Tensor};

pub trait EncoderModuleT {
    /// Evaluate the variational Gaussian parameters of the latent code
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    ///
    /// # Returns `(z_mean_nk, z_ln_std_nk)`
    /// * `z_mean_nk` - mean of q(z|x) (n x k)
    /// * `z_ln_std_nk` - log standard deviation of q(z|x) (n x k)
    fn latent_gaussian_params(&self, x_nd: &Tensor) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction probabilities (n x d)
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor>;

    /// Reconstruction on the logit scale (n x d), finite everywhere
    fn forward_logits(&self, z_nk: &Tensor) -> Result<Tensor>;

    /// A decoder that spits out reconstruction and log-likelihood
    /// * `z_nk` - latent states
    /// * `x_nd` - observed data to validate with
    /// * `llik` - fn (observed, logits) -> log-likelihood
    fn forward_with_llik<LlikFn>(
        &self,
        z_nk: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
    ) -> Result<(Tensor, Tensor)>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
