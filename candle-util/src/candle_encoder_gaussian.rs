use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Feed-forward encoder for a diagonal Gaussian q(z|x)
///
/// x -> [linear -> tanh]+ -> linear(2k) -> (mean, ln_std)
pub struct GaussianEncoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    z_params: Linear,
}

impl EncoderModuleT for GaussianEncoder {
    fn latent_gaussian_params(&self, x_nd: &Tensor) -> Result<(Tensor, Tensor)> {
        let h_nl = self.fc.forward(x_nd)?;
        let params_n2k = self.z_params.forward(&h_nl)?;
        let last = params_n2k.rank() - 1;
        let z_mean_nk = params_n2k.narrow(last, 0, self.n_latent)?;
        let z_ln_std_nk = params_n2k.narrow(last, self.n_latent, self.n_latent)?;
        Ok((z_mean_nk, z_ln_std_nk))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl GaussianEncoder {
    /// Will create a new Gaussian encoder module
    /// with these variables:
    ///
    /// * `nn.enc.fc.{}.weight` where {} is the layer index
    /// * `nn.enc.z.weight` (mean and log-std stacked)
    ///
    /// # Arguments
    /// * `n_features` - the number of features (pixels)
    /// * `n_latent` - the latent dimension
    /// * `layers` - hidden layers, each with the dim
    /// * `vs` - variable builder
    pub fn new(n_features: usize, n_latent: usize, layers: &[usize], vs: VarBuilder) -> Result<Self> {
        debug_assert!(!layers.is_empty());

        // (1) data -> fc
        let (fc, prev_dim) = fc_stack(n_features, layers, LayerActivation::Tanh, "nn.enc.fc", vs.clone())?;

        // (2) fc -> 2K
        let z_params = candle_nn::linear(prev_dim, 2 * n_latent, vs.pp("nn.enc.z"))?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            z_params,
        })
    }
}
