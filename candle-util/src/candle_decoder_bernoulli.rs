use crate::candle_aux_layers::*;
use crate::candle_loss_functions::prob_to_logit;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{ops, Linear, Module, VarBuilder};

/// Keep decoded probabilities inside `[PROB_EPS, 1 - PROB_EPS]`
pub const PROB_EPS: f64 = 1e-6;

////////////////////////////
// Bernoulli pixel decoder //
////////////////////////////

pub struct BernoulliDecoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    out: Linear,
}

impl BernoulliDecoder {
    /// Will create a new decoder z -> [linear -> tanh]+ -> linear -> sigmoid
    /// with the following parameters:
    /// * `nn.dec.fc.{}.weight`
    /// * `nn.dec.out.weight`
    pub fn new(n_features: usize, n_latent: usize, layers: &[usize], vs: VarBuilder) -> Result<Self> {
        debug_assert!(!layers.is_empty());

        let (fc, prev_dim) = fc_stack(n_latent, layers, LayerActivation::Tanh, "nn.dec.fc", vs.clone())?;
        let out = candle_nn::linear(prev_dim, n_features, vs.pp("nn.dec.out"))?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            out,
        })
    }
}

impl DecoderModuleT for BernoulliDecoder {
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor> {
        let h_nl = self.fc.forward(z_nk)?;
        ops::sigmoid(&self.out.forward(&h_nl)?)
    }

    fn forward_logits(&self, z_nk: &Tensor) -> Result<Tensor> {
        prob_to_logit(&self.forward(z_nk)?, PROB_EPS)
    }

    fn forward_with_llik<LlikFn>(
        &self,
        z_nk: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
    ) -> Result<(Tensor, Tensor)>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
    {
        let recon_nd = self.forward(z_nk)?;
        let logit_nd = prob_to_logit(&recon_nd, PROB_EPS)?;
        let llik = llik(x_nd, &logit_nd)?;
        Ok((recon_nd, llik))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_loss_functions::bernoulli_log_density;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn decoder_probabilities_in_unit_interval() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let decoder = BernoulliDecoder::new(12, 2, &[6], vb)?;
        let z = Tensor::randn(0f32, 1f32, (4, 2), &dev)?;
        let p = decoder.forward(&z)?;
        assert_eq!(p.dims(), &[4, 12]);

        let p = p.flatten_all()?.to_vec1::<f32>()?;
        assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
        Ok(())
    }

    #[test]
    fn saturated_decoder_gives_finite_likelihood() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let decoder = BernoulliDecoder::new(10, 2, &[4], vb)?;

        // blow up every weight so the sigmoid output hits exactly 0 or 1
        for var in varmap.all_vars() {
            var.set(&(var.as_tensor().ones_like()? * 1e4)?)?;
        }

        let z = Tensor::new(&[[3f32, 3.], [-3., -3.]], &dev)?;
        let p = decoder.forward(&z)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(p.iter().any(|&v| v == 1.0));

        let x = Tensor::zeros((2, 10), DType::F32, &dev)?;
        let (_, llik) = decoder.forward_with_llik(&z, &x, &|x: &Tensor, logit: &Tensor| {
            bernoulli_log_density(logit, x)
        })?;
        let llik = llik.to_vec1::<f32>()?;
        assert!(llik.iter().all(|v| v.is_finite()));
        Ok(())
    }
}
