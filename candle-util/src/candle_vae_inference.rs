use crate::candle_data_loader::*;
use crate::candle_elbo::vae_loss;
use crate::candle_inference::{TrainConfig, TrainTrace};
use crate::candle_model_traits::{DecoderModuleT, EncoderModuleT};

use candle_core::{Result, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use std::path::{Path, PathBuf};

pub const ENCODER_CHECKPOINT: &str = "encoder.safetensors";
pub const DECODER_CHECKPOINT: &str = "decoder.safetensors";

pub struct Vae<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    pub encoder: &'a Enc,
    pub decoder: &'a Dec,
    pub encoder_vars: &'a VarMap,
    pub decoder_vars: &'a VarMap,
}

pub trait VaeT<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    /// Train the VAE model
    /// * `data` - data loader should have `minibatch_data`
    /// * `test_x` - held-out data to report the loss on
    /// * `llik` - log likelihood function
    /// * `train_config` - training configuration
    fn train_encoder_decoder<DataL, LlikFn>(
        &mut self,
        data: &mut DataL,
        test_x: Option<&Tensor>,
        llik: &LlikFn,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainTrace>
    where
        DataL: DataLoader,
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>;

    /// Negative ELBO on `x_nd` (one noise draw per row)
    fn loss<LlikFn>(&self, x_nd: &Tensor, llik: &LlikFn) -> anyhow::Result<f32>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>;

    /// Write `encoder.safetensors` and `decoder.safetensors` under `dir`
    fn save_checkpoints(&self, dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)>;

    /// Build a VAE model
    /// * `encoder` - encoder module
    /// * `decoder` - decoder module
    fn build(
        encoder: &'a Enc,
        decoder: &'a Dec,
        encoder_vars: &'a VarMap,
        decoder_vars: &'a VarMap,
    ) -> Self;
}

impl<'a, Enc, Dec> VaeT<'a, Enc, Dec> for Vae<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    fn train_encoder_decoder<DataL, LlikFn>(
        &mut self,
        data: &mut DataL,
        test_x: Option<&Tensor>,
        llik_func: &LlikFn,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainTrace>
    where
        DataL: DataLoader,
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
    {
        let device = &train_config.device;

        let mut vars = self.encoder_vars.all_vars();
        vars.extend(self.decoder_vars.all_vars());

        let mut adam = AdamW::new(
            vars,
            ParamsAdamW {
                lr: train_config.learning_rate.into(),
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-8,
                weight_decay: 0.0,
            },
        )?;

        let pb = ProgressBar::new(train_config.num_epochs as u64);

        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let test_x = test_x.map(|x| x.to_device(device)).transpose()?;
        let eval_interval = train_config.eval_interval.max(1);

        let mut trace = TrainTrace::default();

        for epoch in 0..train_config.num_epochs {
            data.shuffle_minibatch(train_config.batch_size)?;
            let num_minibatches = data.num_minibatch();

            let mut loss_tot = 0f32;

            for b in 0..num_minibatches {
                let minibatch_data = data.minibatch_data(b, device)?;
                let loss = vae_loss(self.encoder, self.decoder, &minibatch_data.input, llik_func)?;
                let loss_val = loss.to_scalar::<f32>()?;
                if !loss_val.is_finite() {
                    return Err(anyhow::anyhow!(
                        "non-finite loss {} at epoch {}, minibatch {}",
                        loss_val,
                        epoch + 1,
                        b
                    ));
                }
                adam.backward_step(&loss)?;
                loss_tot += loss_val;
            }
            trace.train_loss.push(loss_tot / num_minibatches as f32);
            pb.inc(1);

            if train_config.verbose {
                info!(
                    "[{}] train loss: {}",
                    epoch + 1,
                    trace.train_loss.last().ok_or(anyhow::anyhow!("loss"))?
                );
            }

            let last_epoch = epoch + 1 == train_config.num_epochs;
            if let Some(test_x) = test_x.as_ref() {
                if (epoch + 1) % eval_interval == 0 || last_epoch {
                    let test_loss = self.loss(test_x, llik_func)?;
                    if !test_loss.is_finite() {
                        return Err(anyhow::anyhow!(
                            "non-finite test loss {} at epoch {}",
                            test_loss,
                            epoch + 1
                        ));
                    }
                    info!("[{}] test loss: {}", epoch + 1, test_loss);
                    trace.test_loss.push((epoch + 1, test_loss));
                }
            }
        } // each epoch

        pb.finish_and_clear();
        Ok(trace)
    }

    fn loss<LlikFn>(&self, x_nd: &Tensor, llik: &LlikFn) -> anyhow::Result<f32>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
    {
        let loss = vae_loss(self.encoder, self.decoder, x_nd, llik)?.detach();
        Ok(loss.to_scalar::<f32>()?)
    }

    fn save_checkpoints(&self, dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let enc_file = dir.join(ENCODER_CHECKPOINT);
        let dec_file = dir.join(DECODER_CHECKPOINT);
        self.encoder_vars.save(&enc_file)?;
        self.decoder_vars.save(&dec_file)?;
        info!("Saved {:?} and {:?}", enc_file, dec_file);
        Ok((enc_file, dec_file))
    }

    fn build(
        encoder: &'a Enc,
        decoder: &'a Dec,
        encoder_vars: &'a VarMap,
        decoder_vars: &'a VarMap,
    ) -> Self {
        assert_eq!(encoder.dim_latent(), decoder.dim_latent());
        assert_eq!(encoder.dim_obs(), decoder.dim_obs());

        Self {
            encoder,
            decoder,
            encoder_vars,
            decoder_vars,
        }
    }
}

/// Restore the parameters written by `save_checkpoints`. Both var maps
/// must already hold variables of the same names and shapes, i.e., the
/// encoder and decoder have been built on them.
pub fn load_checkpoints(
    dir: &Path,
    encoder_vars: &mut VarMap,
    decoder_vars: &mut VarMap,
) -> anyhow::Result<()> {
    let enc_file = dir.join(ENCODER_CHECKPOINT);
    let dec_file = dir.join(DECODER_CHECKPOINT);
    if !enc_file.exists() || !dec_file.exists() {
        return Err(anyhow::anyhow!("no checkpoints found in {:?}", dir));
    }
    encoder_vars.load(&enc_file)?;
    decoder_vars.load(&dec_file)?;
    info!("Loaded {:?} and {:?}", enc_file, dec_file);
    Ok(())
}
