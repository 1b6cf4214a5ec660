use candle_util::candle_core::{DType, Device};
use candle_util::candle_decoder_bernoulli::BernoulliDecoder;
use candle_util::candle_encoder_gaussian::GaussianEncoder;
use candle_util::candle_nn::{VarBuilder, VarMap};
use candle_util::candle_vae_inference::{load_checkpoints, Vae, VaeT};

use clap::ValueEnum;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MODEL_SPEC_FILE: &str = "model.json";

/// `--verbose` turns on `info!` messages unless `RUST_LOG` says otherwise
pub fn init_logger(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::try_init();
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn to_device(&self, device_no: usize) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

/// Network architecture, stored next to the checkpoints
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub n_pixels: usize,
    pub n_latent: usize,
    pub encoder_layers: Vec<usize>,
    pub decoder_layers: Vec<usize>,
}

impl ModelSpec {
    pub fn to_json(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;
        let file = dir.join(MODEL_SPEC_FILE);
        std::fs::write(&file, serde_json::to_string_pretty(self)?)?;
        info!("Wrote {:?}", file);
        Ok(())
    }

    pub fn from_json(dir: &Path) -> anyhow::Result<Self> {
        let file = dir.join(MODEL_SPEC_FILE);
        let text = std::fs::read_to_string(&file)
            .map_err(|e| anyhow::anyhow!("failed to read {:?}: {}", file, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Encoder and decoder built on their own variable maps
pub struct VaeModel {
    pub spec: ModelSpec,
    pub encoder_vars: VarMap,
    pub decoder_vars: VarMap,
    pub encoder: GaussianEncoder,
    pub decoder: BernoulliDecoder,
}

impl VaeModel {
    /// Randomly initialized model
    pub fn new(spec: ModelSpec, dev: &Device) -> anyhow::Result<Self> {
        if spec.encoder_layers.is_empty() || spec.decoder_layers.is_empty() {
            return Err(anyhow::anyhow!("need at least one hidden layer"));
        }

        let encoder_vars = VarMap::new();
        let decoder_vars = VarMap::new();

        let encoder = GaussianEncoder::new(
            spec.n_pixels,
            spec.n_latent,
            &spec.encoder_layers,
            VarBuilder::from_varmap(&encoder_vars, DType::F32, dev),
        )?;

        let decoder = BernoulliDecoder::new(
            spec.n_pixels,
            spec.n_latent,
            &spec.decoder_layers,
            VarBuilder::from_varmap(&decoder_vars, DType::F32, dev),
        )?;

        info!(
            "input: {} -> encoder {:?} -> latent: {} -> decoder {:?} -> output: {}",
            spec.n_pixels, spec.encoder_layers, spec.n_latent, spec.decoder_layers, spec.n_pixels
        );

        Ok(Self {
            spec,
            encoder_vars,
            decoder_vars,
            encoder,
            decoder,
        })
    }

    /// Rebuild the model described by `{dir}/model.json` and restore
    /// its trained parameters
    pub fn load(dir: &Path, dev: &Device) -> anyhow::Result<Self> {
        let spec = ModelSpec::from_json(dir)?;
        let mut model = Self::new(spec, dev)?;
        load_checkpoints(dir, &mut model.encoder_vars, &mut model.decoder_vars)?;
        Ok(model)
    }

    pub fn vae(&self) -> Vae<'_, GaussianEncoder, BernoulliDecoder> {
        Vae::build(
            &self.encoder,
            &self.decoder,
            &self.encoder_vars,
            &self.decoder_vars,
        )
    }

    /// Write both checkpoints and `model.json` under `dir`
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        self.vae().save_checkpoints(dir)?;
        self.spec.to_json(dir)
    }
}
