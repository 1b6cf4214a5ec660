use crate::common_io::*;
use crate::mnist_input::*;
use crate::vae_model::*;

use candle_util::candle_core::{DType, Device, Tensor};
use candle_util::candle_data_loader::array_to_tensor;
use candle_util::candle_model_traits::*;
use candle_util::candle_samplers::sample_bernoulli;

use clap::Args;
use log::info;
use std::path::PathBuf;

/// Where the trained model lives and which device to run it on
#[derive(Args, Debug, Clone)]
pub struct TrainedModelArgs {
    #[arg(
        long,
        default_value = "trained_params",
        help = "Trained model directory",
        long_help = "Directory written by `train`, holding\n\
		     encoder.safetensors, decoder.safetensors and model.json"
    )]
    pub model_dir: PathBuf,

    #[arg(long, short, required = true, help = "Output header")]
    pub out: Box<str>,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    pub device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "A device for cuda or metal")]
    pub device_no: usize,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

impl TrainedModelArgs {
    pub fn load_model(&self) -> anyhow::Result<(VaeModel, Device)> {
        init_logger(self.verbose);
        let dev = self.device.to_device(self.device_no)?;
        let model = VaeModel::load(&self.model_dir, &dev)?;
        Ok((model, dev))
    }

    /// `{out}.{suffix}`
    pub fn output_file(&self, suffix: &str) -> Box<str> {
        format!("{}.{}", self.out, suffix).into_boxed_str()
    }
}

#[derive(Args, Debug)]
pub struct EmbedArgs {
    #[command(flatten)]
    pub model: TrainedModelArgs,

    #[arg(long, short = 'm', required = true, help = "MNIST directory")]
    pub mnist_dir: PathBuf,

    #[arg(long, default_value_t = 10000, help = "Number of test images")]
    pub n_test: usize,
}

#[derive(Args, Debug)]
pub struct InterpolateArgs {
    #[command(flatten)]
    pub model: TrainedModelArgs,

    #[arg(long, short = 'm', required = true, help = "MNIST directory")]
    pub mnist_dir: PathBuf,

    #[arg(long, default_value_t = 10000, help = "Number of test images")]
    pub n_test: usize,

    #[arg(long, short = 'a', default_value_t = 1, help = "Start digit")]
    pub from_digit: u8,

    #[arg(long, short = 'b', default_value_t = 7, help = "End digit")]
    pub to_digit: u8,

    #[arg(
        long,
        default_value_t = 10,
        help = "Number of interpolation points",
        long_help = "Number of evenly spaced points between (and including)\n\
		     the latent means of the two digits."
    )]
    pub steps: usize,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[command(flatten)]
    pub model: TrainedModelArgs,

    #[arg(long, short = 'n', default_value_t = 16, help = "Number of samples")]
    pub num_samples: usize,
}

/// Latent means of the test images, one row per image with its label
pub fn embed_test_images(args: &EmbedArgs) -> anyhow::Result<()> {
    let (model, dev) = args.model.load_model()?;
    let test = load_mnist_test(&args.mnist_dir, args.n_test)?;

    let x_nd = array_to_tensor(&test.images, &dev)?;
    let (z_mean_nk, _) = model.encoder.latent_gaussian_params(&x_nd)?;

    let k = model.encoder.dim_latent();
    let labels: Vec<Box<str>> = test
        .labels
        .iter()
        .map(|l| l.to_string().into_boxed_str())
        .collect();

    let out_file = args.model.output_file("latent.tsv.gz");
    write_tsv_with_names(
        &numbered_header("label", "z", k),
        &labels,
        &z_mean_nk,
        &out_file,
    )?;
    info!("Wrote {} latent means to {}", labels.len(), out_file);
    Ok(())
}

/// `steps` points on the line from `z_a` (t = 0) to `z_b` (t = 1)
///
/// * `z_a`, `z_b` - 1 x k end points
pub fn interpolate_latent(z_a: &Tensor, z_b: &Tensor, steps: usize) -> anyhow::Result<Tensor> {
    if steps < 2 {
        return Err(anyhow::anyhow!("need at least 2 interpolation steps"));
    }
    let ts: Vec<f32> = (0..steps)
        .map(|i| i as f32 / (steps - 1) as f32)
        .collect();
    let t_s1 = Tensor::from_vec(ts, (steps, 1), z_a.device())?;
    let one_minus_t = t_s1.affine(-1.0, 1.0)?;
    Ok((z_a.broadcast_mul(&one_minus_t)? + z_b.broadcast_mul(&t_s1)?)?)
}

/// Decode the straight line between the latent means of two digits
pub fn interpolate_digits(args: &InterpolateArgs) -> anyhow::Result<()> {
    let (model, dev) = args.model.load_model()?;
    let test = load_mnist_test(&args.mnist_dir, args.n_test)?;

    let first_image = |digit: u8| -> anyhow::Result<Tensor> {
        let i = test
            .first_of_label(digit)
            .ok_or(anyhow::anyhow!("no test image of digit {}", digit))?;
        let x_1d = array_to_tensor(&test.images, &dev)?.narrow(0, i, 1)?;
        let (z_mean, _) = model.encoder.latent_gaussian_params(&x_1d)?;
        Ok(z_mean)
    };

    let z_a = first_image(args.from_digit)?;
    let z_b = first_image(args.to_digit)?;

    let z_sk = interpolate_latent(&z_a, &z_b, args.steps)?;
    let prob_sd = model.decoder.forward(&z_sk)?;

    let names: Vec<Box<str>> = (0..args.steps)
        .map(|i| format!("{:.3}", i as f32 / (args.steps - 1) as f32).into_boxed_str())
        .collect();

    let out_file = args.model.output_file("interpolate.tsv.gz");
    write_tsv_with_names(
        &numbered_header("t", "pixel", model.decoder.dim_obs()),
        &names,
        &prob_sd,
        &out_file,
    )?;
    info!(
        "Wrote {} images from digit {} to {} in {}",
        args.steps, args.from_digit, args.to_digit, out_file
    );
    Ok(())
}

/// Decode draws from the prior N(0, I)
pub fn sample_prior(args: &SampleArgs) -> anyhow::Result<()> {
    if args.num_samples == 0 {
        return Err(anyhow::anyhow!("no samples requested"));
    }

    let (model, dev) = args.model.load_model()?;
    let k = model.decoder.dim_latent();
    let d = model.decoder.dim_obs();

    let z_nk = Tensor::randn(0f32, 1f32, (args.num_samples, k), &dev)?;
    let prob_nd = model.decoder.forward(&z_nk)?;
    let bin_nd = sample_bernoulli(&prob_nd)?.to_dtype(DType::F32)?;

    let names: Vec<Box<str>> = (0..args.num_samples)
        .map(|i| format!("sample_{}", i).into_boxed_str())
        .collect();
    let header = numbered_header("sample", "pixel", d);

    write_tsv_with_names(&header, &names, &prob_nd, &args.model.output_file("sample_prob.tsv.gz"))?;
    write_tsv_with_names(&header, &names, &bin_nd, &args.model.output_file("sample_bin.tsv.gz"))?;
    info!("Sampled {} images from the prior", args.num_samples);
    Ok(())
}
