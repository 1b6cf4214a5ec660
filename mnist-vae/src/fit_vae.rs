use crate::mnist_input::*;
use crate::vae_model::*;

use candle_util::candle_core::{Result, Tensor};
use candle_util::candle_data_loader::*;
use candle_util::candle_inference::TrainConfig;
use candle_util::candle_loss_functions::bernoulli_log_density;
use candle_util::candle_vae_inference::*;

use clap::Args;
use log::info;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(
        long,
        short = 'm',
        required = true,
        help = "MNIST directory",
        long_help = "Directory holding the MNIST IDX files:\n\
		     - train-images-idx3-ubyte[.gz]\n\
		     - train-labels-idx1-ubyte[.gz]\n\
		     - t10k-images-idx3-ubyte[.gz]\n\
		     - t10k-labels-idx1-ubyte[.gz]"
    )]
    mnist_dir: PathBuf,

    #[arg(
        long,
        short,
        default_value = "trained_params",
        help = "Output directory",
        long_help = "Output directory for the trained model (created if absent):\n\
		     - {out}/encoder.safetensors\n\
		     - {out}/decoder.safetensors\n\
		     - {out}/model.json\n\
		     - {out}/loss.tsv"
    )]
    out_dir: PathBuf,

    #[arg(long, default_value_t = 10000, help = "Number of training images")]
    n_train: usize,

    #[arg(long, default_value_t = 10000, help = "Number of test images")]
    n_test: usize,

    #[arg(
        short = 'k',
        long,
        default_value_t = 2,
        help = "Latent dimension",
        long_help = "Latent dimension.\n\
		     Two dimensions can be drawn directly on a scatter plot."
    )]
    n_latent: usize,

    #[arg(
        long,
        short = 'e',
        value_delimiter(','),
        default_values_t = vec![500],
        help = "Encoder layers",
        long_help = "Encoder hidden layers (comma-separated), each with tanh.\n\
		     Example: 500 or 512,256"
    )]
    encoder_layers: Vec<usize>,

    #[arg(
        long,
        short = 'd',
        value_delimiter(','),
        default_values_t = vec![500],
        help = "Decoder layers",
        long_help = "Decoder hidden layers (comma-separated), each with tanh."
    )]
    decoder_layers: Vec<usize>,

    #[arg(long, short = 'i', default_value_t = 100, help = "Number of training epochs")]
    epochs: usize,

    #[arg(long, default_value_t = 100, help = "Minibatch size")]
    minibatch_size: usize,

    #[arg(long, default_value_t = 1e-3, help = "Learning rate (Adam)")]
    learning_rate: f32,

    #[arg(
        long,
        default_value_t = 10,
        help = "Evaluation interval",
        long_help = "Report the loss on a held-out test batch every this many epochs."
    )]
    eval_interval: usize,

    #[arg(
        long,
        default_value_t = 100,
        help = "Size of the held-out test batch"
    )]
    test_batch_size: usize,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    device: ComputeDevice,

    #[arg(
        long,
        default_value_t = 0,
        help = "A device for cuda",
        long_help = "For cuda or meta, we may want to choose a different device."
    )]
    device_no: usize,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

pub fn bernoulli_llik(x_nd: &Tensor, logit_nd: &Tensor) -> Result<Tensor> {
    bernoulli_log_density(logit_nd, x_nd)
}

pub fn fit_vae(args: &TrainArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let dev = args.device.to_device(args.device_no)?;

    // 1. Read binarized MNIST
    let MnistSplit { train, test } = load_mnist(&args.mnist_dir, args.n_train, args.n_test)?;

    let n_test_batch = args.test_batch_size.min(test.num_images());
    if n_test_batch == 0 {
        return Err(anyhow::anyhow!("empty test set"));
    }
    let test_x = array_to_tensor(&test.images, &dev)?.narrow(0, 0, n_test_batch)?;

    // 2. Build the encoder and decoder
    let model = VaeModel::new(
        ModelSpec {
            n_pixels: train.images.ncols(),
            n_latent: args.n_latent,
            encoder_layers: args.encoder_layers.clone(),
            decoder_layers: args.decoder_layers.clone(),
        },
        &dev,
    )?;

    // 3. Train
    let mut vae = model.vae();

    let initial_loss = vae.loss(&test_x, &bernoulli_llik)?;
    info!("initial test loss: {}", initial_loss);

    let mut data = InMemoryData::new(&train.images)?;

    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        batch_size: args.minibatch_size,
        num_epochs: args.epochs,
        eval_interval: args.eval_interval,
        device: dev.clone(),
        show_progress: true,
        verbose: args.verbose,
    };

    info!("Start training VAE...");
    let trace = vae.train_encoder_decoder(&mut data, Some(&test_x), &bernoulli_llik, &train_config)?;

    // 4. Persist
    info!("Writing down the model parameters");
    model.save(&args.out_dir)?;
    write_loss_trace(&trace.train_loss, &trace.test_loss, &args.out_dir)?;

    Ok(())
}

fn write_loss_trace(
    train_loss: &[f32],
    test_loss: &[(usize, f32)],
    out_dir: &Path,
) -> anyhow::Result<()> {
    let mut lines: Vec<Box<str>> = vec!["epoch\ttrain_loss\ttest_loss".into()];
    for (e, loss) in train_loss.iter().enumerate() {
        let epoch = e + 1;
        let test = test_loss
            .iter()
            .find(|(te, _)| *te == epoch)
            .map(|(_, l)| l.to_string())
            .unwrap_or_else(|| "NA".to_string());
        lines.push(format!("{}\t{}\t{}", epoch, loss, test).into_boxed_str());
    }
    let file = out_dir.join("loss.tsv");
    let file = file
        .to_str()
        .ok_or(anyhow::anyhow!("invalid path {:?}", file))?;
    crate::common_io::write_lines(&lines, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnist_input::tests::write_fake_mnist;

    #[test]
    fn train_writes_model_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_fake_mnist(dir.path(), TRAIN_IMAGES, TRAIN_LABELS, 40)?;
        write_fake_mnist(dir.path(), TEST_IMAGES, TEST_LABELS, 10)?;
        let out_dir = dir.path().join("trained_params");

        let args = TrainArgs {
            mnist_dir: dir.path().to_path_buf(),
            out_dir: out_dir.clone(),
            n_train: 40,
            n_test: 10,
            n_latent: 2,
            encoder_layers: vec![16],
            decoder_layers: vec![16],
            epochs: 3,
            minibatch_size: 10,
            learning_rate: 1e-3,
            eval_interval: 1,
            test_batch_size: 10,
            device: ComputeDevice::Cpu,
            device_no: 0,
            verbose: false,
        };
        fit_vae(&args)?;

        assert!(out_dir.join(ENCODER_CHECKPOINT).exists());
        assert!(out_dir.join(DECODER_CHECKPOINT).exists());
        assert_eq!(ModelSpec::from_json(&out_dir)?.n_pixels, NUM_PIXELS);

        let loss = std::fs::read_to_string(out_dir.join("loss.tsv"))?;
        assert_eq!(loss.lines().count(), 4);
        assert!(!loss.contains("NA"));
        Ok(())
    }
}
