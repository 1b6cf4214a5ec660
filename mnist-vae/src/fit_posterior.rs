use crate::common_io::*;
use crate::latent_routines::TrainedModelArgs;
use crate::mnist_input::*;

use candle_util::candle_core::Tensor;
use candle_util::candle_data_loader::array_to_tensor;
use candle_util::candle_model_traits::*;
use candle_util::candle_posterior_fit::*;

use clap::Args;
use log::info;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ReconstructArgs {
    #[command(flatten)]
    pub model: TrainedModelArgs,

    #[arg(long, short = 'm', required = true, help = "MNIST directory")]
    pub mnist_dir: PathBuf,

    #[arg(long, default_value_t = 10000, help = "Number of test images")]
    pub n_test: usize,

    #[arg(
        long,
        help = "Test image index",
        long_help = "Index of the test image to reconstruct.\n\
		     Without --index or --digit, the first test image is used.",
        conflicts_with = "digit"
    )]
    pub index: Option<usize>,

    #[arg(long, help = "Reconstruct the first test image of this digit")]
    pub digit: Option<u8>,

    #[arg(
        long,
        help = "Number of observed pixels",
        long_help = "Number of leading (row-major) pixels treated as observed.\n\
		     Defaults to the top half of the image."
    )]
    pub n_obs: Option<usize>,

    #[arg(long, default_value_t = 200, help = "Number of gradient steps")]
    pub num_iters: usize,

    #[arg(long, default_value_t = 0.01, help = "Learning rate (gradient descent)")]
    pub learning_rate: f64,

    #[arg(long, short = 'k', default_value_t = 10, help = "Monte Carlo samples per step")]
    pub num_samples: usize,

    #[arg(
        long,
        value_delimiter(','),
        allow_hyphen_values = true,
        help = "Initial posterior mean",
        long_help = "Initial posterior mean (comma-separated), e.g., 2,-2\n\
		     Zeros if not given."
    )]
    pub init_mean: Option<Vec<f32>>,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true, help = "Initial log std")]
    pub init_ln_std: f32,

    #[arg(long, default_value_t = -4.0, allow_hyphen_values = true, help = "Grid lower bound")]
    pub grid_lb: f32,

    #[arg(long, default_value_t = 4.0, help = "Grid upper bound")]
    pub grid_ub: f32,

    #[arg(
        long,
        default_value_t = 50,
        help = "Grid points per axis",
        long_help = "Points per axis of the latent grid on which the unnormalized\n\
		     log posterior and log q are evaluated (2-d latent only)."
    )]
    pub grid_steps: usize,
}

fn pick_image(test: &MnistData, index: Option<usize>, digit: Option<u8>) -> anyhow::Result<usize> {
    let n = test.num_images();
    let i = match (index, digit) {
        (Some(i), _) => i,
        (None, Some(digit)) => test
            .first_of_label(digit)
            .ok_or(anyhow::anyhow!("no test image of digit {}", digit))?,
        (None, None) => 0,
    };
    if i >= n {
        return Err(anyhow::anyhow!("image {} out of {} test images", i, n));
    }
    Ok(i)
}

/// Fill in the bottom of a test image from its top
///
/// Fits q(z) to the posterior given the observed leading pixels, then
/// writes:
/// - `{out}.posterior.tsv.gz`: mean and ln_std of q
/// - `{out}.loss.tsv.gz`: negative ELBO per iteration
/// - `{out}.completed.tsv.gz`: original and completed images
/// - `{out}.grid.tsv.gz`: log p(x_obs, z) and log q(z) on a grid (k = 2)
pub fn reconstruct_image(args: &ReconstructArgs) -> anyhow::Result<()> {
    let (model, dev) = args.model.load_model()?;
    let test = load_mnist_test(&args.mnist_dir, args.n_test)?;

    let d = model.decoder.dim_obs();
    let k = model.decoder.dim_latent();
    let n_obs = args.n_obs.unwrap_or(d / 2);
    if n_obs == 0 || n_obs >= d {
        return Err(anyhow::anyhow!("observed pixels {} not in (0, {})", n_obs, d));
    }

    let i = pick_image(&test, args.index, args.digit)?;
    info!("image {} (digit {}), {} of {} pixels observed", i, test.labels[i], n_obs, d);

    let x_1d = array_to_tensor(&test.images, &dev)?.narrow(0, i, 1)?;
    let x_obs = x_1d.narrow(1, 0, n_obs)?;

    let config = PosteriorFitConfig {
        num_iters: args.num_iters,
        learning_rate: args.learning_rate,
        num_samples: args.num_samples,
        init_mean: args.init_mean.clone(),
        init_ln_std: args.init_ln_std,
        ..Default::default()
    };

    let llik = top_half_llik(n_obs);
    let fitted = fit_variational_dist(&model.decoder, &x_obs, &llik, &config)?;
    let q = &fitted.posterior;

    let (mean, ln_std) = q.params();
    let param_names: Vec<Box<str>> = vec!["mean".into(), "ln_std".into()];
    write_tsv_with_names(
        &numbered_header("param", "z", k),
        &param_names,
        &Tensor::cat(&[&mean, &ln_std], 0)?,
        &args.model.output_file("posterior.tsv.gz"),
    )?;

    let loss_lines: Vec<Box<str>> = std::iter::once("iter\tloss".into())
        .chain(
            fitted
                .loss_trace
                .iter()
                .enumerate()
                .map(|(t, l)| format!("{}\t{}", t, l).into_boxed_str()),
        )
        .collect();
    write_lines(&loss_lines, &args.model.output_file("loss.tsv.gz"))?;

    let completed = complete_image(&model.decoder, &x_obs, q)?;
    let image_names: Vec<Box<str>> = vec!["original".into(), "completed".into()];
    write_tsv_with_names(
        &numbered_header("image", "pixel", d),
        &image_names,
        &Tensor::cat(&[&x_1d, &completed], 0)?,
        &args.model.output_file("completed.tsv.gz"),
    )?;

    if k == 2 {
        let z_g2 = latent_grid(args.grid_lb, args.grid_ub, args.grid_steps, &dev)?;
        let log_joint_g = log_joint(&model.decoder, &x_obs, &z_g2, &llik)?;
        let log_q_g = q.log_prob(&z_g2)?;
        let grid = Tensor::cat(
            &[&z_g2, &log_joint_g.unsqueeze(1)?, &log_q_g.unsqueeze(1)?],
            1,
        )?;
        let names: Vec<Box<str>> = (0..grid.dims()[0])
            .map(|g| g.to_string().into_boxed_str())
            .collect();
        let header: Vec<Box<str>> = ["point", "z_1", "z_2", "log_joint", "log_q"]
            .iter()
            .map(|&s| s.into())
            .collect();
        write_tsv_with_names(&header, &names, &grid, &args.model.output_file("grid.tsv.gz"))?;
    } else {
        info!("skip the latent grid for k = {}", k);
    }

    info!(
        "final loss: {}",
        fitted.loss_trace.last().copied().unwrap_or(f32::NAN)
    );
    Ok(())
}
