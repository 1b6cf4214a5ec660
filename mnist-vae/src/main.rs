mod common_io;
mod fit_posterior;
mod fit_vae;
mod latent_routines;
mod mnist_input;
mod vae_model;

use fit_posterior::*;
use fit_vae::*;
use latent_routines::*;

use clap::{Parser, Subcommand};
use log::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "MNIST-VAE",
    long_about = "Variational autoencoder on binarized MNIST digits.\n\
		  Read the IDX files (gzipped or not) from an MNIST directory,\n\
		  train a Gaussian encoder and a Bernoulli decoder by maximizing ELBO,\n\
		  and explore the learned latent space."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train encoder and decoder on binarized MNIST",
        long_about = "Train a VAE in three stages: \n\
		      (1) Read and binarize MNIST images (x / 255 > 0.5)\n\
		      (2) Maximize ELBO by Adam on shuffled minibatches\n\
		      (3) Save the encoder/decoder parameters and architecture.\n"
    )]
    Train(TrainArgs),

    #[command(
        about = "Latent means of test images",
        long_about = "Encode every test image and write its latent mean\n\
		      next to its digit label (one row per image).\n"
    )]
    Embed(EmbedArgs),

    #[command(about = "Decode a straight line between two digits in latent space")]
    Interpolate(InterpolateArgs),

    #[command(about = "Decode random draws from the prior N(0, I)")]
    Sample(SampleArgs),

    #[command(
        about = "Complete a test image from its top half",
        long_about = "Fit a Gaussian posterior q(z) to the observed top half of a\n\
		      test image by gradient descent on a Monte Carlo ELBO,\n\
		      with the trained decoder held fixed,\n\
		      then decode a sample of q(z) to fill in the bottom half.\n"
    )]
    Reconstruct(ReconstructArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            fit_vae(args)?;
        }
        Commands::Embed(args) => {
            embed_test_images(args)?;
        }
        Commands::Interpolate(args) => {
            interpolate_digits(args)?;
        }
        Commands::Sample(args) => {
            sample_prior(args)?;
        }
        Commands::Reconstruct(args) => {
            reconstruct_image(args)?;
        }
    }

    info!("Done");
    Ok(())
}
