pub mod candle_aux_layers;
pub mod candle_data_loader;
pub mod candle_decoder_bernoulli;
pub mod candle_elbo;
pub mod candle_encoder_gaussian;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_posterior_fit;
pub mod candle_samplers;
pub mod candle_vae_inference;

pub use candle_core;
pub use candle_nn;
