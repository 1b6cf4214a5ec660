use candle_util::candle_core::{DType, Device, Result, Tensor};
use candle_util::candle_data_loader::*;
use candle_util::candle_decoder_bernoulli::BernoulliDecoder;
use candle_util::candle_encoder_gaussian::GaussianEncoder;
use candle_util::candle_inference::TrainConfig;
use candle_util::candle_loss_functions::bernoulli_log_density;
use candle_util::candle_model_traits::*;
use candle_util::candle_nn::{VarBuilder, VarMap};
use candle_util::candle_vae_inference::*;
use ndarray::Array2;
use rand::Rng;

fn bernoulli_llik(x: &Tensor, logit: &Tensor) -> Result<Tensor> {
    bernoulli_log_density(logit, x)
}

/// A few sparse binary templates with pixel flips
fn noisy_templates(n: usize, d: usize) -> Array2<f32> {
    let mut rng = rand::rng();
    let templates: Vec<Vec<f32>> = (0..4)
        .map(|_| {
            (0..d)
                .map(|_| if rng.random::<f32>() < 0.2 { 1.0 } else { 0.0 })
                .collect()
        })
        .collect();

    Array2::from_shape_fn((n, d), |(i, j)| {
        let v = templates[i % templates.len()][j];
        if rng.random::<f32>() < 0.02 {
            1.0 - v
        } else {
            v
        }
    })
}

fn average_loss<Enc, Dec>(vae: &Vae<Enc, Dec>, x: &Tensor, repeat: usize) -> anyhow::Result<f32>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    let mut tot = 0f32;
    for _ in 0..repeat {
        tot += vae.loss(x, &bernoulli_llik)?;
    }
    Ok(tot / repeat as f32)
}

#[test]
fn training_lowers_test_loss() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let (d, k) = (64, 2);

    let train = noisy_templates(200, d);
    let test = array_to_tensor(&noisy_templates(40, d), &dev)?;

    let enc_vars = VarMap::new();
    let dec_vars = VarMap::new();
    let encoder = GaussianEncoder::new(
        d,
        k,
        &[32],
        VarBuilder::from_varmap(&enc_vars, DType::F32, &dev),
    )?;
    let decoder = BernoulliDecoder::new(
        d,
        k,
        &[32],
        VarBuilder::from_varmap(&dec_vars, DType::F32, &dev),
    )?;

    let mut vae = Vae::build(&encoder, &decoder, &enc_vars, &dec_vars);
    let initial = average_loss(&vae, &test, 10)?;

    let mut data = InMemoryData::new(&train)?;
    let config = TrainConfig {
        learning_rate: 5e-3,
        batch_size: 20,
        num_epochs: 30,
        eval_interval: 10,
        show_progress: false,
        ..Default::default()
    };

    let trace = vae.train_encoder_decoder(&mut data, Some(&test), &bernoulli_llik, &config)?;
    assert_eq!(trace.train_loss.len(), 30);
    let epochs: Vec<usize> = trace.test_loss.iter().map(|(e, _)| *e).collect();
    assert_eq!(epochs, vec![10, 20, 30]);

    let trained = average_loss(&vae, &test, 10)?;
    assert!(trained.is_finite());
    assert!(
        trained < initial,
        "trained loss {} should be below initial {}",
        trained,
        initial
    );
    Ok(())
}

#[test]
fn checkpoints_round_trip() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let (d, k) = (16, 2);
    let dir = tempfile::tempdir()?;
    let out_dir = dir.path().join("params");

    let build = |enc_vars: &VarMap, dec_vars: &VarMap| -> Result<(GaussianEncoder, BernoulliDecoder)> {
        Ok((
            GaussianEncoder::new(d, k, &[8], VarBuilder::from_varmap(enc_vars, DType::F32, &dev))?,
            BernoulliDecoder::new(d, k, &[8], VarBuilder::from_varmap(dec_vars, DType::F32, &dev))?,
        ))
    };

    let enc_vars = VarMap::new();
    let dec_vars = VarMap::new();
    let (encoder, decoder) = build(&enc_vars, &dec_vars)?;
    let vae = Vae::build(&encoder, &decoder, &enc_vars, &dec_vars);
    vae.save_checkpoints(&out_dir)?;
    assert!(out_dir.join(ENCODER_CHECKPOINT).exists());
    assert!(out_dir.join(DECODER_CHECKPOINT).exists());

    let mut enc_vars2 = VarMap::new();
    let mut dec_vars2 = VarMap::new();
    let (encoder2, decoder2) = build(&enc_vars2, &dec_vars2)?;
    load_checkpoints(&out_dir, &mut enc_vars2, &mut dec_vars2)?;

    let z = Tensor::new(&[[0.5f32, -1.0], [1.5, 0.25]], &dev)?;
    assert_eq!(
        decoder.forward(&z)?.to_vec2::<f32>()?,
        decoder2.forward(&z)?.to_vec2::<f32>()?
    );

    let x = Tensor::ones((1, d), DType::F32, &dev)?;
    let (m1, _) = encoder.latent_gaussian_params(&x)?;
    let (m2, _) = encoder2.latent_gaussian_params(&x)?;
    assert_eq!(m1.to_vec2::<f32>()?, m2.to_vec2::<f32>()?);
    Ok(())
}

#[test]
fn missing_checkpoints_are_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut enc_vars = VarMap::new();
    let mut dec_vars = VarMap::new();
    assert!(load_checkpoints(dir.path(), &mut enc_vars, &mut dec_vars).is_err());
    Ok(())
}

fn small_vae_parts(d: usize, dev: &Device) -> Result<(VarMap, VarMap, GaussianEncoder, BernoulliDecoder)> {
    let enc_vars = VarMap::new();
    let dec_vars = VarMap::new();
    let encoder = GaussianEncoder::new(d, 2, &[4], VarBuilder::from_varmap(&enc_vars, DType::F32, dev))?;
    let decoder = BernoulliDecoder::new(d, 2, &[4], VarBuilder::from_varmap(&dec_vars, DType::F32, dev))?;
    Ok((enc_vars, dec_vars, encoder, decoder))
}

#[test]
fn nan_training_data_stops_with_epoch_and_minibatch() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let (enc_vars, dec_vars, encoder, decoder) = small_vae_parts(4, &dev)?;
    let mut vae = Vae::build(&encoder, &decoder, &enc_vars, &dec_vars);

    let mut data = InMemoryData::new(&Array2::<f32>::from_elem((10, 4), f32::NAN))?;
    let config = TrainConfig {
        batch_size: 5,
        num_epochs: 2,
        show_progress: false,
        ..Default::default()
    };

    let err = vae
        .train_encoder_decoder(&mut data, None, &bernoulli_llik, &config)
        .expect_err("NaN data must not train");
    let msg = err.to_string();
    assert!(msg.contains("non-finite loss"), "{}", msg);
    assert!(msg.contains("epoch 1"), "{}", msg);
    assert!(msg.contains("minibatch 0"), "{}", msg);
    Ok(())
}

#[test]
fn nan_test_batch_stops_at_evaluation() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let (enc_vars, dec_vars, encoder, decoder) = small_vae_parts(4, &dev)?;
    let mut vae = Vae::build(&encoder, &decoder, &enc_vars, &dec_vars);

    let mut data = InMemoryData::new(&Array2::<f32>::zeros((10, 4)))?;
    let test_x = Tensor::full(f32::NAN, (3, 4), &dev)?;
    let config = TrainConfig {
        batch_size: 5,
        num_epochs: 3,
        eval_interval: 2,
        show_progress: false,
        ..Default::default()
    };

    let err = vae
        .train_encoder_decoder(&mut data, Some(&test_x), &bernoulli_llik, &config)
        .expect_err("NaN test loss must be reported");
    let msg = err.to_string();
    assert!(msg.contains("non-finite test loss"), "{}", msg);
    assert!(msg.contains("epoch 2"), "{}", msg);
    Ok(())
}
