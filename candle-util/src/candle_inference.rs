pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// evaluate the held-out loss every this many epochs
    pub eval_interval: usize,
    pub device: candle_core::Device,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 100,
            num_epochs: 100,
            eval_interval: 10,
            device: candle_core::Device::Cpu,
            show_progress: true,
            verbose: false,
        }
    }
}

/// Per-epoch training loss and periodic held-out loss
#[derive(Debug, Clone, Default)]
pub struct TrainTrace {
    /// average minibatch loss (negative ELBO) for each epoch
    pub train_loss: Vec<f32>,
    /// (epoch, loss) evaluated on the held-out batch
    pub test_loss: Vec<(usize, f32)>,
}
