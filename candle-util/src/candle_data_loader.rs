use candle_core::{DType, Device, Tensor};
use ndarray::Array2;
use rand::seq::SliceRandom;

pub struct MinibatchData {
    pub input: Tensor,
}

/// Epoch-wise minibatch access for training loops
pub trait DataLoader {
    /// Minibatch `batch_idx` of the latest shuffle, moved to `target_device`
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_minibatch(&self) -> usize;

    /// Start a new epoch: permute the samples and cut them into
    /// minibatches of `batch_size` (the last one may be shorter)
    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// Samples kept in memory as one `n x d` tensor (rows are samples).
/// Every shuffle gathers the permuted rows into contiguous minibatch
/// tensors, so each sample shows up exactly once per epoch.
///
pub struct InMemoryData {
    rows_nd: Tensor,
    gathered: Option<Vec<Tensor>>,
    minibatches: Minibatches,
}

impl InMemoryData {
    pub fn new<D>(data: &D) -> anyhow::Result<Self>
    where
        D: ToRowTensor,
    {
        let rows_nd = data.to_row_tensor(&Device::Cpu)?;
        let (n, _) = rows_nd.dims2()?;
        if n == 0 {
            return Err(anyhow::anyhow!("empty data"));
        }

        Ok(InMemoryData {
            rows_nd,
            gathered: None,
            minibatches: Minibatches::new(n),
        })
    }

    pub fn num_samples(&self) -> usize {
        self.minibatches.size()
    }

    /// sample indexes of each minibatch in the latest shuffle
    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.minibatches.chunks
    }
}

impl DataLoader for InMemoryData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let gathered = self
            .gathered
            .as_ref()
            .ok_or(anyhow::anyhow!("need to shuffle data"))?;

        let input = gathered.get(batch_idx).ok_or(anyhow::anyhow!(
            "invalid index = {} vs. total # = {}",
            batch_idx,
            gathered.len()
        ))?;

        Ok(MinibatchData {
            input: input.to_device(target_device)?,
        })
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }

        self.minibatches.shuffle_minibatch(batch_size);

        let device = self.rows_nd.device();
        let gathered = self
            .minibatches
            .chunks
            .iter()
            .map(|samples| {
                let idx: Vec<u32> = samples.iter().map(|&i| i as u32).collect();
                let idx = Tensor::from_vec(idx, samples.len(), device)?;
                self.rows_nd.index_select(&idx, 0)
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        self.gathered = Some(gathered);
        Ok(())
    }
}

///
/// Sample indexes cut into minibatches; `shuffle_minibatch` draws a
/// fresh permutation and partitions it.
///
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(n: usize) -> Self {
        Self {
            samples: (0..n).collect(),
            chunks: vec![],
        }
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        self.samples.shuffle(&mut rand::rng());
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(<[usize]>::to_vec)
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

/// Anything that can be laid out as an `n x d` f32 tensor, one sample per row
pub trait ToRowTensor {
    fn to_row_tensor(&self, device: &Device) -> anyhow::Result<Tensor>;
}

impl ToRowTensor for Array2<f32> {
    fn to_row_tensor(&self, device: &Device) -> anyhow::Result<Tensor> {
        array_to_tensor(self, device)
    }
}

impl ToRowTensor for Tensor {
    fn to_row_tensor(&self, device: &Device) -> anyhow::Result<Tensor> {
        self.dims2()?;
        Ok(self.to_dtype(DType::F32)?.to_device(device)?)
    }
}

/// Copy a whole `n x d` matrix into one tensor on `device`
pub fn array_to_tensor(data: &Array2<f32>, device: &Device) -> anyhow::Result<Tensor> {
    let (n, d) = data.dim();
    let data = data.as_standard_layout();
    let flat = data
        .as_slice()
        .ok_or(anyhow::anyhow!("matrix is not contiguous"))?;
    Ok(Tensor::from_slice(flat, (n, d), device)?)
}
