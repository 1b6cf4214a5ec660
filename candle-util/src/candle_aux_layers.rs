use candle_core::{Result, Tensor};
use candle_nn::{ops, Linear, Module, VarBuilder};

/// Element-wise nonlinearity between stacked layers
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LayerActivation {
    Tanh,
    Sigmoid,
    Relu,
}

impl Module for LayerActivation {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Tanh => x.tanh(),
            Self::Sigmoid => ops::sigmoid(x),
            Self::Relu => x.relu(),
        }
    }
}

/// Layers applied in order, each optionally followed by an activation
pub struct StackLayers<M>
where
    M: Module,
{
    layers: Vec<(M, Option<LayerActivation>)>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.layers
            .iter()
            .try_fold(input.clone(), |x, (layer, activation)| {
                let h = layer.forward(&x)?;
                match activation {
                    Some(act) => act.forward(&h),
                    None => Ok(h),
                }
            })
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self { layers: vec![] }
    }

    pub fn push_with_act(&mut self, layer: M, activation: LayerActivation) {
        self.layers.push((layer, Some(activation)));
    }

    pub fn push(&mut self, layer: M) {
        self.layers.push((layer, None));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Fully connected `in_dim -> layers[0] -> ... -> layers[last]`, each
/// followed by `activation`. Variables are `{prefix}.{j}.weight` and
/// `{prefix}.{j}.bias`.
///
/// # Returns `(stack, output_dim)`
pub fn fc_stack(
    in_dim: usize,
    layers: &[usize],
    activation: LayerActivation,
    prefix: &str,
    vs: VarBuilder,
) -> Result<(StackLayers<Linear>, usize)> {
    let mut fc = StackLayers::new();
    let mut prev_dim = in_dim;
    for (j, &next_dim) in layers.iter().enumerate() {
        let layer = candle_nn::linear(prev_dim, next_dim, vs.pp(format!("{}.{}", prefix, j)))?;
        fc.push_with_act(layer, activation);
        prev_dim = next_dim;
    }
    Ok((fc, prev_dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn stack_dims_and_names() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let (fc, out_dim) = fc_stack(7, &[5, 3], LayerActivation::Tanh, "nn.fc", vb)?;
        assert_eq!(fc.len(), 2);
        assert_eq!(out_dim, 3);

        let h = fc.forward(&Tensor::ones((4, 7), DType::F32, &dev)?)?;
        assert_eq!(h.dims(), &[4, 3]);
        assert!(h.flatten_all()?.to_vec1::<f32>()?.iter().all(|v| v.abs() <= 1.0));

        let data = varmap.data().lock().expect("varmap lock");
        assert!(data.contains_key("nn.fc.0.weight"));
        assert!(data.contains_key("nn.fc.1.bias"));
        Ok(())
    }
}
