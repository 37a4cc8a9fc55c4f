use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};

/// Intermediate video latent, laid out as `[batch, channels, frames, height, width]`.
///
/// Not `Clone`: each stage takes the previous stage's latent by value.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct LatentTensor {
    shape: [usize; 5],
    values: Vec<f32>,
}

impl LatentTensor {
    pub fn new(shape: [usize; 5], values: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(Error::Backend(format!(
                "latent shape {:?} needs {} values, got {}",
                shape,
                expected,
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    pub fn shape(&self) -> [usize; 5] {
        self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Spatial extent as `(height, width)`
    pub fn spatial(&self) -> (usize, usize) {
        (self.shape[3], self.shape[4])
    }

    pub fn into_tensor<B: Backend>(self, device: &B::Device) -> Tensor<B, 5> {
        Tensor::from_data(TensorData::new(self.values, self.shape), device)
    }

    pub fn from_tensor<B: Backend>(tensor: Tensor<B, 5>) -> Result<Self> {
        let shape = tensor.dims();
        let values = tensor
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| Error::Backend(format!("latent readback failed: {e:?}")))?;
        Self::new(shape, values)
    }
}

#[cfg(test)]
mod tests {
    use burn_ndarray::NdArray;
    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn test_shape_mismatch_rejected() {
        assert!(LatentTensor::new([1, 2, 1, 2, 2], vec![0.0; 7]).is_err());
    }

    #[test]
    fn test_tensor_conversion_keeps_layout() {
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let latent = LatentTensor::new([1, 2, 2, 2, 2], values.clone()).unwrap();
        let device = Default::default();
        let tensor = latent.into_tensor::<TestBackend>(&device);
        assert_eq!(tensor.dims(), [1, 2, 2, 2, 2]);

        let back = LatentTensor::from_tensor(tensor).unwrap();
        assert_eq!(back.spatial(), (2, 2));
        assert_eq!(back.values(), values.as_slice());
    }
}
