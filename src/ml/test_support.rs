//! テスト用の小さな分類器

use burn::{
    module::{Module, Param},
    tensor::{backend::Backend, Tensor, TensorData},
};

use crate::ml::classifier::Classify;

/// 画素を平坦化して重み行列を掛けるだけの線形分類器
#[derive(Module, Debug)]
pub struct LinearProbe<B: Backend> {
    weight: Param<Tensor<B, 2>>,
}

impl<B: Backend> LinearProbe<B> {
    /// 2クラス: クラス0は画素和、クラス1は画素和の符号反転
    pub fn opposing(features: usize, device: &B::Device) -> Self {
        let mut values = Vec::with_capacity(features * 2);
        for _ in 0..features {
            values.push(1.0f32);
            values.push(-1.0f32);
        }
        let weight = Tensor::from_data(TensorData::new(values, [features, 2]), device);
        Self {
            weight: Param::from_tensor(weight),
        }
    }
}

impl<B: Backend> Classify<B> for LinearProbe<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, height, width] = images.dims();
        images
            .reshape([batch_size, channels * height * width])
            .matmul(self.weight.val())
    }
}

/// 全画素が同じ値の画像テンソル [1, 3, size, size]
pub fn constant_pixels<B: Backend>(value: f32, size: usize, device: &B::Device) -> Tensor<B, 4> {
    Tensor::<B, 4>::ones([1, 3, size, size], device).mul_scalar(value)
}
