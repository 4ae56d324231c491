//! 分類器で共通に使う層
//!
//! 学習は行わないため、バッチ正規化は常に移動統計量を使う推論専用の
//! アフィン変換として実装します（Autodiffバックエンド上でもバッチ統計を使わない）。

use burn::{
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

/// バッチ正規化のepsilon（torchvision既定値）
pub const BN_EPSILON: f64 = 1e-5;

/// 推論専用のバッチ正規化
///
/// フィールド名はPyTorchの `BatchNorm2d` の state_dict キーと一致させています。
#[derive(Module, Debug)]
pub struct FrozenBatchNorm<B: Backend> {
    pub weight: Param<Tensor<B, 1>>,
    pub bias: Param<Tensor<B, 1>>,
    pub running_mean: Param<Tensor<B, 1>>,
    pub running_var: Param<Tensor<B, 1>>,
}

impl<B: Backend> FrozenBatchNorm<B> {
    /// 恒等変換で初期化
    pub fn new(num_features: usize, device: &B::Device) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([num_features], device)),
            bias: Param::from_tensor(Tensor::zeros([num_features], device)),
            running_mean: Param::from_tensor(Tensor::zeros([num_features], device)),
            running_var: Param::from_tensor(Tensor::ones([num_features], device)),
        }
    }

    /// y = (x - mean) / sqrt(var + eps) * weight + bias
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();

        let scale = self.weight.val() / self.running_var.val().add_scalar(BN_EPSILON).sqrt();
        let shift = self.bias.val() - self.running_mean.val() * scale.clone();

        x * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }
}

/// 畳み込み層の設定（バイアスなし、対称パディング）
pub fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    groups: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = (kernel - 1) / 2;
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_groups(groups)
        .with_bias(false)
        .init(device)
}

/// 畳み込み + バッチ正規化（活性化なし）
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: FrozenBatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    pub fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: conv2d(channels, kernel, stride, groups, device),
            bn: FrozenBatchNorm::new(channels[1], device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// ReLU6: min(max(x, 0), 6)
pub fn relu6<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    x.clamp(0.0, 6.0)
}
