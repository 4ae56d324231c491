//! MobileNetV2（転移性評価用の分類器）
//!
//! torchvisionのMobileNetV2 (width multiplier 1.0) と同じ構成です。

use burn::{
    module::Module,
    nn::{
        conv::Conv2d,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::ml::layers::{conv2d, relu6, ConvBn, FrozenBatchNorm};

/// 逆残差ブロックの設定 [拡張率t, 出力チャネルc, 繰り返し数n, ストライドs]
const INVERTED_RESIDUAL_SETTINGS: [[usize; 4]; 7] = [
    [1, 16, 1, 1],
    [6, 24, 2, 2],
    [6, 32, 3, 2],
    [6, 64, 4, 2],
    [6, 96, 3, 1],
    [6, 160, 3, 2],
    [6, 320, 1, 1],
];

const STEM_CHANNELS: usize = 32;
const HEAD_CHANNELS: usize = 1280;

/// 畳み込み + バッチ正規化 + ReLU6
#[derive(Module, Debug)]
pub struct ConvBnRelu6<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: FrozenBatchNorm<B>,
}

impl<B: Backend> ConvBnRelu6<B> {
    fn new(channels: [usize; 2], kernel: usize, stride: usize, groups: usize, device: &B::Device) -> Self {
        let ConvBn { conv, bn } = ConvBn::new(channels, kernel, stride, groups, device);
        Self { conv, bn }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu6(self.bn.forward(self.conv.forward(x)))
    }
}

/// 逆残差ブロック
///
/// 1x1 (拡張, t>1のみ) → 3x3 depthwise → 1x1 (線形射影)
/// ストライド1かつ入出力チャネルが等しい場合のみ残差接続を持つ。
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBnRelu6<B>>,
    depthwise: ConvBnRelu6<B>,
    project: Conv2d<B>,
    project_bn: FrozenBatchNorm<B>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, expand_ratio: usize, device: &B::Device) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = if expand_ratio != 1 {
            Some(ConvBnRelu6::new([in_channels, hidden], 1, 1, 1, device))
        } else {
            None
        };

        Self {
            expand,
            depthwise: ConvBnRelu6::new([hidden, hidden], 3, stride, hidden, device),
            project: conv2d([hidden, out_channels], 1, 1, 1, device),
            project_bn: FrozenBatchNorm::new(out_channels, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let input_dims = x.dims();

        let out = match &self.expand {
            Some(expand) => expand.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.depthwise.forward(out);
        let out = self.project_bn.forward(self.project.forward(out));

        // 形状が一致するのはストライド1かつチャネル数不変のときだけ
        if out.dims() == input_dims {
            out + x
        } else {
            out
        }
    }
}

/// MobileNetV2
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvBnRelu6<B>,
    blocks: Vec<InvertedResidual<B>>,
    head: ConvBnRelu6<B>,
    pool: AdaptiveAvgPool2d,
    classifier: Linear<B>,
}

impl<B: Backend> MobileNetV2<B> {
    /// モデルを初期化（重みは後から `load_record` で読み込む）
    pub fn new(num_classes: usize, device: &B::Device) -> Self {
        let mut blocks = Vec::new();
        let mut in_channels = STEM_CHANNELS;

        for [expand_ratio, out_channels, repeats, stride] in INVERTED_RESIDUAL_SETTINGS {
            for i in 0..repeats {
                let block_stride = if i == 0 { stride } else { 1 };
                blocks.push(InvertedResidual::new(
                    in_channels,
                    out_channels,
                    block_stride,
                    expand_ratio,
                    device,
                ));
                in_channels = out_channels;
            }
        }

        Self {
            stem: ConvBnRelu6::new([3, STEM_CHANNELS], 3, 2, 1, device),
            blocks,
            head: ConvBnRelu6::new([in_channels, HEAD_CHANNELS], 1, 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: LinearConfig::new(HEAD_CHANNELS, num_classes).init(device),
        }
    }

    /// ブロック数（torchvisionの features.1 〜 features.17 に対応）
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// 順伝播
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem.forward(images);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = self.pool.forward(self.head.forward(x));

        let [batch_size, channels, _, _] = x.dims();
        // 推論時はDropoutを通さない
        self.classifier.forward(x.reshape([batch_size, channels]))
    }
}
