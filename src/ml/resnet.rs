//! ResNet-50（摂動を最適化する主分類器）
//!
//! torchvisionのResNet-50 (v1.5) と同じ構成・パラメータ名です。
//! ストライドはボトルネックの3x3畳み込みに置きます。

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        conv::Conv2d,
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::ml::layers::{conv2d, ConvBn, FrozenBatchNorm};

/// ボトルネックの出力チャネル倍率
const EXPANSION: usize = 4;

/// 各ステージのブロック数
const STAGE_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// ボトルネックブロック
///
/// 1x1 (縮小) → 3x3 (stride) → 1x1 (拡大) + ショートカット
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: FrozenBatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: FrozenBatchNorm<B>,
    conv3: Conv2d<B>,
    bn3: FrozenBatchNorm<B>,
    downsample: Option<ConvBn<B>>,
    activation: Relu,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_channels: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = planes * EXPANSION;
        let downsample = if stride != 1 || in_channels != out_channels {
            Some(ConvBn::new([in_channels, out_channels], 1, stride, 1, device))
        } else {
            None
        };

        Self {
            conv1: conv2d([in_channels, planes], 1, 1, 1, device),
            bn1: FrozenBatchNorm::new(planes, device),
            conv2: conv2d([planes, planes], 3, stride, 1, device),
            bn2: FrozenBatchNorm::new(planes, device),
            conv3: conv2d([planes, out_channels], 1, 1, 1, device),
            bn3: FrozenBatchNorm::new(out_channels, device),
            downsample,
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.activation.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.activation.forward(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));

        self.activation.forward(out + identity)
    }
}

/// ステージを構築（先頭ブロックのみストライドを持つ）
fn make_stage<B: Backend>(
    in_channels: &mut usize,
    planes: usize,
    blocks: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<Bottleneck<B>> {
    (0..blocks)
        .map(|i| {
            let block_stride = if i == 0 { stride } else { 1 };
            let block = Bottleneck::new(*in_channels, planes, block_stride, device);
            *in_channels = planes * EXPANSION;
            block
        })
        .collect()
}

/// ResNet-50
#[derive(Module, Debug)]
pub struct ResNet50<B: Backend> {
    conv1: Conv2d<B>,
    bn1: FrozenBatchNorm<B>,
    maxpool: MaxPool2d,
    layer1: Vec<Bottleneck<B>>,
    layer2: Vec<Bottleneck<B>>,
    layer3: Vec<Bottleneck<B>>,
    layer4: Vec<Bottleneck<B>>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ResNet50<B> {
    /// モデルを初期化（重みは後から `load_record` で読み込む）
    pub fn new(num_classes: usize, device: &B::Device) -> Self {
        let mut in_channels = 64;
        let layer1 = make_stage(&mut in_channels, 64, STAGE_BLOCKS[0], 1, device);
        let layer2 = make_stage(&mut in_channels, 128, STAGE_BLOCKS[1], 2, device);
        let layer3 = make_stage(&mut in_channels, 256, STAGE_BLOCKS[2], 2, device);
        let layer4 = make_stage(&mut in_channels, 512, STAGE_BLOCKS[3], 2, device);

        Self {
            conv1: conv2d([3, 64], 7, 2, 1, device),
            bn1: FrozenBatchNorm::new(64, device),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(512 * EXPANSION, num_classes).init(device),
            activation: Relu::new(),
        }
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: 正規化済み画像 [batch_size, 3, H, W]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.bn1.forward(self.conv1.forward(images));
        let x = self.maxpool.forward(self.activation.forward(x));

        let x = self
            .layer1
            .iter()
            .chain(self.layer2.iter())
            .chain(self.layer3.iter())
            .chain(self.layer4.iter())
            .fold(x, |x, block| block.forward(x));

        let x = self.avgpool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        self.fc.forward(x.reshape([batch_size, channels]))
    }
}
