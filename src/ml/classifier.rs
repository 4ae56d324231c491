//! 分類器の共通インターフェース
//!
//! 摂動の最適化と転移評価は `Classify` だけに依存し、具体的なネットワーク構造は
//! `ImageClassifier` が隠蔽します。

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::ml::mobilenet::MobileNetV2;
use crate::ml::resnet::ResNet50;

/// 正規化済み画像 → クラスごとのロジット
pub trait Classify<B: Backend> {
    /// # 引数
    /// - `images`: 正規化済み画像 [batch_size, 3, H, W]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

/// ネットワーク構造
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    ResNet50,
    MobileNetV2,
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::ResNet50 => write!(f, "ResNet50"),
            Architecture::MobileNetV2 => write!(f, "MobileNetV2"),
        }
    }
}

impl std::str::FromStr for Architecture {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "resnet50" => Ok(Architecture::ResNet50),
            "mobilenetv2" => Ok(Architecture::MobileNetV2),
            other => anyhow::bail!("unknown architecture: {}", other),
        }
    }
}

/// 事前学習済み画像分類器
#[derive(Debug)]
pub enum ImageClassifier<B: Backend> {
    ResNet50(ResNet50<B>),
    MobileNetV2(MobileNetV2<B>),
}

impl<B: Backend> ImageClassifier<B> {
    /// 構造のみを初期化（重みは未学習）
    pub fn init(architecture: Architecture, num_classes: usize, device: &B::Device) -> Self {
        match architecture {
            Architecture::ResNet50 => ImageClassifier::ResNet50(ResNet50::new(num_classes, device)),
            Architecture::MobileNetV2 => {
                ImageClassifier::MobileNetV2(MobileNetV2::new(num_classes, device))
            }
        }
    }

    pub fn architecture(&self) -> Architecture {
        match self {
            ImageClassifier::ResNet50(_) => Architecture::ResNet50,
            ImageClassifier::MobileNetV2(_) => Architecture::MobileNetV2,
        }
    }

    /// 重みを凍結する（勾配を追跡しない）
    pub fn no_grad(self) -> Self {
        match self {
            ImageClassifier::ResNet50(model) => ImageClassifier::ResNet50(model.no_grad()),
            ImageClassifier::MobileNetV2(model) => ImageClassifier::MobileNetV2(model.no_grad()),
        }
    }

    /// パラメータ総数
    pub fn num_params(&self) -> usize {
        match self {
            ImageClassifier::ResNet50(model) => model.num_params(),
            ImageClassifier::MobileNetV2(model) => model.num_params(),
        }
    }

    /// `BinBytesRecorder` で保存された重みを読み込む
    pub fn load_bytes(self, model_binary: Vec<u8>, device: &B::Device) -> anyhow::Result<Self> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let model = match self {
            ImageClassifier::ResNet50(model) => {
                let record = recorder
                    .load(model_binary, device)
                    .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
                ImageClassifier::ResNet50(model.load_record(record))
            }
            ImageClassifier::MobileNetV2(model) => {
                let record = recorder
                    .load(model_binary, device)
                    .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
                ImageClassifier::MobileNetV2(model.load_record(record))
            }
        };
        Ok(model)
    }

    /// 重みを `BinBytesRecorder` 形式のバイト列にする
    pub fn to_bytes(self) -> anyhow::Result<Vec<u8>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let bytes = match self {
            ImageClassifier::ResNet50(model) => recorder.record(model.into_record(), ()),
            ImageClassifier::MobileNetV2(model) => recorder.record(model.into_record(), ()),
        };
        bytes.map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
    }
}

impl<B: Backend> Classify<B> for ImageClassifier<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            ImageClassifier::ResNet50(model) => model.forward(images),
            ImageClassifier::MobileNetV2(model) => model.forward(images),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_architecture_from_str() {
        assert_eq!("resnet50".parse::<Architecture>().unwrap(), Architecture::ResNet50);
        assert_eq!("MobileNet_V2".parse::<Architecture>().unwrap(), Architecture::MobileNetV2);
        assert_eq!("mobilenet-v2".parse::<Architecture>().unwrap(), Architecture::MobileNetV2);
        assert!("vgg16".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_weights_survive_byte_recording() {
        let device = Default::default();
        let model = ImageClassifier::<NdArray>::init(Architecture::MobileNetV2, 4, &device);
        let images = Tensor::<NdArray, 4>::ones([1, 3, 32, 32], &device);
        let expected = model
            .logits(images.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        let bytes = model.to_bytes().unwrap();
        let restored = ImageClassifier::<NdArray>::init(Architecture::MobileNetV2, 4, &device)
            .load_bytes(bytes, &device)
            .unwrap();
        assert_eq!(restored.architecture(), Architecture::MobileNetV2);

        let actual = restored.logits(images).into_data().to_vec::<f32>().unwrap();
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-5);
        }
    }
}
