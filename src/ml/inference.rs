//! 分類器プロファイル（分類器・入力正規化・ラベルデコーダの組）
//!
//! 分類器ごとに要求する正規化が異なるため、3つを1つの値として持ち回ります。
//! 同じ画素テンソルを渡せば、各プロファイルが自分の正規化を適用します。

use anyhow::{Context, Result};
use burn::tensor::{activation::softmax, backend::Backend, Tensor};
use std::path::Path;

use crate::ml::classifier::{Classify, ImageClassifier};
use crate::ml::preprocess::Normalization;
use crate::model::{load_model_with_metadata, print_metadata_info, LabelDecoder, ModelMetadata};
use crate::types::Prediction;

/// 分類器プロファイル
pub struct ClassifierProfile<B: Backend, M = ImageClassifier<B>> {
    name: String,
    model: M,
    normalization: Normalization,
    decoder: LabelDecoder,
    _backend: std::marker::PhantomData<B>,
}

impl<B: Backend, M: Classify<B>> ClassifierProfile<B, M> {
    pub fn new(name: impl Into<String>, model: M, normalization: Normalization, decoder: LabelDecoder) -> Self {
        Self {
            name: name.into(),
            model,
            normalization,
            decoder,
            _backend: std::marker::PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn decoder(&self) -> &LabelDecoder {
        &self.decoder
    }

    /// 0-255スケールの画素テンソルを正規化して分類器に通す
    pub fn logits(&self, pixels: Tensor<B, 4>) -> Tensor<B, 2> {
        self.model.logits(self.normalization.apply(pixels))
    }

    /// クラスごとの確率（バッチ先頭の1枚分）
    pub fn probabilities(&self, pixels: Tensor<B, 4>) -> Result<Vec<f32>> {
        let logits = self.logits(pixels);
        let [_, num_classes] = logits.dims();
        let probs = softmax(logits, 1).narrow(0, 0, 1).reshape([num_classes]);
        probs
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
    }

    /// 上位k件の予測
    pub fn top_k(&self, pixels: Tensor<B, 4>, k: usize) -> Result<Vec<Prediction>> {
        let probabilities = self.probabilities(pixels)?;
        self.decoder.top_k(&probabilities, k)
    }
}

impl<B: Backend> ClassifierProfile<B, ImageClassifier<B>> {
    /// 分類器アーカイブ（tar.gz）から読み込む
    ///
    /// 重みは凍結され、以降の最適化で更新されることはありません。
    pub fn load(model_path: &Path, device: &B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path)
            .context(format!("Failed to load classifier archive: {:?}", model_path))?;
        metadata.validate()?;
        print_metadata_info(&metadata);

        Self::from_parts(metadata, model_binary, device)
    }

    /// メタデータと重みのバイト列から作成
    pub fn from_parts(metadata: ModelMetadata, model_binary: Vec<u8>, device: &B::Device) -> Result<Self> {
        let model = ImageClassifier::init(metadata.architecture, metadata.num_classes(), device)
            .load_bytes(model_binary, device)?
            .no_grad();

        println!(
            "[Model] {} を読み込みました ({:.2}M params)",
            metadata.architecture,
            model.num_params() as f64 / 1_000_000.0
        );

        Ok(Self::new(
            metadata.architecture.to_string(),
            model,
            metadata.normalization,
            LabelDecoder::from_metadata(&metadata),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::classifier::Architecture;
    use crate::ml::test_support::{constant_pixels, LinearProbe};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_top_k_decodes_highest_logit() {
        let device = Default::default();
        // クラス0: 画素和に比例、クラス1: 画素和に反比例
        let probe = LinearProbe::<TestBackend>::opposing(12, &device);
        let decoder = LabelDecoder::new(
            vec!["n0".to_string(), "n1".to_string()],
            vec!["bright".to_string(), "dark".to_string()],
        );
        let profile = ClassifierProfile::new("probe", probe, Normalization::Raw, decoder);

        let predictions = profile.top_k(constant_pixels(1.0, 2, &device), 2).unwrap();
        assert_eq!(predictions[0].label, "bright");
        assert_eq!(predictions[1].label, "dark");
        assert!(predictions[0].confidence > 0.99);

        let predictions = profile.top_k(constant_pixels(-1.0, 2, &device), 1).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].index, 1);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Default::default();
        let probe = LinearProbe::<TestBackend>::opposing(12, &device);
        let decoder = LabelDecoder::new(Vec::new(), vec!["a".to_string(), "b".to_string()]);
        let profile = ClassifierProfile::new("probe", probe, Normalization::Tf, decoder);

        let probabilities = profile.probabilities(constant_pixels(100.0, 2, &device)).unwrap();
        let total: f32 = probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_from_parts_builds_frozen_classifier() {
        let device = Default::default();
        let bytes = ImageClassifier::<TestBackend>::init(Architecture::MobileNetV2, 3, &device)
            .to_bytes()
            .unwrap();
        let metadata = ModelMetadata::new(
            Architecture::MobileNetV2,
            Normalization::Tf,
            vec!["n0".to_string(), "n1".to_string(), "n2".to_string()],
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            224,
            String::new(),
        );

        let profile = ClassifierProfile::<TestBackend>::from_parts(metadata, bytes, &device).unwrap();
        assert_eq!(profile.name(), "MobileNetV2");
        assert_eq!(profile.normalization(), Normalization::Tf);

        let predictions = profile.top_k(constant_pixels(128.0, 32, &device), 3).unwrap();
        assert_eq!(predictions.len(), 3);
    }
}
