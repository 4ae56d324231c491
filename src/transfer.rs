//! 転移性の評価
//!
//! 別構造の分類器で敵対的画像を分類し、攻撃対象の分類器向けに作った摂動が
//! 他の分類器にも効くかを報告します。合否の閾値は設けません。

use anyhow::Result;
use burn::tensor::{backend::Backend, Tensor};
use serde::Serialize;

use crate::ml::{ClassifierProfile, Classify};
use crate::types::{format_predictions, Prediction};

/// 転移評価の結果
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    /// 評価に使った分類器
    pub model_name: String,
    /// 上位予測
    pub predictions: Vec<Prediction>,
    /// 1位がターゲットクラスか
    pub target_hit: bool,
    /// 1位が元のクラスのままか
    pub original_retained: bool,
}

/// 敵対的画像（0-255スケール、未量子化）を別の分類器で評価する
///
/// 正規化はプロファイルが持つ分類器固有のものを使います。
pub fn evaluate_transfer<B, M>(
    profile: &ClassifierProfile<B, M>,
    adversarial_pixels: Tensor<B, 4>,
    top_k: usize,
    original_index: usize,
    target_index: usize,
) -> Result<TransferReport>
where
    B: Backend,
    M: Classify<B>,
{
    let predictions = profile.top_k(adversarial_pixels, top_k)?;
    let top1 = predictions.first().map(|p| p.index);

    println!(
        "[Transfer] Top {} Predictions with {}: {}",
        top_k,
        profile.name(),
        format_predictions(&predictions)
    );

    Ok(TransferReport {
        model_name: profile.name().to_string(),
        target_hit: top1 == Some(target_index),
        original_retained: top1 == Some(original_index),
        predictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_support::{constant_pixels, LinearProbe};
    use crate::ml::Normalization;
    use crate::model::LabelDecoder;
    use burn::backend::NdArray;

    fn profile(device: &<NdArray as Backend>::Device) -> ClassifierProfile<NdArray, LinearProbe<NdArray>> {
        let decoder = LabelDecoder::new(Vec::new(), vec!["bright".to_string(), "dark".to_string()]);
        ClassifierProfile::new("linear", LinearProbe::<NdArray>::opposing(12, device), Normalization::Raw, decoder)
    }

    #[test]
    fn test_transfer_reports_target_hit() {
        let device = Default::default();
        let report = evaluate_transfer(&profile(&device), constant_pixels(-2.0, 2, &device), 2, 0, 1).unwrap();

        assert_eq!(report.model_name, "linear");
        assert_eq!(report.predictions.len(), 2);
        assert!(report.target_hit);
        assert!(!report.original_retained);
    }

    #[test]
    fn test_transfer_reports_original_retained() {
        let device = Default::default();
        let report = evaluate_transfer(&profile(&device), constant_pixels(2.0, 2, &device), 1, 0, 1).unwrap();

        assert!(!report.target_hit);
        assert!(report.original_retained);
    }

    #[test]
    fn test_transfer_uses_profile_normalization() {
        let device: <NdArray as Backend>::Device = Default::default();
        let decoder = LabelDecoder::new(Vec::new(), vec!["bright".to_string(), "dark".to_string()]);
        // Tf正規化では 100/127.5 - 1 < 0 となり、画素値が正でもクラス1が勝つ
        let tf_profile = ClassifierProfile::new(
            "linear-tf",
            LinearProbe::<NdArray>::opposing(12, &device),
            Normalization::Tf,
            decoder,
        );

        let report = evaluate_transfer(&tf_profile, constant_pixels(100.0, 2, &device), 1, 0, 1).unwrap();
        assert!(report.target_hit);
    }
}
