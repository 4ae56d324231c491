//! 攻撃ドライバ
//!
//! ターゲット解決 → 前処理 → 分類 → 摂動の最適化 → 再分類 → 保存・表示 → 転移評価
//! を順に実行します。ターゲットクラスが解決できない場合のみ、画像やモデルに
//! 触れる前に中断します。それ以外の失敗もすべてその場で実行を終了します。

use anyhow::{Context, Result};
use burn::tensor::{backend::AutodiffBackend, Tensor};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::display;
use crate::label_index::LabelIndex;
use crate::ml::{
    load_base_tensor, reconstruct_adversarial, ClassifierProfile, Classify, Perturbation,
    PerturbationOptimizer, StepReport, INPUT_SIZE,
};
use crate::model::{resolve_resource_path, AppConfig};
use crate::transfer::{evaluate_transfer, TransferReport};
use crate::types::{format_predictions, Prediction};

/// 呼び出し側で区別が必要な失敗
#[derive(Debug, Error)]
pub enum AttackError {
    #[error("Target class does not exist in ImageNet: {0}")]
    UnknownTargetClass(String),
    #[error("Classifier returned no predictions")]
    EmptyPrediction,
}

/// 攻撃の入力
#[derive(Debug, Clone)]
pub struct AttackRequest {
    /// 入力画像
    pub image_path: PathBuf,
    /// ターゲットクラス名（大文字小文字・アンダースコアは区別しない）
    pub target_class: String,
}

/// 攻撃の結果
#[derive(Debug, Clone, Serialize)]
pub struct AttackReport {
    pub target_index: usize,
    pub original_index: usize,
    /// 元画像に対する上位予測
    pub original_predictions: Vec<Prediction>,
    /// 敵対的画像に対する上位予測（攻撃対象の分類器）
    pub adversarial_predictions: Vec<Prediction>,
    /// 転移評価の結果
    pub transfer: Option<TransferReport>,
    /// 各ステップの合計損失
    pub loss_history: Vec<f32>,
    /// 最終的な摂動 (C, H, W)
    #[serde(skip)]
    pub perturbation: Vec<f32>,
    /// 保存した敵対的画像
    pub output_path: PathBuf,
    /// 攻撃対象の分類器の1位がターゲットになったか
    pub success: bool,
}

/// 攻撃ドライバ
pub struct AttackDriver {
    config: AppConfig,
}

impl AttackDriver {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// ターゲットクラスを解決する
    pub fn resolve_target(&self, labels: &LabelIndex, target_class: &str) -> Result<usize> {
        labels
            .resolve(target_class)
            .ok_or_else(|| AttackError::UnknownTargetClass(target_class.to_string()).into())
    }

    /// 設定されたアーカイブを読み込んで攻撃全体を実行する
    pub fn run<B: AutodiffBackend>(&self, request: &AttackRequest, device: &B::Device) -> Result<AttackReport> {
        let label_path = resolve_resource_path(&self.config.paths.label_index_path);
        let labels = LabelIndex::load(&label_path)?;

        // 画像・モデルに触れる前にターゲットを確定させる
        let target_index = self.resolve_target(&labels, &request.target_class)?;

        println!("Input Filename: {}", request.image_path.display());
        println!("Target Class: {}", request.target_class);
        println!("Target Class Index: {}", target_index);

        let base = load_base_tensor::<B>(&request.image_path, INPUT_SIZE, device)?;

        let primary_path = resolve_resource_path(&self.config.models.primary_model_path);
        let primary = ClassifierProfile::<B>::load(&primary_path, device)?;

        // 転移評価用の分類器は敵対的画像の保存後に読み込む
        let load_transfer = || match self.config.models.transfer_model_path {
            Some(ref path) => ClassifierProfile::<B>::load(&resolve_resource_path(path), device).map(Some),
            None => Ok(None),
        };

        self.execute(&labels, &primary, load_transfer, base, target_index)
    }

    /// 読み込み済みの分類器とベース画像で攻撃を実行する
    ///
    /// `load_transfer` は敵対的画像の保存・表示の後に呼ばれます。読み込みに失敗した
    /// 場合は警告を出して転移評価を省略します。
    pub fn execute<B, M, T, L>(
        &self,
        labels: &LabelIndex,
        primary: &ClassifierProfile<B, M>,
        load_transfer: L,
        base: Tensor<B, 4>,
        target_index: usize,
    ) -> Result<AttackReport>
    where
        B: AutodiffBackend,
        M: Classify<B>,
        T: Classify<B>,
        L: FnOnce() -> Result<Option<ClassifierProfile<B, T>>>,
    {
        let settings = &self.config.attack;
        let top_k = settings.top_k;

        // 元画像の分類
        let original_predictions = primary.top_k(base.clone(), top_k)?;
        println!("Top {} Predictions: {}", top_k, format_predictions(&original_predictions));

        let top1 = original_predictions
            .first()
            .ok_or(AttackError::EmptyPrediction)?;
        let original_index = top1.index;
        check_label_round_trip(labels, top1);
        println!("Original Class Index: {}", original_index);

        // 摂動の最適化
        let optimizer = PerturbationOptimizer::new(settings.clone());
        let perturbation = Perturbation::zeros(base.dims(), &base.device());
        let outcome = optimizer.optimize(
            primary,
            base.clone(),
            perturbation,
            original_index,
            target_index,
            |_: &StepReport| {},
        );

        let delta = outcome.perturbation.value().detach();
        let adversarial_pixels = base.clone() + delta.clone();

        // 敵対的画像の復元と保存
        let adversarial_image = reconstruct_adversarial(base, delta)?;
        let output_path = PathBuf::from(&self.config.paths.output_path);
        adversarial_image
            .save(&output_path)
            .context(format!("Failed to save adversarial image: {:?}", output_path))?;
        println!("[Attack] 敵対的画像を保存しました: {}", output_path.display());

        if let Some(ref loss_path) = self.config.paths.loss_history_path {
            write_loss_history(Path::new(loss_path), &outcome.loss_history)?;
            println!("[Attack] 損失履歴を保存しました: {}", loss_path);
        }

        // 攻撃対象の分類器で再分類（量子化前の画素値を使う）
        let adversarial_predictions = primary.top_k(adversarial_pixels.clone(), top_k)?;
        println!(
            "Top {} Predictions on Adversarial Image: {}",
            top_k,
            format_predictions(&adversarial_predictions)
        );

        if self.config.display.show_window {
            let top1 = adversarial_predictions
                .first()
                .ok_or(AttackError::EmptyPrediction)?;
            display::show_with_caption(
                &adversarial_image,
                &display::overlay_caption(top1),
                &self.config.display.window_name,
            )?;
        }

        // 別構造の分類器での転移評価
        let transfer = match load_transfer() {
            Ok(Some(profile)) => Some(evaluate_transfer(
                &profile,
                adversarial_pixels,
                top_k,
                original_index,
                target_index,
            )?),
            Ok(None) => {
                println!("[Transfer] 転移評価用の分類器が未設定のため省略します");
                None
            }
            Err(e) => {
                eprintln!("[Transfer] 警告: 転移評価用の分類器を読み込めないため省略します: {:#}", e);
                None
            }
        };

        let success = adversarial_predictions
            .first()
            .map(|p| p.index == target_index)
            .unwrap_or(false);

        Ok(AttackReport {
            target_index,
            original_index,
            original_predictions,
            adversarial_predictions,
            transfer,
            loss_history: outcome.loss_history,
            perturbation: outcome.perturbation.to_vec()?,
            output_path,
            success,
        })
    }
}

/// 正常終了
pub const EXIT_SUCCESS: u8 = 0;
/// ターゲットクラスが解決できない
pub const EXIT_UNKNOWN_TARGET: u8 = 2;
/// それ以外の失敗
pub const EXIT_FAILURE: u8 = 1;

/// 失敗をプロセスの終了コードに対応付ける
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<AttackError>() {
        Some(AttackError::UnknownTargetClass(_)) => EXIT_UNKNOWN_TARGET,
        _ => EXIT_FAILURE,
    }
}

/// 予測ラベルをラベルマップで引き直し、分類器の出力インデックスと照合する
///
/// 元クラスのインデックスには分類器の出力をそのまま使うため、結果は警告のみ。
fn check_label_round_trip(labels: &LabelIndex, prediction: &Prediction) {
    match labels.resolve(&prediction.label) {
        Some(index) if index == prediction.index => {}
        Some(index) => eprintln!(
            "[Attack] 警告: ラベル '{}' はラベルマップ上 {} ですが、分類器の出力は {} です",
            prediction.label, index, prediction.index
        ),
        None => eprintln!(
            "[Attack] 警告: ラベル '{}' がラベルマップに存在しません。分類器の出力 {} を使用します",
            prediction.label, prediction.index
        ),
    }
}

/// 損失履歴をCSV (step,loss) で書き出す
pub fn write_loss_history(path: &Path, loss_history: &[f32]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context(format!("Failed to create loss history: {:?}", path))?;

    writer.write_record(["step", "loss"])?;
    for (step, loss) in loss_history.iter().enumerate() {
        writer.write_record([step.to_string(), loss.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}
