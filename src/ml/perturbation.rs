//! 標的型の敵対的摂動の最適化
//!
//! ベース画像に加える摂動 delta だけを学習対象とし、分類器の重みとベース画像は固定します。
//!
//! 各ステップ:
//! 1. adversary = normalize(base + delta) を分類器に通す
//! 2. loss = -CE(scores, original) + CE(scores, target)
//! 3. delta についての勾配でAdamを1ステップ進める
//! 4. delta を [-epsilon, epsilon] に切り詰めて置き換える
//!
//! 収束判定や早期終了は行わず、常に指定ステップ数を実行します。

use anyhow::Result;
use burn::{
    module::{Module, Param},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion, Int, Tensor},
};

use crate::ml::classifier::Classify;
use crate::ml::inference::ClassifierProfile;
use crate::model::AttackSettings;

/// 学習対象の摂動（ベース画像と同じ形状）
#[derive(Module, Debug)]
pub struct Perturbation<B: Backend> {
    pub delta: Param<Tensor<B, 4>>,
}

impl<B: Backend> Perturbation<B> {
    /// ゼロで初期化
    pub fn zeros(shape: [usize; 4], device: &B::Device) -> Self {
        Self {
            delta: Param::from_tensor(Tensor::zeros(shape, device)),
        }
    }

    /// 現在の摂動値
    pub fn value(&self) -> Tensor<B, 4> {
        self.delta.val()
    }

    /// 摂動を [-epsilon, epsilon] に切り詰めた値で置き換える
    pub fn clip(self, epsilon: f64) -> Self {
        let clipped = self.delta.val().clamp(-epsilon, epsilon).detach().require_grad();
        // ParamIdを引き継ぎ、Adamのモーメント状態を維持する
        Self {
            delta: Param::initialized(self.delta.id, clipped),
        }
    }

    /// 摂動の最大絶対値
    pub fn max_abs(&self) -> f32 {
        self.delta.val().abs().max().into_scalar().elem::<f32>()
    }

    /// 摂動値を (C, H, W) 順に平坦化して取得
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        self.delta
            .val()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("摂動値の取得エラー: {:?}", e))
    }
}

/// 1ステップ分の進捗
#[derive(Debug, Clone, Copy)]
pub struct StepReport {
    /// ステップ番号（0始まり）
    pub step: usize,
    /// 更新前に計算した合計損失
    pub loss: f32,
    /// 切り詰め後の摂動の最大絶対値
    pub max_abs_delta: f32,
    /// このステップの損失をコンソールに出力したか
    pub logged: bool,
}

/// 最適化結果
pub struct PerturbationOutcome<B: Backend> {
    pub perturbation: Perturbation<B>,
    /// 各ステップの合計損失
    pub loss_history: Vec<f32>,
}

/// 摂動オプティマイザ
pub struct PerturbationOptimizer {
    settings: AttackSettings,
}

impl PerturbationOptimizer {
    pub fn new(settings: AttackSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AttackSettings {
        &self.settings
    }

    /// 合計損失 = -CE(original) + CE(target)
    pub fn total_loss<B: Backend>(
        logits: Tensor<B, 2>,
        original_index: usize,
        target_index: usize,
    ) -> Tensor<B, 1> {
        let device = logits.device();
        let cross_entropy = CrossEntropyLossConfig::new().init(&device);

        let original = Tensor::<B, 1, Int>::from_ints([original_index as i64].as_slice(), &device);
        let target = Tensor::<B, 1, Int>::from_ints([target_index as i64].as_slice(), &device);

        let original_loss = cross_entropy.forward(logits.clone(), original).neg();
        let target_loss = cross_entropy.forward(logits, target);
        original_loss + target_loss
    }

    /// 固定ステップ数だけ摂動を最適化する
    ///
    /// # 引数
    /// - `profile`: 攻撃対象の分類器プロファイル（重みは凍結済みであること）
    /// - `base`: ベース画像 [1, 3, H, W]（0-255スケール）
    /// - `perturbation`: 初期摂動（通常はゼロ）
    /// - `progress_callback`: 各ステップ終了時に呼ばれる
    pub fn optimize<B, M, F>(
        &self,
        profile: &ClassifierProfile<B, M>,
        base: Tensor<B, 4>,
        perturbation: Perturbation<B>,
        original_index: usize,
        target_index: usize,
        mut progress_callback: F,
    ) -> PerturbationOutcome<B>
    where
        B: AutodiffBackend,
        M: Classify<B>,
        F: FnMut(&StepReport),
    {
        let settings = &self.settings;
        let mut optimizer = AdamConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(settings.adam_epsilon)
            .init::<B, Perturbation<B>>();

        let base = base.detach();
        let mut perturbation = perturbation;
        let mut loss_history = Vec::with_capacity(settings.num_steps);

        for step in 0..settings.num_steps {
            let adversary = base.clone() + perturbation.value();
            let logits = profile.logits(adversary);
            let loss = Self::total_loss(logits, original_index, target_index);

            let loss_value = loss.clone().into_scalar().elem::<f32>();
            loss_history.push(loss_value);

            let logged = settings.log_interval > 0 && step % settings.log_interval == 0;
            if logged {
                println!("[Attack] step: {}, loss: {}", step, loss_value);
            }

            // 勾配は摂動にのみ流れる（ベース画像はdetach、分類器はno_grad）
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &perturbation);
            perturbation = optimizer.step(settings.learning_rate, perturbation, grads);
            perturbation = perturbation.clip(settings.epsilon);

            progress_callback(&StepReport {
                step,
                loss: loss_value,
                max_abs_delta: perturbation.max_abs(),
                logged,
            });
        }

        PerturbationOutcome {
            perturbation,
            loss_history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::preprocess::Normalization;
    use crate::ml::test_support::{constant_pixels, LinearProbe};
    use crate::model::LabelDecoder;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    const SIZE: usize = 2;
    const FEATURES: usize = 3 * SIZE * SIZE;

    fn probe_profile(device: &<TestBackend as Backend>::Device) -> ClassifierProfile<TestBackend, LinearProbe<TestBackend>> {
        let probe = LinearProbe::opposing(FEATURES, device).no_grad();
        let decoder = LabelDecoder::new(Vec::new(), vec!["bright".to_string(), "dark".to_string()]);
        ClassifierProfile::new("probe", probe, Normalization::Raw, decoder)
    }

    fn settings(epsilon: f64, learning_rate: f64, num_steps: usize) -> AttackSettings {
        AttackSettings {
            epsilon,
            learning_rate,
            num_steps,
            log_interval: 0,
            ..AttackSettings::default()
        }
    }

    #[test]
    fn test_perturbation_stays_within_epsilon_every_step() {
        let device = Default::default();
        let profile = probe_profile(&device);
        let epsilon = 0.05;
        // 学習率がepsilonより大きいため、切り詰めがなければ1ステップで範囲外に出る
        let optimizer = PerturbationOptimizer::new(settings(epsilon, 1.0, 20));

        let mut reports = Vec::new();
        let outcome = optimizer.optimize(
            &profile,
            constant_pixels(1.0, SIZE, &device),
            Perturbation::zeros([1, 3, SIZE, SIZE], &device),
            0,
            1,
            |report| reports.push(*report),
        );

        assert_eq!(reports.len(), 20);
        for report in &reports {
            assert!(report.max_abs_delta <= epsilon as f32 + 1e-6, "step {}: {}", report.step, report.max_abs_delta);
        }
        // 上限に張り付いている
        assert!((reports[19].max_abs_delta - epsilon as f32).abs() < 1e-6);

        let values = outcome.perturbation.to_vec().unwrap();
        assert!(values.iter().all(|v| v.abs() <= epsilon as f32 + 1e-6));
    }

    #[test]
    fn test_loss_decreases_without_diverging() {
        let device = Default::default();
        let profile = probe_profile(&device);
        let optimizer = PerturbationOptimizer::new(settings(2.0, 0.1, 50));

        let outcome = optimizer.optimize(
            &profile,
            constant_pixels(1.0, SIZE, &device),
            Perturbation::zeros([1, 3, SIZE, SIZE], &device),
            0,
            1,
            |_| {},
        );

        let history = &outcome.loss_history;
        assert_eq!(history.len(), 50);
        assert!(history.iter().all(|loss| loss.is_finite()));
        assert!(history[49] < history[0]);
    }

    #[test]
    fn test_attack_flips_prediction_to_target() {
        let device = Default::default();
        let profile = probe_profile(&device);
        let optimizer = PerturbationOptimizer::new(settings(2.0, 0.1, 100));
        let base = constant_pixels(1.0, SIZE, &device);

        let before = profile.top_k(base.clone(), 1).unwrap();
        assert_eq!(before[0].index, 0);

        let outcome = optimizer.optimize(
            &profile,
            base.clone(),
            Perturbation::zeros([1, 3, SIZE, SIZE], &device),
            0,
            1,
            |_| {},
        );

        let after = profile
            .top_k(base + outcome.perturbation.value(), 1)
            .unwrap();
        assert_eq!(after[0].index, 1);
        assert_eq!(after[0].label, "dark");
    }

    #[test]
    fn test_optimization_is_deterministic() {
        let device = Default::default();
        let profile = probe_profile(&device);
        let optimizer = PerturbationOptimizer::new(settings(0.5, 0.05, 15));

        let run = || {
            optimizer
                .optimize(
                    &profile,
                    constant_pixels(3.0, SIZE, &device),
                    Perturbation::zeros([1, 3, SIZE, SIZE], &device),
                    0,
                    1,
                    |_| {},
                )
                .perturbation
                .to_vec()
                .unwrap()
        };

        let first = run();
        let second = run();
        assert_eq!(
            first.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            second.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_loss_is_reported_every_log_interval() {
        let device = Default::default();
        let profile = probe_profile(&device);
        let optimizer = PerturbationOptimizer::new(AttackSettings {
            log_interval: 10,
            ..settings(0.5, 0.05, 25)
        });

        let mut logged_steps = Vec::new();
        optimizer.optimize(
            &profile,
            constant_pixels(1.0, SIZE, &device),
            Perturbation::zeros([1, 3, SIZE, SIZE], &device),
            0,
            1,
            |report| {
                if report.logged {
                    logged_steps.push(report.step);
                }
            },
        );

        assert_eq!(logged_steps, vec![0, 10, 20]);
    }

    #[test]
    fn test_loss_is_not_reported_when_interval_is_zero() {
        let device = Default::default();
        let profile = probe_profile(&device);
        let optimizer = PerturbationOptimizer::new(settings(0.5, 0.05, 5));

        let mut logged = 0;
        optimizer.optimize(
            &profile,
            constant_pixels(1.0, SIZE, &device),
            Perturbation::zeros([1, 3, SIZE, SIZE], &device),
            0,
            1,
            |report| logged += report.logged as usize,
        );

        assert_eq!(logged, 0);
    }

    #[test]
    fn test_total_loss_is_zero_when_classes_match() {
        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::from_floats([[2.0, -1.0, 0.5]], &device);
        let loss = PerturbationOptimizer::total_loss(logits, 1, 1)
            .into_scalar()
            .elem::<f32>();
        assert!(loss.abs() < 1e-6);
    }
}
