//! 分類器メタデータの定義と永続化
//!
//! tar.gz形式の分類器アーカイブに同梱され、アーキテクチャ・入力正規化・
//! クラスラベルを重みとセットで保持します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::{Architecture, Normalization, INPUT_SIZE};

/// 分類器メタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// ネットワーク構造
    pub architecture: Architecture,

    /// この分類器が要求する入力正規化
    pub normalization: Normalization,

    /// クラス識別子（WordNet ID）。インデックス順
    /// 例: ["n01440764", "n01443537", ...]
    pub class_ids: Vec<String>,

    /// クラスラベル。インデックス順
    /// 例: ["tench", "goldfish", ...]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形、通常224）
    pub input_size: u32,

    /// 重みの出所（例: "torchvision resnet50 IMAGENET1K_V1"）
    #[serde(default)]
    pub source: String,

    /// アーカイブの作成時刻（ISO8601形式）
    pub created_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        architecture: Architecture,
        normalization: Normalization,
        class_ids: Vec<String>,
        class_labels: Vec<String>,
        input_size: u32,
        source: String,
    ) -> Self {
        let created_at = chrono::Local::now().to_rfc3339();

        Self {
            architecture,
            normalization,
            class_ids,
            class_labels,
            input_size,
            source,
            created_at,
        }
    }

    /// クラス数
    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータの整合性を検証
    pub fn validate(&self) -> Result<()> {
        if self.class_labels.is_empty() {
            anyhow::bail!("metadata has no class labels");
        }
        if !self.class_ids.is_empty() && self.class_ids.len() != self.class_labels.len() {
            anyhow::bail!(
                "class id count ({}) does not match class label count ({})",
                self.class_ids.len(),
                self.class_labels.len()
            );
        }
        // 攻撃対象と転移評価の分類器は同じベース画像を共有する
        if self.input_size != INPUT_SIZE {
            anyhow::bail!(
                "unsupported input size: {} (expected {})",
                self.input_size,
                INPUT_SIZE
            );
        }
        Ok(())
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
