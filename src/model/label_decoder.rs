//! 分類器出力のデコード
//!
//! アーカイブのメタデータからクラスインデックス → (クラスID, ラベル) の対応を構築し、
//! 確率ベクトルを上位k件の予測に変換します。

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::model::model_metadata::ModelMetadata;
use crate::types::Prediction;

/// クラスインデックスからラベルへのデコーダ
#[derive(Debug, Clone)]
pub struct LabelDecoder {
    class_ids: Vec<String>,
    class_labels: Vec<String>,
}

/// Keras形式 `imagenet_class_index.json` の1エントリ: `["n01440764", "tench"]`
#[derive(Debug, Deserialize)]
struct ClassIndexEntry(String, String);

impl LabelDecoder {
    /// クラスIDとラベルから作成
    pub fn new(class_ids: Vec<String>, class_labels: Vec<String>) -> Self {
        Self {
            class_ids,
            class_labels,
        }
    }

    /// メタデータから作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self::new(metadata.class_ids.clone(), metadata.class_labels.clone())
    }

    /// Keras形式のクラスインデックスJSON（`{"0": ["n01440764", "tench"], ...}`）を読み込む
    pub fn load_class_index(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read class index: {:?}", path))?;
        Self::from_class_index_json(&content)
            .context(format!("Failed to parse class index: {:?}", path))
    }

    /// Keras形式のクラスインデックスJSON文字列から作成
    pub fn from_class_index_json(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, ClassIndexEntry> = serde_json::from_str(json)?;

        let mut entries = Vec::with_capacity(raw.len());
        for (key, entry) in raw {
            let index: usize = key
                .parse()
                .context(format!("Invalid class index key: {}", key))?;
            entries.push((index, entry));
        }
        entries.sort_by_key(|(index, _)| *index);

        for (expected, (index, _)) in entries.iter().enumerate() {
            if *index != expected {
                anyhow::bail!("class index is not contiguous: missing {}", expected);
            }
        }

        let (class_ids, class_labels) = entries
            .into_iter()
            .map(|(_, ClassIndexEntry(id, label))| (id, label))
            .unzip();

        Ok(Self::new(class_ids, class_labels))
    }

    /// クラス数
    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    pub fn class_ids(&self) -> &[String] {
        &self.class_ids
    }

    pub fn class_labels(&self) -> &[String] {
        &self.class_labels
    }

    /// クラスインデックスから (クラスID, ラベル) を取得
    pub fn decode(&self, index: usize) -> Option<(String, String)> {
        let label = self.class_labels.get(index)?.clone();
        let class_id = self.class_ids.get(index).cloned().unwrap_or_default();
        Some((class_id, label))
    }

    /// 確率ベクトルから上位k件の予測を作成
    ///
    /// 信頼度の降順、同値の場合はインデックスの昇順に並べます。
    pub fn top_k(&self, probabilities: &[f32], k: usize) -> Result<Vec<Prediction>> {
        if probabilities.len() != self.num_classes() {
            anyhow::bail!(
                "classifier produced {} scores but the decoder knows {} classes",
                probabilities.len(),
                self.num_classes()
            );
        }

        let mut order: Vec<usize> = (0..probabilities.len()).collect();
        order.sort_by(|&a, &b| {
            probabilities[b]
                .total_cmp(&probabilities[a])
                .then_with(|| a.cmp(&b))
        });

        order
            .into_iter()
            .take(k)
            .map(|index| {
                let (class_id, label) = self
                    .decode(index)
                    .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", index))?;
                Ok(Prediction {
                    index,
                    class_id,
                    label,
                    confidence: probabilities[index],
                })
            })
            .collect()
    }
}
