//! torchvisionの事前学習済み重み (.pth) から分類器アーカイブを作成する
//!
//! burn-import の `PyTorchFileRecorder` でチェックポイントを読み込み、
//! torchvision のキー名をこのクレートのモジュール構造へ付け替えます。
//! Linear層の重みの転置は burn-import 側で行われます。

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::path::{Path, PathBuf};

use crate::label_index::LabelIndex;
use crate::ml::{Architecture, ImageClassifier, Normalization, INPUT_SIZE};
use crate::model::{save_model_with_metadata, LabelDecoder, ModelMetadata};

/// MobileNetV2の逆残差ブロック数（features.1 〜 features.17）
const MOBILENET_BLOCKS: usize = 17;

/// torchvisionのキー名 → このクレートのキー名（正規表現, 置換文字列）
pub fn key_remaps(architecture: Architecture) -> Vec<(String, String)> {
    match architecture {
        Architecture::ResNet50 => vec![
            (r"downsample\.0\.".to_string(), "downsample.conv.".to_string()),
            (r"downsample\.1\.".to_string(), "downsample.bn.".to_string()),
        ],
        Architecture::MobileNetV2 => mobilenet_remaps(),
    }
}

fn mobilenet_remaps() -> Vec<(String, String)> {
    let mut remaps = vec![
        (r"^features\.0\.0\.".to_string(), "stem.conv.".to_string()),
        (r"^features\.0\.1\.".to_string(), "stem.bn.".to_string()),
        // 拡張率1のブロックは拡張層を持たない
        (r"^features\.1\.conv\.0\.0\.".to_string(), "blocks.0.depthwise.conv.".to_string()),
        (r"^features\.1\.conv\.0\.1\.".to_string(), "blocks.0.depthwise.bn.".to_string()),
        (r"^features\.1\.conv\.1\.".to_string(), "blocks.0.project.".to_string()),
        (r"^features\.1\.conv\.2\.".to_string(), "blocks.0.project_bn.".to_string()),
    ];

    for feature in 2..=MOBILENET_BLOCKS {
        let block = feature - 1;
        let pairs = [
            ("conv\\.0\\.0\\.", "expand.conv."),
            ("conv\\.0\\.1\\.", "expand.bn."),
            ("conv\\.1\\.0\\.", "depthwise.conv."),
            ("conv\\.1\\.1\\.", "depthwise.bn."),
            ("conv\\.2\\.", "project."),
            ("conv\\.3\\.", "project_bn."),
        ];
        for (from, to) in pairs {
            remaps.push((
                format!(r"^features\.{}\.{}", feature, from),
                format!("blocks.{}.{}", block, to),
            ));
        }
    }

    let head = MOBILENET_BLOCKS + 1;
    remaps.push((format!(r"^features\.{}\.0\.", head), "head.conv.".to_string()));
    remaps.push((format!(r"^features\.{}\.1\.", head), "head.bn.".to_string()));
    remaps.push((r"^classifier\.1\.".to_string(), "classifier.".to_string()));
    remaps
}

/// .pth ファイルから分類器を読み込む
pub fn import_pytorch_weights<B: Backend>(
    weights_path: &Path,
    architecture: Architecture,
    num_classes: usize,
    device: &B::Device,
) -> Result<ImageClassifier<B>> {
    let args = key_remaps(architecture)
        .into_iter()
        .fold(LoadArgs::new(weights_path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(&pattern, &replacement)
        });
    let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();

    let classifier = match ImageClassifier::init(architecture, num_classes, device) {
        ImageClassifier::ResNet50(model) => {
            let record = recorder
                .load(args, device)
                .map_err(|e| anyhow::anyhow!("PyTorch重みの読み込みエラー: {:?}", e))?;
            ImageClassifier::ResNet50(model.load_record(record))
        }
        ImageClassifier::MobileNetV2(model) => {
            let record = recorder
                .load(args, device)
                .map_err(|e| anyhow::anyhow!("PyTorch重みの読み込みエラー: {:?}", e))?;
            ImageClassifier::MobileNetV2(model.load_record(record))
        }
    };

    println!(
        "[Import] {} の重みを読み込みました: {}",
        architecture,
        weights_path.display()
    );
    Ok(classifier)
}

/// アーカイブ作成の入力
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub weights_path: PathBuf,
    /// Keras形式のクラスインデックス (`{"0": ["n01440764", "tench"], ...}`)
    pub class_index_path: PathBuf,
    pub architecture: Architecture,
    /// torchvisionの重みは通常 `Torch`
    pub normalization: Normalization,
    pub output_path: PathBuf,
    /// 攻撃時のターゲット解決に使うラベルマップの出力先
    pub label_index_path: Option<PathBuf>,
}

/// .pth とクラスインデックスから分類器アーカイブを作成する
pub fn build_archive<B: Backend>(request: &ImportRequest, device: &B::Device) -> Result<PathBuf> {
    let decoder = LabelDecoder::load_class_index(&request.class_index_path)?;
    let classifier = import_pytorch_weights::<B>(
        &request.weights_path,
        request.architecture,
        decoder.num_classes(),
        device,
    )?;

    let metadata = ModelMetadata::new(
        request.architecture,
        request.normalization,
        decoder.class_ids().to_vec(),
        decoder.class_labels().to_vec(),
        INPUT_SIZE,
        request.weights_path.display().to_string(),
    );
    metadata.validate()?;

    let model_binary = classifier.to_bytes()?;
    let archive = save_model_with_metadata(&request.output_path, &metadata, &model_binary)
        .context(format!("Failed to write classifier archive: {:?}", request.output_path))?;

    println!("[Import] アーカイブを保存しました: {}", archive.display());

    if let Some(ref label_index_path) = request.label_index_path {
        write_label_index(&decoder, label_index_path)?;
    }
    Ok(archive)
}

/// クラスインデックスからラベルマップ (`{"golf ball": 574, ...}`) を書き出す
pub fn write_label_index(decoder: &LabelDecoder, path: &Path) -> Result<LabelIndex> {
    let labels = LabelIndex::from_class_labels(decoder.class_labels());
    labels.save(path)?;
    println!(
        "[Import] ラベルマップを保存しました: {} ({}件)",
        path.display(),
        labels.len()
    );
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(remaps: &[(String, String)], pattern: &str) -> Option<String> {
        remaps
            .iter()
            .find(|(from, _)| from == pattern)
            .map(|(_, to)| to.clone())
    }

    #[test]
    fn test_resnet_remaps_downsample_only() {
        let remaps = key_remaps(Architecture::ResNet50);
        assert_eq!(remaps.len(), 2);
        assert_eq!(lookup(&remaps, r"downsample\.1\.").unwrap(), "downsample.bn.");
    }

    #[test]
    fn test_mobilenet_remaps_shift_block_numbers() {
        let remaps = key_remaps(Architecture::MobileNetV2);

        assert_eq!(
            lookup(&remaps, r"^features\.2\.conv\.0\.0\.").unwrap(),
            "blocks.1.expand.conv."
        );
        assert_eq!(
            lookup(&remaps, r"^features\.17\.conv\.3\.").unwrap(),
            "blocks.16.project_bn."
        );
        assert_eq!(lookup(&remaps, r"^features\.18\.1\.").unwrap(), "head.bn.");
        // 拡張率1のブロックに拡張層のキーはない
        assert!(remaps.iter().all(|(_, to)| to != "blocks.0.expand.conv."));
    }

    #[test]
    fn test_mobilenet_remaps_cover_every_block() {
        let remaps = key_remaps(Architecture::MobileNetV2);
        // stem 2 + ブロック1 4 + ブロック2〜17 6ずつ + head 2 + classifier 1
        assert_eq!(remaps.len(), 2 + 4 + 16 * 6 + 2 + 1);

        for block in 0..MOBILENET_BLOCKS {
            let prefix = format!("blocks.{}.", block);
            assert!(remaps.iter().any(|(_, to)| to.starts_with(&prefix)), "missing {}", prefix);
        }
    }

    #[test]
    fn test_label_index_follows_class_index_positions() {
        let decoder = LabelDecoder::from_class_index_json(
            r#"{"0": ["n01440764", "tench"], "1": ["n03445777", "golf_ball"], "2": ["n02123045", "tabby"]}"#,
        )
        .unwrap();
        let path = std::env::temp_dir().join(format!(
            "targeted_adversary_imported_index_{}.json",
            std::process::id()
        ));

        let written = write_label_index(&decoder, &path).unwrap();
        let reloaded = LabelIndex::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let golf_ball = decoder
            .class_labels()
            .iter()
            .position(|label| label == "golf_ball")
            .unwrap();
        assert_eq!(written.resolve("golf_ball"), Some(golf_ball));
        assert_eq!(reloaded.resolve("golf_ball"), Some(golf_ball));
        assert_eq!(reloaded.resolve("Tabby"), Some(2));
    }

    #[test]
    fn test_build_archive_fails_without_class_index() {
        let request = ImportRequest {
            weights_path: PathBuf::from("missing.pth"),
            class_index_path: std::env::temp_dir().join("targeted_adversary_missing_class_index.json"),
            architecture: Architecture::ResNet50,
            normalization: Normalization::Torch,
            output_path: std::env::temp_dir().join("targeted_adversary_import_out"),
            label_index_path: None,
        };
        assert!(build_archive::<burn::backend::NdArray>(&request, &Default::default()).is_err());
    }
}
