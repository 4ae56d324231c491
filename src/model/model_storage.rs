//! 分類器アーカイブの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（アーキテクチャ、正規化、クラスラベル）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パスに `.tar.gz` 拡張子を付与する
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 保存したアーカイブのパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create parent directory: {:?}", parent))?;
        }
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .context(format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // finish()だけではgzipのトレーラが書き出されないため、エンコーダまで閉じる
    let encoder = tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?;
    encoder.finish().context("Failed to finish gzip stream")?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .context(format!("Failed to add {} to tar", name))
}

/// Tar.gzから分類器メタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let (metadata, _) = read_archive(tar_gz_path, false)?;
    metadata.ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_archive(tar_gz_path, true)? {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY)),
        (_, None) => Err(anyhow::anyhow!("{} not found in tar.gz archive", MODEL_ENTRY)),
    }
}

fn read_archive(
    tar_gz_path: &Path,
    with_binary: bool,
) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();

        match path.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
                if !with_binary {
                    break;
                }
            }
            MODEL_ENTRY if with_binary => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    Ok((metadata_opt, model_binary_opt))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== 分類器メタデータ ===");
    println!("アーキテクチャ: {}", metadata.architecture);
    println!("入力正規化: {}", metadata.normalization);
    println!("クラス数: {}", metadata.num_classes());
    println!("入力サイズ: {}x{}", metadata.input_size, metadata.input_size);
    if !metadata.source.is_empty() {
        println!("重みの出所: {}", metadata.source);
    }
    println!("作成日時: {}", metadata.created_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{Architecture, Normalization};

    #[test]
    fn test_save_and_load_archive() {
        let base = std::env::temp_dir().join(format!(
            "targeted_adversary_archive_{}",
            std::process::id()
        ));
        let metadata = ModelMetadata::new(
            Architecture::ResNet50,
            Normalization::Caffe,
            vec!["n0".to_string(), "n1".to_string()],
            vec!["zero".to_string(), "one".to_string()],
            224,
            String::new(),
        );
        let binary = vec![1u8, 2, 3, 4, 5];

        let saved = save_model_with_metadata(&base, &metadata, &binary).unwrap();
        assert_eq!(saved, base.with_extension("tar.gz"));

        let only_metadata = load_metadata(&saved).unwrap();
        assert_eq!(only_metadata.class_labels, metadata.class_labels);

        let (loaded, loaded_binary) = load_model_with_metadata(&saved).unwrap();
        std::fs::remove_file(&saved).ok();

        assert_eq!(loaded.architecture, Architecture::ResNet50);
        assert_eq!(loaded.normalization, Normalization::Caffe);
        assert_eq!(loaded_binary, binary);
    }

    #[test]
    fn test_archive_path_keeps_gz_extension() {
        assert_eq!(
            archive_path(Path::new("models/resnet50.tar.gz")),
            PathBuf::from("models/resnet50.tar.gz")
        );
        assert_eq!(
            archive_path(Path::new("models/resnet50")),
            PathBuf::from("models/resnet50.tar.gz")
        );
    }
}
