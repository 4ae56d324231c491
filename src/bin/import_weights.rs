//! torchvisionの重みから分類器アーカイブを作成するツール
//!
//! 例:
//! ```text
//! import_weights --weights resnet50-0676ba61.pth --class-index imagenet_class_index.json \
//!     --architecture resnet50 --output models/resnet50.tar.gz
//! ```
//!
//! アーカイブと同時に、ターゲット解決用のラベルマップ (`imagenet_index.json`) も書き出します。

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use targeted_adversary_lib::import::{build_archive, ImportRequest};
use targeted_adversary_lib::ml::{Architecture, Normalization};
use targeted_adversary_lib::model::{load_metadata, print_metadata_info};

#[derive(Parser)]
#[command(name = "import_weights")]
#[command(about = "Pack torchvision classifier weights into a classifier archive", long_about = None)]
struct Cli {
    /// PyTorchのチェックポイント (.pth)
    #[arg(long)]
    weights: PathBuf,
    /// Keras形式のクラスインデックス
    #[arg(long)]
    class_index: PathBuf,
    /// resnet50 / mobilenet_v2
    #[arg(long)]
    architecture: Architecture,
    /// caffe / tf / torch / raw
    #[arg(long, default_value = "torch")]
    normalization: Normalization,
    /// 出力先（.tar.gz が付与される）
    #[arg(long)]
    output: PathBuf,
    /// ターゲット解決用のラベルマップの出力先
    #[arg(long, default_value = "imagenet_index.json")]
    label_index_out: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    println!("=== Classifier Weight Import ===\n");

    let request = ImportRequest {
        weights_path: cli.weights,
        class_index_path: cli.class_index,
        architecture: cli.architecture,
        normalization: cli.normalization,
        output_path: cli.output,
        label_index_path: Some(cli.label_index_out),
    };

    let device = Default::default();
    match build_archive::<burn::backend::NdArray>(&request, &device) {
        Ok(archive) => {
            match load_metadata(&archive) {
                Ok(metadata) => print_metadata_info(&metadata),
                Err(e) => eprintln!("[Import] 警告: メタデータを読み戻せません: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[Import] エラー: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
