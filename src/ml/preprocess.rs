//! 画像の前処理と敵対的画像の復元
//!
//! `image` クレートはデコード時に画素をRGB順で返すため、BGR→RGBの並べ替えは
//! 読み込みの時点で済んでいます。ここでは正方形へのリサイズとバッチ次元付きの
//! NCHWテンソル化、分類器ごとの数値正規化を扱います。

use anyhow::{Context, Result};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{imageops::FilterType, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 分類器の入力解像度（正方形）
pub const INPUT_SIZE: u32 = 224;

/// 画素値の上限
pub const PIXEL_MAX: f32 = 255.0;

/// Caffe方式の平均値（BGR順）
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// ImageNetの平均と標準偏差（RGB順、0-1スケール）
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 分類器が要求する入力正規化
///
/// 入力は常にRGB順・0-255スケールの画素テンソル [N, 3, H, W] です。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    /// RGB→BGRに並べ替えてチャネル平均を引く（Keras ResNet50）
    Caffe,
    /// [-1, 1] に線形変換（Keras MobileNetV2）
    Tf,
    /// 0-1に縮めてImageNetの平均・標準偏差で標準化（torchvision）
    Torch,
    /// 変換なし
    Raw,
}

impl std::fmt::Display for Normalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Normalization::Caffe => write!(f, "caffe (BGR, mean-centered)"),
            Normalization::Tf => write!(f, "tf ([-1, 1])"),
            Normalization::Torch => write!(f, "torch (ImageNet mean/std)"),
            Normalization::Raw => write!(f, "raw (0-255)"),
        }
    }
}

impl std::str::FromStr for Normalization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "caffe" => Ok(Normalization::Caffe),
            "tf" => Ok(Normalization::Tf),
            "torch" => Ok(Normalization::Torch),
            "raw" => Ok(Normalization::Raw),
            other => anyhow::bail!("unknown normalization: {}", other),
        }
    }
}

impl Normalization {
    /// 画素テンソルを正規化する
    ///
    /// テンソル演算のみで構成しているため、摂動への勾配がそのまま流れます。
    pub fn apply<B: Backend>(&self, pixels: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = pixels.device();
        match self {
            Normalization::Caffe => {
                let bgr = Tensor::cat(
                    vec![
                        pixels.clone().narrow(1, 2, 1),
                        pixels.clone().narrow(1, 1, 1),
                        pixels.narrow(1, 0, 1),
                    ],
                    1,
                );
                bgr - channel_constant(CAFFE_MEAN_BGR, &device)
            }
            Normalization::Tf => pixels.div_scalar(PIXEL_MAX / 2.0).sub_scalar(1.0),
            Normalization::Torch => {
                (pixels.div_scalar(PIXEL_MAX) - channel_constant(IMAGENET_MEAN, &device))
                    / channel_constant(IMAGENET_STD, &device)
            }
            Normalization::Raw => pixels,
        }
    }
}

/// チャネルごとの定数を [1, 3, 1, 1] に整形
fn channel_constant<B: Backend>(values: [f32; 3], device: &B::Device) -> Tensor<B, 4> {
    Tensor::<B, 1>::from_floats(values, device).reshape([1, 3, 1, 1])
}

/// 画像ファイルを読み込む（RGB）
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).context(format!("Failed to read image: {:?}", path))?;
    Ok(img.to_rgb8())
}

/// 画像を正方形にリサイズし、(C, H, W) 順に平坦化した画素値を返す
///
/// 値は0-255のまま（正規化は分類器ごとに `Normalization::apply` で行う）。
pub fn image_to_pixels(img: &RgbImage, size: u32) -> Vec<f32> {
    let resized = if img.dimensions() == (size, size) {
        img.clone()
    } else {
        image::imageops::resize(img, size, size, FilterType::Triangle)
    };

    let mut data = Vec::with_capacity(3 * (size * size) as usize);
    for channel in 0..3 {
        for y in 0..size {
            for x in 0..size {
                data.push(resized.get_pixel(x, y)[channel] as f32);
            }
        }
    }
    data
}

/// 平坦化済み画素値をバッチ次元付きテンソル [1, 3, size, size] に変換
pub fn pixels_to_tensor<B: Backend>(pixels: &[f32], size: usize, device: &B::Device) -> Tensor<B, 4> {
    Tensor::from_data(TensorData::new(pixels.to_vec(), [1, 3, size, size]), device)
}

/// 画像ファイルからベース画像テンソルを作成
pub fn load_base_tensor<B: Backend>(path: &Path, size: u32, device: &B::Device) -> Result<Tensor<B, 4>> {
    let img = load_image(path)?;
    let pixels = image_to_pixels(&img, size);
    Ok(pixels_to_tensor(&pixels, size as usize, device))
}

/// (C, H, W) 順の画素値から画像を復元する
///
/// 値は [0, 255] に切り詰めたうえで小数部を切り捨てて8bit整数にします。
pub fn pixels_to_image(pixels: &[f32], size: u32) -> Result<RgbImage> {
    let plane = (size * size) as usize;
    if pixels.len() != 3 * plane {
        anyhow::bail!(
            "pixel buffer has {} values, expected {} for {}x{}",
            pixels.len(),
            3 * plane,
            size,
            size
        );
    }

    let mut img = RgbImage::new(size, size);
    for y in 0..size {
        for x in 0..size {
            let offset = (y * size + x) as usize;
            let pixel = img.get_pixel_mut(x, y);
            for channel in 0..3 {
                pixel[channel] = quantize(pixels[channel * plane + offset]);
            }
        }
    }
    Ok(img)
}

/// [0, 255] に切り詰めて切り捨て
pub fn quantize(value: f32) -> u8 {
    value.clamp(0.0, PIXEL_MAX) as u8
}

/// ベース画像と摂動から敵対的画像を復元
pub fn reconstruct_adversarial<B: Backend>(
    base: Tensor<B, 4>,
    delta: Tensor<B, 4>,
) -> Result<RgbImage> {
    let [_, _, height, width] = base.dims();
    if height != width {
        anyhow::bail!("expected a square image, got {}x{}", width, height);
    }

    let pixels = (base + delta)
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("画素値の取得エラー: {:?}", e))?;
    pixels_to_image(&pixels, width as u32)
}
