// 该文件是 Jianshi （拣识） 项目的一部分。
// src/heatmap.rs - 热力图平滑、着色与叠加
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{
  GrayImage, ImageBuffer, Luma, Rgb, RgbImage,
  imageops::{self, FilterType},
};
use imageproc::filter::separable_filter_equal;
use tracing::debug;

use crate::cam::RelevanceMap;

// 渲染默认参数
const BLUR_KERNEL_SIZE: u32 = 3;
const BLUR_SIGMA: f32 = 0.0;
const BLEND_ALPHA: f32 = 1.0;
const BLEND_BETA: f32 = 0.0;
const BLEND_GAMMA: f32 = 0.0;

/// 热力图调色板
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Colormap {
  /// 蓝（低）→ 青 → 黄 → 红（高）
  #[default]
  Jet,
  /// 黑 → 红 → 黄 → 白
  Hot,
  Gray,
}

impl Colormap {
  fn color(&self, value: u8) -> Rgb<u8> {
    let x = value as f32 / 255.0;
    let (r, g, b) = match self {
      Colormap::Jet => (
        (1.5 - (4.0 * x - 3.0).abs()).clamp(0.0, 1.0),
        (1.5 - (4.0 * x - 2.0).abs()).clamp(0.0, 1.0),
        (1.5 - (4.0 * x - 1.0).abs()).clamp(0.0, 1.0),
      ),
      Colormap::Hot => (
        (3.0 * x).clamp(0.0, 1.0),
        (3.0 * x - 1.0).clamp(0.0, 1.0),
        (3.0 * x - 2.0).clamp(0.0, 1.0),
      ),
      Colormap::Gray => (x, x, x),
    };

    Rgb([
      (r * 255.0).round() as u8,
      (g * 255.0).round() as u8,
      (b * 255.0).round() as u8,
    ])
  }

  /// 256 项查找表
  pub fn lut(&self) -> [Rgb<u8>; 256] {
    std::array::from_fn(|i| self.color(i as u8))
  }
}

impl std::str::FromStr for Colormap {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "jet" => Ok(Colormap::Jet),
      "hot" => Ok(Colormap::Hot),
      "gray" | "grey" => Ok(Colormap::Gray),
      other => Err(format!("未知的调色板: {}", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
  /// 高斯核尺寸，奇数
  pub blur_kernel_size: u32,
  /// 不大于 0 时由核尺寸推导
  pub blur_sigma: f32,
  /// 原图权重
  pub alpha: f32,
  /// 热力层权重
  pub beta: f32,
  pub gamma: f32,
  pub colormap: Colormap,
}

impl Default for RenderConfig {
  // 默认 beta 为 0：叠加结果只含原图像素，需要可见热力色调时须显式给出非零 beta
  fn default() -> Self {
    Self {
      blur_kernel_size: BLUR_KERNEL_SIZE,
      blur_sigma: BLUR_SIGMA,
      alpha: BLEND_ALPHA,
      beta: BLEND_BETA,
      gamma: BLEND_GAMMA,
      colormap: Colormap::default(),
    }
  }
}

/// 一维高斯核，和为 1
///
/// sigma 不大于 0 时，1/3/5/7 尺寸使用固定的二项式核，
/// 其余尺寸按 `0.3 * ((k - 1) * 0.5 - 1) + 0.8` 推导 sigma。
pub fn gaussian_kernel(size: u32, sigma: f32) -> Vec<f32> {
  let size = size.max(1) | 1;
  if sigma <= 0.0 {
    match size {
      1 => return vec![1.0],
      3 => return vec![0.25, 0.5, 0.25],
      5 => return vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
      7 => {
        return vec![
          0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125,
        ];
      }
      _ => {}
    }
  }

  let sigma = if sigma > 0.0 {
    sigma
  } else {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
  };
  let half = (size / 2) as f32;
  let raw: Vec<f32> = (0..size)
    .map(|i| {
      let d = i as f32 - half;
      (-(d * d) / (2.0 * sigma * sigma)).exp()
    })
    .collect();
  let sum: f32 = raw.iter().sum();
  raw.into_iter().map(|v| v / sum).collect()
}

/// 镜像边界（不重复边缘像素），`dcb|abcd|cba`
fn reflect_101(idx: isize, len: usize) -> usize {
  if len == 1 {
    return 0;
  }
  let len = len as isize;
  let period = 2 * (len - 1);
  let mut i = idx.rem_euclid(period);
  if i >= len {
    i = period - i;
  }
  i as usize
}

type RelevanceImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 四周各按镜像边界扩展 `pad` 像素
fn pad_reflect_101(map: &RelevanceImage, pad: u32) -> RelevanceImage {
  let (width, height) = map.dimensions();
  ImageBuffer::from_fn(width + 2 * pad, height + 2 * pad, |x, y| {
    let sx = reflect_101(x as isize - pad as isize, width as usize);
    let sy = reflect_101(y as isize - pad as isize, height as usize);
    *map.get_pixel(sx as u32, sy as u32)
  })
}

/// 可分离高斯平滑，边界按镜像处理
fn blur(map: &RelevanceImage, kernel: &[f32]) -> RelevanceImage {
  let pad = (kernel.len() / 2) as u32;
  if pad == 0 {
    return map.clone();
  }
  let (width, height) = map.dimensions();
  let filtered = separable_filter_equal(&pad_reflect_101(map, pad), kernel);
  imageops::crop_imm(&filtered, pad, pad, width, height).to_image()
}

/// 渲染结果：叠加图以及供区域定位使用的 8 位热力图
#[derive(Debug, Clone)]
pub struct RenderedHeatmap {
  pub overlay: RgbImage,
  pub quantized: GrayImage,
}

#[derive(Debug, Clone, Default)]
pub struct HeatmapRenderer {
  config: RenderConfig,
}

impl HeatmapRenderer {
  pub fn new(config: RenderConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &RenderConfig {
    &self.config
  }

  /// 平滑、缩放到原图尺寸并量化为 0-255
  pub fn quantize(&self, relevance: &RelevanceMap, width: u32, height: u32) -> GrayImage {
    if relevance.width() == 0 || relevance.height() == 0 {
      return GrayImage::new(width, height);
    }

    let kernel = gaussian_kernel(self.config.blur_kernel_size, self.config.blur_sigma);
    let blurred = blur(&relevance.to_luma32(), &kernel);
    let resized = if blurred.dimensions() == (width, height) {
      blurred
    } else {
      imageops::resize(&blurred, width, height, FilterType::Triangle)
    };

    // 截断取整
    ImageBuffer::from_fn(width, height, |x, y| {
      Luma([(resized.get_pixel(x, y)[0].clamp(0.0, 1.0) * 255.0) as u8])
    })
  }

  pub fn colorize(&self, quantized: &GrayImage) -> RgbImage {
    let lut = self.config.colormap.lut();
    ImageBuffer::from_fn(quantized.width(), quantized.height(), |x, y| {
      lut[quantized.get_pixel(x, y)[0] as usize]
    })
  }

  /// `alpha * original + beta * heat + gamma`，四舍五入并饱和到 0-255
  pub fn blend(&self, original: &RgbImage, heat: &RgbImage) -> RgbImage {
    let RenderConfig {
      alpha, beta, gamma, ..
    } = self.config;
    ImageBuffer::from_fn(original.width(), original.height(), |x, y| {
      let o = original.get_pixel(x, y);
      let h = heat.get_pixel(x, y);
      Rgb(std::array::from_fn(|c| {
        (alpha * o[c] as f32 + beta * h[c] as f32 + gamma)
          .round()
          .clamp(0.0, 255.0) as u8
      }))
    })
  }

  pub fn render(&self, relevance: &RelevanceMap, original: &RgbImage) -> RenderedHeatmap {
    let (width, height) = original.dimensions();
    let quantized = self.quantize(relevance, width, height);
    let heat = self.colorize(&quantized);
    let overlay = self.blend(original, &heat);
    debug!(
      "热力图渲染完成 {}x{}, alpha={}, beta={}",
      width, height, self.config.alpha, self.config.beta
    );

    RenderedHeatmap { overlay, quantized }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kernels_are_normalized() {
    for size in [1, 3, 5, 7, 9, 11] {
      let kernel = gaussian_kernel(size, 0.0);
      assert_eq!(kernel.len(), size as usize);
      assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
    assert_eq!(gaussian_kernel(3, 0.0), vec![0.25, 0.5, 0.25]);
    let explicit = gaussian_kernel(3, 1.0);
    assert!(explicit[1] > explicit[0] && (explicit[0] - explicit[2]).abs() < 1e-7);
  }

  #[test]
  fn reflect_border_skips_edge_pixel() {
    assert_eq!(reflect_101(-1, 4), 1);
    assert_eq!(reflect_101(-2, 4), 2);
    assert_eq!(reflect_101(4, 4), 2);
    assert_eq!(reflect_101(2, 4), 2);
    assert_eq!(reflect_101(-1, 1), 0);
  }

  #[test]
  fn blur_mirrors_without_repeating_the_edge() {
    let map = RelevanceImage::from_raw(3, 1, vec![1.0, 0.0, 0.0]).unwrap();
    let blurred = blur(&map, &gaussian_kernel(3, 0.0));
    assert_eq!(blurred.dimensions(), (3, 1));
    // 复制边缘时左端会得到 0.75
    assert!((blurred.get_pixel(0, 0)[0] - 0.5).abs() < 1e-6);
    assert!((blurred.get_pixel(1, 0)[0] - 0.25).abs() < 1e-6);
    assert!(blurred.get_pixel(2, 0)[0].abs() < 1e-6);
  }

  #[test]
  fn jet_runs_from_blue_to_red() {
    let lut = Colormap::Jet.lut();
    assert_eq!(lut[0], Rgb([0, 0, 128]));
    assert_eq!(lut[255], Rgb([128, 0, 0]));
    let mid = lut[128];
    assert!(mid[1] > mid[0] && mid[1] > mid[2]);
  }

  #[test]
  fn colormap_parses_names() {
    assert_eq!("JET".parse::<Colormap>(), Ok(Colormap::Jet));
    assert_eq!("grey".parse::<Colormap>(), Ok(Colormap::Gray));
    assert!("viridis".parse::<Colormap>().is_err());
  }

  #[test]
  fn zero_map_quantizes_to_black() {
    let renderer = HeatmapRenderer::default();
    let quantized = renderer.quantize(&RelevanceMap::zeros(8, 8), 32, 24);
    assert_eq!(quantized.dimensions(), (32, 24));
    assert!(quantized.pixels().all(|p| p[0] == 0));
  }

  #[test]
  fn default_blend_keeps_original_pixels() {
    let original = RgbImage::from_fn(16, 16, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 77]));
    let relevance = RelevanceMap::normalized(4, 4, (0..16).map(|v| v as f32).collect());
    let rendered = HeatmapRenderer::default().render(&relevance, &original);
    assert_eq!(rendered.overlay, original);
    assert!(rendered.quantized.pixels().any(|p| p[0] > 0));
  }

  #[test]
  fn heat_weight_tints_the_overlay() {
    let original = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
    let renderer = HeatmapRenderer::new(RenderConfig {
      alpha: 0.5,
      beta: 0.5,
      ..RenderConfig::default()
    });
    let rendered = renderer.render(&RelevanceMap::zeros(2, 2), &original);
    // 零相关性对应 jet 的深蓝色
    assert_eq!(*rendered.overlay.get_pixel(3, 3), Rgb([0, 0, 64]));
  }

  #[test]
  fn bright_corner_stays_in_its_quadrant() {
    let mut values = vec![0.0; 64];
    values[9] = 1.0;
    values[10] = 1.0;
    values[17] = 1.0;
    values[18] = 1.0;
    let relevance = RelevanceMap::normalized(8, 8, values);
    let quantized = HeatmapRenderer::default().quantize(&relevance, 64, 64);
    let (mut bx, mut by, mut best) = (0, 0, 0u8);
    for (x, y, p) in quantized.enumerate_pixels() {
      if p[0] > best {
        (bx, by, best) = (x, y, p[0]);
      }
    }
    assert!(best > 0);
    assert!(bx < 32 && by < 32);
    assert_eq!(quantized.get_pixel(63, 63)[0], 0);
  }
}
