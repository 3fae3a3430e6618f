// 该文件是 Jianshi （拣识） 项目的一部分。
// src/region.rs - 热力区域定位
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

use image::{GrayImage, Rgb, RgbImage};
use imageproc::{
  contours::{Contour, find_contours},
  contrast::{ThresholdType, otsu_level, threshold},
  distance_transform::Norm,
  drawing::draw_hollow_rect_mut,
  geometry::contour_area,
  morphology,
  rect::Rect,
};
use tracing::debug;

const FIXED_THRESHOLD: u8 = 127;
const MORPH_KERNEL_SIZE: u8 = 5;
const BBOX_MARGIN: u32 = 10;

/// 二值化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdMethod {
  /// 类间方差最大的自动阈值
  #[default]
  Otsu,
  Fixed(u8),
}

impl ThresholdMethod {
  pub fn level(&self, image: &GrayImage) -> u8 {
    match self {
      ThresholdMethod::Otsu => otsu_level(image),
      ThresholdMethod::Fixed(level) => *level,
    }
  }
}

/// 形态学操作，结构元素为方形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MorphOperation {
  /// 先膨胀后腐蚀
  #[default]
  Close,
  Open,
  Dilate,
  Erode,
}

impl MorphOperation {
  /// `kernel_size` 为方形结构元素边长，奇数
  pub fn apply(&self, mask: &GrayImage, kernel_size: u8) -> GrayImage {
    let k = kernel_size / 2;
    if k == 0 {
      return mask.clone();
    }
    match self {
      MorphOperation::Close => morphology::close(mask, Norm::LInf, k),
      MorphOperation::Open => morphology::open(mask, Norm::LInf, k),
      MorphOperation::Dilate => morphology::dilate(mask, Norm::LInf, k),
      MorphOperation::Erode => morphology::erode(mask, Norm::LInf, k),
    }
  }
}

impl std::str::FromStr for MorphOperation {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "close" => Ok(MorphOperation::Close),
      "open" => Ok(MorphOperation::Open),
      "dilate" => Ok(MorphOperation::Dilate),
      "erode" => Ok(MorphOperation::Erode),
      other => Err(format!("未知的形态学操作: {}", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionConfig {
  pub threshold: ThresholdMethod,
  pub morph_kernel_size: u8,
  pub morph_operation: MorphOperation,
  /// 四周外扩像素数
  pub margin: u32,
}

impl Default for RegionConfig {
  fn default() -> Self {
    Self {
      threshold: ThresholdMethod::default(),
      morph_kernel_size: MORPH_KERNEL_SIZE,
      morph_operation: MorphOperation::default(),
      margin: BBOX_MARGIN,
    }
  }
}

impl RegionConfig {
  pub fn fixed_threshold() -> ThresholdMethod {
    ThresholdMethod::Fixed(FIXED_THRESHOLD)
  }
}

/// 原图坐标系下的矩形，始终位于图像范围内
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl BoundingBox {
  /// 四周外扩 `margin` 并裁剪到图像范围
  pub fn expand(&self, margin: u32, image_width: u32, image_height: u32) -> Self {
    let x = self.x.saturating_sub(margin);
    let y = self.y.saturating_sub(margin);
    Self {
      x,
      y,
      width: grow(self.width, margin).min(image_width.saturating_sub(x)),
      height: grow(self.height, margin).min(image_height.saturating_sub(y)),
    }
  }

  pub fn center(&self) -> (f32, f32) {
    (
      self.x as f32 + self.width as f32 / 2.0,
      self.y as f32 + self.height as f32 / 2.0,
    )
  }

  /// 以 `thickness` 像素宽的边框画到图像上，超出部分自动裁剪
  pub fn draw(&self, image: &mut RgbImage, color: [u8; 3], thickness: u32) {
    for t in 0..thickness {
      let width = (self.width + 1).saturating_sub(2 * t);
      let height = (self.height + 1).saturating_sub(2 * t);
      if width == 0 || height == 0 {
        break;
      }
      let rect = Rect::at((self.x + t) as i32, (self.y + t) as i32).of_size(width, height);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
  }
}

fn grow(length: u32, margin: u32) -> u32 {
  length.saturating_add(margin.saturating_mul(2))
}

/// 轮廓外接矩形，包含端点像素
fn bounding_rect(contour: &Contour<i32>) -> Option<BoundingBox> {
  let first = contour.points.first()?;
  let (mut x_min, mut y_min, mut x_max, mut y_max) = (first.x, first.y, first.x, first.y);
  for p in &contour.points {
    x_min = x_min.min(p.x);
    y_min = y_min.min(p.y);
    x_max = x_max.max(p.x);
    y_max = y_max.max(p.y);
  }
  Some(BoundingBox {
    x: x_min.max(0) as u32,
    y: y_min.max(0) as u32,
    width: (x_max - x_min + 1) as u32,
    height: (y_max - y_min + 1) as u32,
  })
}

#[derive(Debug, Clone, Default)]
pub struct RegionLocator {
  config: RegionConfig,
}

impl RegionLocator {
  pub fn new(config: RegionConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &RegionConfig {
    &self.config
  }

  /// 二值化并做形态学清理后的掩码，前景为 255
  pub fn mask(&self, quantized: &GrayImage) -> GrayImage {
    let level = self.config.threshold.level(quantized);
    debug!("二值化阈值: {}", level);
    let binary = threshold(quantized, level, ThresholdType::Binary);
    self
      .config
      .morph_operation
      .apply(&binary, self.config.morph_kernel_size)
  }

  /// 在掩码中寻找面积最大的外轮廓并返回外扩后的包围框；没有轮廓时返回 None
  pub fn locate(&self, quantized: &GrayImage, image_width: u32, image_height: u32) -> Option<BoundingBox> {
    let mask = self.mask(quantized);
    // 只保留顶层轮廓；贴着左边界的区域会被标成 Hole，不能按边界类型筛选
    let contours: Vec<Contour<i32>> = find_contours::<i32>(&mask)
      .into_iter()
      .filter(|c| c.parent.is_none())
      .collect();
    debug!("找到 {} 个外轮廓", contours.len());

    // 面积相同时保留先出现的轮廓
    let mut largest: Option<(&Contour<i32>, f64)> = None;
    for contour in &contours {
      let area = contour_area(&contour.points).abs();
      match largest {
        Some((_, best)) if area <= best => {}
        _ => largest = Some((contour, area)),
      }
    }

    let (contour, area) = largest?;
    let rect = bounding_rect(contour)?;
    let bbox = rect.expand(self.config.margin, image_width, image_height);
    debug!("最大轮廓面积 {:.1}, 包围框 {:?}", area, bbox);
    Some(bbox)
  }
}
