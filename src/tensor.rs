// 该文件是 Jianshi （拣识） 项目的一部分。
// src/tensor.rs - 模型输入与特征图张量定义
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

use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
pub struct ShapeError {
  pub expected: usize,
  pub actual: usize,
}

/// 每个类别一个分数
pub type ScoreVector = Vec<f32>;

/// 返回最大分数的下标，相等时取第一个；NaN 不参与比较，没有有效分数时返回 None
pub fn argmax(scores: &[f32]) -> Option<usize> {
  let mut best: Option<(usize, f32)> = None;
  for (idx, &score) in scores.iter().enumerate() {
    if score.is_nan() {
      continue;
    }
    match best {
      Some((_, value)) if score <= value => {}
      _ => best = Some((idx, score)),
    }
  }
  best.map(|(idx, _)| idx)
}

/// 逐通道归一化参数：`(x - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  pub mean: [f32; 3],
  pub std: [f32; 3],
}

impl Default for Normalization {
  // 骨干网络内部自带缩放层，输入保持 0-255 原值
  fn default() -> Self {
    Self {
      mean: [0.0; 3],
      std: [1.0; 3],
    }
  }
}

/// 单张图像的归一化输入，NHWC 排布（批大小为 1）
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
  height: usize,
  width: usize,
  data: Box<[f32]>,
}

impl ModelInput {
  pub fn from_rgb_image(image: &RgbImage, norm: &Normalization) -> Self {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity(width as usize * height as usize * RGB_CHANNELS);
    for pixel in image.pixels() {
      for c in 0..RGB_CHANNELS {
        data.push((pixel[c] as f32 - norm.mean[c]) / norm.std[c]);
      }
    }

    Self {
      height: height as usize,
      width: width as usize,
      data: data.into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }

  pub fn at(&self, h: usize, w: usize, c: usize) -> f32 {
    self.data[(h * self.width + w) * RGB_CHANNELS + c]
  }
}

/// 某一内部层的输出，H×W×C 排布
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
  height: usize,
  width: usize,
  channels: usize,
  data: Box<[f32]>,
}

/// 目标类别分数对特征图的梯度，形状与特征图一致
pub type GradientMap = FeatureMap;

impl FeatureMap {
  pub fn zeros(height: usize, width: usize, channels: usize) -> Self {
    Self {
      height,
      width,
      channels,
      data: vec![0.0; height * width * channels].into_boxed_slice(),
    }
  }

  pub fn from_vec(
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<f32>,
  ) -> Result<Self, ShapeError> {
    let expected = height * width * channels;
    if data.len() != expected {
      return Err(ShapeError {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      height,
      width,
      channels,
      data: data.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn shape(&self) -> (usize, usize, usize) {
    (self.height, self.width, self.channels)
  }

  pub fn as_hwc(&self) -> &[f32] {
    &self.data
  }

  fn index(&self, h: usize, w: usize, c: usize) -> usize {
    (h * self.width + w) * self.channels + c
  }

  pub fn at(&self, h: usize, w: usize, c: usize) -> f32 {
    self.data[self.index(h, w, c)]
  }

  pub fn set(&mut self, h: usize, w: usize, c: usize, value: f32) {
    let idx = self.index(h, w, c);
    self.data[idx] = value;
  }

  /// 每个通道在空间维度上的均值
  pub fn spatial_mean(&self) -> Vec<f32> {
    let mut sums = vec![0.0f32; self.channels];
    for pixel in self.data.chunks_exact(self.channels.max(1)) {
      for (sum, value) in sums.iter_mut().zip(pixel) {
        *sum += value;
      }
    }
    let area = (self.height * self.width) as f32;
    if area > 0.0 {
      sums.iter_mut().for_each(|sum| *sum /= area);
    }
    sums
  }
}
