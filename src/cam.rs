// 该文件是 Jianshi （拣识） 项目的一部分。
// src/cam.rs - 梯度加权类激活图
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

use std::sync::Arc;

use image::{ImageBuffer, Luma};
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  classifier::{Classifier, GradientProvider},
  tensor::{FeatureMap, GradientMap, ModelInput, argmax},
};

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ExtractError {
  #[error("分类器不存在名为 {0} 的层")]
  MissingLayer(String),
  #[error("分类器输出的分数向量为空")]
  EmptyScores,
  #[error("梯度形状 {gradient:?} 与特征图形状 {feature:?} 不一致")]
  ShapeMismatch {
    feature: (usize, usize, usize),
    gradient: (usize, usize, usize),
  },
  #[error("分类器错误: {0}")]
  Classifier(BoxedError),
}

/// 单通道相关性图，取值范围 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceMap {
  height: usize,
  width: usize,
  data: Box<[f32]>,
}

impl RelevanceMap {
  pub fn zeros(height: usize, width: usize) -> Self {
    Self {
      height,
      width,
      data: vec![0.0; height * width].into_boxed_slice(),
    }
  }

  /// 截断负值后按最大值归一化；最大值为 0 时返回全零图
  pub fn normalized(height: usize, width: usize, mut data: Vec<f32>) -> Self {
    data.iter_mut().for_each(|v| *v = v.max(0.0));
    let max = data.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 && max.is_finite() {
      data.iter_mut().for_each(|v| *v /= max);
    } else {
      data.iter_mut().for_each(|v| *v = 0.0);
    }

    Self {
      height,
      width,
      data: data.into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn at(&self, h: usize, w: usize) -> f32 {
    self.data[h * self.width + w]
  }

  pub fn values(&self) -> &[f32] {
    &self.data
  }

  pub fn max(&self) -> f32 {
    self.data.iter().copied().fold(0.0, f32::max)
  }

  /// 整张图没有任何正向贡献
  pub fn is_degenerate(&self) -> bool {
    self.max() == 0.0
  }

  pub fn to_luma32(&self) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
      Luma([self.at(y as usize, x as usize)])
    })
  }
}

/// 以梯度空间均值为通道权重，对特征图做加权求和
pub fn grad_cam(feature: &FeatureMap, gradient: &GradientMap) -> Result<RelevanceMap, ExtractError> {
  if feature.shape() != gradient.shape() {
    error!(
      "梯度形状 {:?} 与特征图形状 {:?} 不一致",
      gradient.shape(),
      feature.shape()
    );
    return Err(ExtractError::ShapeMismatch {
      feature: feature.shape(),
      gradient: gradient.shape(),
    });
  }

  let weights = gradient.spatial_mean();
  let channels = feature.channels().max(1);
  let cam: Vec<f32> = feature
    .as_hwc()
    .chunks_exact(channels)
    .map(|pixel| pixel.iter().zip(&weights).map(|(a, w)| a * w).sum())
    .collect();

  Ok(RelevanceMap::normalized(feature.height(), feature.width(), cam))
}

pub struct ActivationMapExtractor<C> {
  classifier: Arc<C>,
  layer: String,
}

impl<C: Classifier> ActivationMapExtractor<C> {
  pub fn new(classifier: Arc<C>, layer: impl Into<String>) -> Result<Self, ExtractError> {
    let layer = layer.into();
    if !classifier.has_layer(&layer) {
      error!("分类器不存在名为 {} 的层", layer);
      return Err(ExtractError::MissingLayer(layer));
    }
    Ok(Self { classifier, layer })
  }

  pub fn layer(&self) -> &str {
    &self.layer
  }

  /// 返回相关性图以及得分最高的类别下标
  pub fn extract(&self, input: &ModelInput) -> Result<(RelevanceMap, usize), ExtractError> {
    let capture = self
      .classifier
      .forward_with_gradient(input, &self.layer)
      .map_err(|e| ExtractError::Classifier(Box::new(e)))?;
    let class_index = argmax(&capture.scores).ok_or(ExtractError::EmptyScores)?;

    let gradient = capture
      .gradients
      .gradient(class_index)
      .map_err(|e| ExtractError::Classifier(Box::new(e)))?;
    let relevance = grad_cam(&capture.feature_map, &gradient)?;

    debug!(
      "相关性图 {}x{}, 类别 {}, 退化: {}",
      relevance.height(),
      relevance.width(),
      class_index,
      relevance.is_degenerate()
    );
    Ok((relevance, class_index))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn weighted_sum_uses_pooled_gradients() {
    // 2x1 空间，2 通道
    let feature = FeatureMap::from_vec(2, 1, 2, vec![1.0, 0.0, 0.0, 2.0]).unwrap();
    let gradient = FeatureMap::from_vec(2, 1, 2, vec![1.0, 0.5, 3.0, 0.5]).unwrap();
    // 通道权重 [2.0, 0.5] → [2.0, 1.0] → 归一化 [1.0, 0.5]
    let cam = grad_cam(&feature, &gradient).unwrap();
    assert_eq!(cam.values(), &[1.0, 0.5]);
    assert_eq!(cam.max(), 1.0);
  }

  #[test]
  fn negative_contributions_are_clipped() {
    let feature = FeatureMap::from_vec(1, 3, 1, vec![1.0, 2.0, 4.0]).unwrap();
    let gradient = FeatureMap::from_vec(1, 3, 1, vec![-1.0, -1.0, -1.0]).unwrap();
    let cam = grad_cam(&feature, &gradient).unwrap();
    assert!(cam.is_degenerate());
    assert!(cam.values().iter().all(|v| *v == 0.0));
  }

  #[test]
  fn mixed_sign_map_stays_in_unit_range() {
    let feature = FeatureMap::from_vec(2, 2, 2, vec![1.0, 3.0, 2.0, 0.0, 0.5, 4.0, 3.0, 1.0]).unwrap();
    let gradient = FeatureMap::from_vec(2, 2, 2, vec![0.3, -0.2, 0.3, -0.2, 0.3, -0.2, 0.3, -0.2]).unwrap();
    let cam = grad_cam(&feature, &gradient).unwrap();
    assert!(cam.values().iter().all(|v| (0.0..=1.0).contains(v)));
    assert_eq!(cam.max(), 1.0);
    assert_eq!(cam.at(1, 0), 0.0);
  }

  #[test]
  fn shape_mismatch_is_reported() {
    let feature = FeatureMap::zeros(2, 2, 1);
    let gradient = FeatureMap::zeros(2, 2, 2);
    assert!(matches!(
      grad_cam(&feature, &gradient),
      Err(ExtractError::ShapeMismatch { .. })
    ));
  }

  #[test]
  fn luma_image_is_row_major() {
    let map = RelevanceMap::normalized(2, 3, vec![0.0, 0.0, 2.0, 1.0, 0.0, 0.0]);
    let image = map.to_luma32();
    assert_eq!(image.dimensions(), (3, 2));
    assert_eq!(image.get_pixel(2, 0)[0], 1.0);
    assert_eq!(image.get_pixel(0, 1)[0], 0.5);
  }
}
