// 该文件是 Jianshi （拣识） 项目的一部分。
// src/pipeline.rs - 分类与可解释性流水线
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

use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  cam::{ActivationMapExtractor, BoxedError, ExtractError},
  classifier::Classifier,
  config::ExplainConfig,
  heatmap::HeatmapRenderer,
  input::RawImage,
  label::{WasteLabel, WithLabel},
  model::Model,
  region::{BoundingBox, RegionLocator},
  task::Deterministic,
  tensor::{ModelInput, argmax},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("模型配置错误: {0}")]
  ModelConfiguration(String),
  #[error("推理失败: {0}")]
  Inference(BoxedError),
}

impl From<ExtractError> for PipelineError {
  fn from(err: ExtractError) -> Self {
    match err {
      ExtractError::MissingLayer(layer) => {
        PipelineError::ModelConfiguration(format!("分类器不存在名为 {} 的层", layer))
      }
      other => PipelineError::Inference(Box::new(other)),
    }
  }
}

/// 单次请求的分类结果，构造后不再修改
#[derive(Debug, Clone)]
pub struct ClassificationResult {
  pub label: WasteLabel,
  /// 百分比，保留两位小数
  pub confidence: f32,
  /// 模型得分最高的类别下标，不受兜底规则影响
  pub class_index: usize,
  pub bounding_box: Option<BoundingBox>,
  pub annotated_image: RgbImage,
}

/// 置信度不高于阈值时一律输出兜底类别
pub fn decide_label(
  class_index: usize,
  confidence: f32,
  cutoff: f32,
  fallback: WasteLabel,
) -> WasteLabel {
  if confidence <= cutoff {
    return fallback;
  }
  WasteLabel::from_label_id(class_index as u32).unwrap_or(fallback)
}

/// 概率转为百分比并四舍五入到两位小数
pub fn to_percent(confidence: f32) -> f32 {
  ((confidence as f64 * 100.0 * 100.0).round() / 100.0) as f32
}

pub struct ClassificationPipeline<C> {
  classifier: Arc<C>,
  extractor: ActivationMapExtractor<C>,
  renderer: HeatmapRenderer,
  locator: RegionLocator,
  config: ExplainConfig,
}

impl<C: Classifier> ClassificationPipeline<C> {
  /// 指定层不存在或类别数不匹配时拒绝构造
  pub fn new(classifier: Arc<C>, config: ExplainConfig) -> Result<Self, PipelineError> {
    let num_classes = classifier.num_classes();
    if num_classes != WasteLabel::count() {
      error!(
        "预期分类器输出 {} 类, 实际为 {}",
        WasteLabel::count(),
        num_classes
      );
      return Err(PipelineError::ModelConfiguration(format!(
        "预期分类器输出 {} 类, 实际为 {}",
        WasteLabel::count(),
        num_classes
      )));
    }

    let extractor = ActivationMapExtractor::new(Arc::clone(&classifier), config.layer_name.clone())?;
    info!(
      "流水线就绪: 输入 {}x{}, 激活层 {}",
      config.target_size.0,
      config.target_size.1,
      extractor.layer()
    );

    Ok(Self {
      classifier,
      extractor,
      renderer: HeatmapRenderer::new(config.render.clone()),
      locator: RegionLocator::new(config.region.clone()),
      config,
    })
  }

  pub fn config(&self) -> &ExplainConfig {
    &self.config
  }

  /// 解码并缩放到模型输入尺寸
  pub fn preprocess(&self, bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    Ok(self.fit(image))
  }

  fn fit(&self, image: RgbImage) -> RgbImage {
    let (width, height) = self.config.target_size;
    if image.dimensions() == (width, height) {
      return image;
    }
    debug!(
      "缩放图像 {}x{} -> {}x{}",
      image.width(),
      image.height(),
      width,
      height
    );
    imageops::resize(&image, width, height, self.config.resize_filter)
  }

  pub fn classify(&self, bytes: &[u8]) -> Result<ClassificationResult, PipelineError> {
    let original = self.preprocess(bytes)?;
    self.classify_image(original)
  }

  pub fn classify_image(&self, original: RgbImage) -> Result<ClassificationResult, PipelineError> {
    let original = self.fit(original);
    let input = ModelInput::from_rgb_image(&original, &self.config.normalization);

    let scores = self
      .classifier
      .forward_scores(&input)
      .map_err(|e| PipelineError::Inference(Box::new(e)))?;
    let class_index = argmax(&scores).ok_or(ExtractError::EmptyScores)?;
    let confidence = scores[class_index];
    let label = decide_label(
      class_index,
      confidence,
      self.config.confidence_cutoff,
      self.config.fallback_label,
    );
    debug!(
      "预测类别下标 {}, 置信度 {:.4}, 输出标签 {}",
      class_index,
      confidence,
      label.to_label_str()
    );

    let (relevance, cam_index) = self.extractor.extract(&input)?;
    if cam_index != class_index {
      warn!(
        "激活图类别 {} 与预测类别 {} 不一致",
        cam_index, class_index
      );
    }

    let (width, height) = original.dimensions();
    let rendered = self.renderer.render(&relevance, &original);
    let bounding_box = self.locator.locate(&rendered.quantized, width, height);

    let mut annotated_image = rendered.overlay;
    match bounding_box {
      Some(bbox) => bbox.draw(
        &mut annotated_image,
        self.config.box_color,
        self.config.box_thickness,
      ),
      None => debug!("未找到显著区域，不绘制包围框"),
    }

    Ok(ClassificationResult {
      label,
      confidence: to_percent(confidence),
      class_index,
      bounding_box,
      annotated_image,
    })
  }
}

impl Deterministic for ClassificationResult {
  fn same_as(&self, other: &Self) -> bool {
    self.label == other.label
      && self.confidence == other.confidence
      && self.class_index == other.class_index
      && self.bounding_box == other.bounding_box
      && self.annotated_image == other.annotated_image
  }
}

impl<C: Classifier> Model for ClassificationPipeline<C> {
  type Input = RawImage;
  type Output = ClassificationResult;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("处理图像 {} ({} 字节)", input.name, input.bytes.len());
    self.classify(&input.bytes)
  }
}
