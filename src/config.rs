// 该文件是 Jianshi （拣识） 项目的一部分。
// src/config.rs - 推理与可视化参数
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

use image::imageops::FilterType;

use crate::{
  classifier::TOP_LAYER, heatmap::RenderConfig, label::WasteLabel, region::RegionConfig,
  tensor::Normalization,
};

const TARGET_WIDTH: u32 = 255;
const TARGET_HEIGHT: u32 = 255;
const CONFIDENCE_CUTOFF: f32 = 0.5;
const BBOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BBOX_THICKNESS: u32 = 2;

#[derive(Debug, Clone)]
pub struct ExplainConfig {
  /// 模型固定输入尺寸 (宽, 高)
  pub target_size: (u32, u32),
  pub resize_filter: FilterType,
  pub normalization: Normalization,
  /// 用于计算激活图的内部层
  pub layer_name: String,
  pub render: RenderConfig,
  pub region: RegionConfig,
  pub box_color: [u8; 3],
  pub box_thickness: u32,
  /// 置信度不高于该值时输出兜底类别
  pub confidence_cutoff: f32,
  pub fallback_label: WasteLabel,
}

impl Default for ExplainConfig {
  fn default() -> Self {
    Self {
      target_size: (TARGET_WIDTH, TARGET_HEIGHT),
      resize_filter: FilterType::CatmullRom,
      normalization: Normalization::default(),
      layer_name: TOP_LAYER.to_string(),
      render: RenderConfig::default(),
      region: RegionConfig::default(),
      box_color: BBOX_COLOR,
      box_thickness: BBOX_THICKNESS,
      confidence_cutoff: CONFIDENCE_CUTOFF,
      fallback_label: WasteLabel::Other,
    }
  }
}

impl ExplainConfig {
  pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
    self.target_size = (width, height);
    self
  }

  pub fn with_layer_name(mut self, layer_name: impl Into<String>) -> Self {
    self.layer_name = layer_name.into();
    self
  }

  pub fn with_render(mut self, render: RenderConfig) -> Self {
    self.render = render;
    self
  }

  pub fn with_region(mut self, region: RegionConfig) -> Self {
    self.region = region;
    self
  }

  pub fn with_box_style(mut self, color: [u8; 3], thickness: u32) -> Self {
    self.box_color = color;
    self.box_thickness = thickness;
    self
  }

  pub fn with_confidence_cutoff(mut self, cutoff: f32) -> Self {
    self.confidence_cutoff = cutoff;
    self
  }
}
