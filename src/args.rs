// 该文件是 Jianshi （拣识） 项目的一部分。
// src/args.rs - 命令行可调参数
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

use clap::{Args, ValueEnum};

use crate::{
  classifier::TOP_LAYER,
  config::ExplainConfig,
  heatmap::{Colormap, RenderConfig},
  region::{MorphOperation, RegionConfig, ThresholdMethod},
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdKind {
  /// 自动阈值
  Otsu,
  /// 固定阈值，见 --fixed-threshold
  Fixed,
}

/// 推理与可视化参数
#[derive(Args, Debug, Clone)]
pub struct ExplainArgs {
  /// 模型输入宽度
  #[arg(long, default_value = "255", value_name = "PIXELS")]
  pub width: u32,

  /// 模型输入高度
  #[arg(long, default_value = "255", value_name = "PIXELS")]
  pub height: u32,

  /// 计算激活图的内部层名称
  #[arg(long, default_value = TOP_LAYER, value_name = "LAYER")]
  pub layer: String,

  /// 高斯平滑核尺寸（奇数）
  #[arg(long, default_value = "3", value_name = "SIZE")]
  pub blur_kernel: u32,

  /// 高斯 sigma，0 表示由核尺寸推导
  #[arg(long, default_value = "0.0", value_name = "SIGMA")]
  pub blur_sigma: f32,

  /// 原图叠加权重
  #[arg(long, default_value = "1.0")]
  pub alpha: f32,

  /// 热力层叠加权重（为 0 时输出不含热力色调）
  #[arg(long, default_value = "0.0")]
  pub beta: f32,

  /// 叠加偏置
  #[arg(long, default_value = "0.0")]
  pub gamma: f32,

  /// 调色板: jet, hot, gray
  #[arg(long, default_value = "jet", value_name = "NAME")]
  pub colormap: Colormap,

  /// 二值化方式
  #[arg(long, value_enum, default_value_t = ThresholdKind::Otsu)]
  pub threshold: ThresholdKind,

  /// 固定阈值 (0 - 255)
  #[arg(long, default_value = "127", value_name = "LEVEL")]
  pub fixed_threshold: u8,

  /// 形态学结构元素边长
  #[arg(long, default_value = "5", value_name = "SIZE")]
  pub morph_kernel: u8,

  /// 形态学操作: close, open, dilate, erode
  #[arg(long, default_value = "close", value_name = "OP")]
  pub morph_op: MorphOperation,

  /// 包围框外扩像素
  #[arg(long, default_value = "10", value_name = "PIXELS")]
  pub margin: u32,

  /// 包围框颜色 R,G,B
  #[arg(long, value_delimiter = ',', default_values_t = [0u8, 255, 0], value_name = "R,G,B")]
  pub box_color: Vec<u8>,

  /// 包围框线宽
  #[arg(long, default_value = "2", value_name = "PIXELS")]
  pub box_thickness: u32,

  /// 置信度阈值 (0.0 - 1.0)，不高于该值时输出 OTHER
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,
}

impl ExplainArgs {
  pub fn to_config(&self) -> ExplainConfig {
    let threshold = match self.threshold {
      ThresholdKind::Otsu => ThresholdMethod::Otsu,
      ThresholdKind::Fixed => ThresholdMethod::Fixed(self.fixed_threshold),
    };
    let box_color = match self.box_color.as_slice() {
      &[r, g, b] => [r, g, b],
      _ => ExplainConfig::default().box_color,
    };

    ExplainConfig::default()
      .with_target_size(self.width, self.height)
      .with_layer_name(self.layer.clone())
      .with_render(RenderConfig {
        blur_kernel_size: self.blur_kernel,
        blur_sigma: self.blur_sigma,
        alpha: self.alpha,
        beta: self.beta,
        gamma: self.gamma,
        colormap: self.colormap,
      })
      .with_region(RegionConfig {
        threshold,
        morph_kernel_size: self.morph_kernel,
        morph_operation: self.morph_op,
        margin: self.margin,
      })
      .with_box_style(box_color, self.box_thickness)
      .with_confidence_cutoff(self.confidence)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(flatten)]
    explain: ExplainArgs,
  }

  #[test]
  fn defaults_match_config_defaults() {
    let cli = Cli::parse_from(["jianshi"]);
    let config = cli.explain.to_config();
    let default = ExplainConfig::default();
    assert_eq!(config.target_size, default.target_size);
    assert_eq!(config.layer_name, default.layer_name);
    assert_eq!(config.render, default.render);
    assert_eq!(config.region, default.region);
    assert_eq!(config.box_color, default.box_color);
    assert_eq!(config.box_thickness, default.box_thickness);
    assert_eq!(config.confidence_cutoff, default.confidence_cutoff);
  }

  #[test]
  fn overrides_are_applied() {
    let cli = Cli::parse_from([
      "jianshi",
      "--beta",
      "0.4",
      "--threshold",
      "fixed",
      "--fixed-threshold",
      "90",
      "--colormap",
      "hot",
      "--box-color",
      "255,0,0",
    ]);
    let config = cli.explain.to_config();
    assert_eq!(config.render.beta, 0.4);
    assert_eq!(config.render.colormap, Colormap::Hot);
    assert_eq!(config.region.threshold, ThresholdMethod::Fixed(90));
    assert_eq!(config.box_color, [255, 0, 0]);
  }
}
