// 该文件是 Jianshi （拣识） 项目的一部分。
// src/classifier/convnet.rs - 轻量卷积分类器
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

//! 结构：3×3 卷积 + ReLU（`stem_conv`）→ 平均池化（`top_activation`）
//! → 全局平均池化 → 全连接 → softmax。
//!
//! 两个命名层都可以捕获，梯度以解析形式给出。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  classifier::{Classifier, GradientProvider, LayerCapture},
  tensor::{FeatureMap, GradientMap, ModelInput, ScoreVector},
};

pub const STEM_LAYER: &str = "stem_conv";
pub const TOP_LAYER: &str = "top_activation";

const KERNEL_SIZE: usize = 3;
const INPUT_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum ConvNetError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型解析错误: {0}")]
  ModelParseError(#[from] serde_json::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型不存在名为 {0} 的层")]
  UnknownLayer(String),
  #[error("输入尺寸 {height}x{width} 小于池化窗口 {pool}")]
  InputTooSmall {
    height: usize,
    width: usize,
    pool: usize,
  },
  #[error("类别下标 {index} 超出范围 (类别数 {num_classes})")]
  ClassIndexOutOfRange { index: usize, num_classes: usize },
}

/// 模型权重文件（JSON）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvNetWeights {
  pub stem_channels: usize,
  /// `[out_c][ky][kx][in_c]`
  pub stem_kernel: Vec<f32>,
  pub stem_bias: Vec<f32>,
  pub pool_size: usize,
  pub num_classes: usize,
  /// `[class][channel]`
  pub dense_weights: Vec<f32>,
  pub dense_bias: Vec<f32>,
}

impl ConvNetWeights {
  fn validate(&self) -> Result<(), ConvNetError> {
    let checks = [
      (
        "stem_kernel",
        self.stem_kernel.len(),
        self.stem_channels * KERNEL_SIZE * KERNEL_SIZE * INPUT_CHANNELS,
      ),
      ("stem_bias", self.stem_bias.len(), self.stem_channels),
      (
        "dense_weights",
        self.dense_weights.len(),
        self.num_classes * self.stem_channels,
      ),
      ("dense_bias", self.dense_bias.len(), self.num_classes),
    ];

    for (name, actual, expected) in checks {
      if actual != expected {
        error!("权重 {} 长度为 {}, 预期为 {}", name, actual, expected);
        return Err(ConvNetError::ModelInvalid(format!(
          "权重 {} 长度为 {}, 预期为 {}",
          name, actual, expected
        )));
      }
    }

    if self.stem_channels == 0 || self.num_classes == 0 || self.pool_size == 0 {
      return Err(ConvNetError::ModelInvalid(
        "通道数、类别数与池化窗口必须大于 0".to_string(),
      ));
    }

    Ok(())
  }
}

pub struct ConvNet {
  channels: usize,
  pool_size: usize,
  num_classes: usize,
  stem_kernel: Box<[f32]>,
  stem_bias: Box<[f32]>,
  dense_weights: Arc<[f32]>,
  dense_bias: Box<[f32]>,
}

enum WeightSource {
  File(String),
  Memory(ConvNetWeights),
}

pub struct ConvNetBuilder {
  source: WeightSource,
}

impl FromUrlWithScheme for ConvNetBuilder {
  const SCHEME: &'static str = "convnet";
}

impl FromUrl for ConvNetBuilder {
  type Error = ConvNetError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConvNetError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(ConvNetBuilder {
      source: WeightSource::File(url.path().to_string()),
    })
  }
}

impl ConvNetBuilder {
  pub fn from_weights(weights: ConvNetWeights) -> Self {
    ConvNetBuilder {
      source: WeightSource::Memory(weights),
    }
  }

  pub fn build(self) -> Result<ConvNet, ConvNetError> {
    let weights = match self.source {
      WeightSource::File(path) => {
        info!("加载模型文件: {}", path);
        let data = std::fs::read(&path)?;
        debug!("模型文件大小: {:.2} KB", data.len() as f64 / 1024.0);
        serde_json::from_slice::<ConvNetWeights>(&data)?
      }
      WeightSource::Memory(weights) => weights,
    };

    weights.validate()?;
    debug!(
      "模型结构: {} 通道, 池化 {}, {} 类",
      weights.stem_channels, weights.pool_size, weights.num_classes
    );
    info!("模型加载完成");

    Ok(ConvNet {
      channels: weights.stem_channels,
      pool_size: weights.pool_size,
      num_classes: weights.num_classes,
      stem_kernel: weights.stem_kernel.into_boxed_slice(),
      stem_bias: weights.stem_bias.into_boxed_slice(),
      dense_weights: weights.dense_weights.into(),
      dense_bias: weights.dense_bias.into_boxed_slice(),
    })
  }
}

impl ConvNet {
  /// 3×3 同尺寸卷积（零填充）+ ReLU
  fn stem(&self, input: &ModelInput) -> FeatureMap {
    let (height, width) = (input.height(), input.width());
    let mut out = FeatureMap::zeros(height, width, self.channels);
    let half = (KERNEL_SIZE / 2) as isize;

    for h in 0..height {
      for w in 0..width {
        for oc in 0..self.channels {
          let mut acc = self.stem_bias[oc];
          for ky in 0..KERNEL_SIZE {
            let y = h as isize + ky as isize - half;
            if y < 0 || y >= height as isize {
              continue;
            }
            for kx in 0..KERNEL_SIZE {
              let x = w as isize + kx as isize - half;
              if x < 0 || x >= width as isize {
                continue;
              }
              let base = ((oc * KERNEL_SIZE + ky) * KERNEL_SIZE + kx) * INPUT_CHANNELS;
              for ic in 0..INPUT_CHANNELS {
                acc += self.stem_kernel[base + ic] * input.at(y as usize, x as usize, ic);
              }
            }
          }
          out.set(h, w, oc, acc.max(0.0));
        }
      }
    }

    out
  }

  /// 步长等于窗口的平均池化，尾部不足一个窗口的行列被丢弃
  fn pool(&self, stem: &FeatureMap) -> Result<FeatureMap, ConvNetError> {
    let p = self.pool_size;
    let (height, width) = (stem.height() / p, stem.width() / p);
    if height == 0 || width == 0 {
      return Err(ConvNetError::InputTooSmall {
        height: stem.height(),
        width: stem.width(),
        pool: p,
      });
    }

    let mut out = FeatureMap::zeros(height, width, self.channels);
    let area = (p * p) as f32;
    for h in 0..height {
      for w in 0..width {
        for c in 0..self.channels {
          let mut acc = 0.0;
          for dy in 0..p {
            for dx in 0..p {
              acc += stem.at(h * p + dy, w * p + dx, c);
            }
          }
          out.set(h, w, c, acc / area);
        }
      }
    }

    Ok(out)
  }

  /// 全局平均池化 → 全连接 → softmax
  fn head(&self, top: &FeatureMap) -> ScoreVector {
    let pooled = top.spatial_mean();
    let logits: Vec<f32> = (0..self.num_classes)
      .map(|j| {
        let row = &self.dense_weights[j * self.channels..(j + 1) * self.channels];
        row.iter().zip(&pooled).map(|(w, g)| w * g).sum::<f32>() + self.dense_bias[j]
      })
      .collect();
    softmax(&logits)
  }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|z| (z - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

impl Classifier for ConvNet {
  type Error = ConvNetError;
  type Gradients = ConvNetGradients;

  fn num_classes(&self) -> usize {
    self.num_classes
  }

  fn has_layer(&self, name: &str) -> bool {
    name == STEM_LAYER || name == TOP_LAYER
  }

  fn forward_scores(&self, input: &ModelInput) -> Result<ScoreVector, Self::Error> {
    debug!("执行前向推理");
    let stem = self.stem(input);
    let top = self.pool(&stem)?;
    Ok(self.head(&top))
  }

  fn forward_with_gradient(
    &self,
    input: &ModelInput,
    layer: &str,
  ) -> Result<LayerCapture<Self::Gradients>, Self::Error> {
    debug!("执行带梯度的前向推理, 捕获层: {}", layer);
    let stem = self.stem(input);
    let top = self.pool(&stem)?;
    let scores = self.head(&top);

    let target = match layer {
      TOP_LAYER => GradientTarget::Top,
      STEM_LAYER => GradientTarget::Stem {
        height: stem.height(),
        width: stem.width(),
      },
      _ => return Err(ConvNetError::UnknownLayer(layer.to_string())),
    };

    let gradients = ConvNetGradients {
      probabilities: scores.clone(),
      dense_weights: Arc::clone(&self.dense_weights),
      channels: self.channels,
      pool_size: self.pool_size,
      top_shape: (top.height(), top.width()),
      target,
    };
    let feature_map = match target {
      GradientTarget::Top => top,
      GradientTarget::Stem { .. } => stem,
    };

    Ok(LayerCapture {
      feature_map,
      scores,
      gradients,
    })
  }
}

#[derive(Debug, Clone, Copy)]
enum GradientTarget {
  Top,
  Stem { height: usize, width: usize },
}

/// 保存一次前向计算中反向传播所需的中间量
pub struct ConvNetGradients {
  probabilities: Vec<f32>,
  dense_weights: Arc<[f32]>,
  channels: usize,
  pool_size: usize,
  top_shape: (usize, usize),
  target: GradientTarget,
}

impl ConvNetGradients {
  /// ∂p_k/∂g_c，g 为全局平均池化后的向量
  fn pooled_gradient(&self, k: usize) -> Vec<f32> {
    let p = &self.probabilities;
    let mut grad = vec![0.0f32; self.channels];
    for (j, &p_j) in p.iter().enumerate() {
      let kronecker = if j == k { 1.0 } else { 0.0 };
      let dz = p[k] * (kronecker - p_j);
      let row = &self.dense_weights[j * self.channels..(j + 1) * self.channels];
      for (g, w) in grad.iter_mut().zip(row) {
        *g += dz * w;
      }
    }
    grad
  }
}

impl GradientProvider for ConvNetGradients {
  type Error = ConvNetError;

  fn gradient(&self, class_index: usize) -> Result<GradientMap, Self::Error> {
    let num_classes = self.probabilities.len();
    if class_index >= num_classes {
      return Err(ConvNetError::ClassIndexOutOfRange {
        index: class_index,
        num_classes,
      });
    }

    let (top_h, top_w) = self.top_shape;
    let pooled = self.pooled_gradient(class_index);
    let top_grad: Vec<f32> = pooled.iter().map(|g| g / (top_h * top_w) as f32).collect();

    let map = match self.target {
      GradientTarget::Top => {
        let mut map = FeatureMap::zeros(top_h, top_w, self.channels);
        for h in 0..top_h {
          for w in 0..top_w {
            for (c, g) in top_grad.iter().enumerate() {
              map.set(h, w, c, *g);
            }
          }
        }
        map
      }
      GradientTarget::Stem { height, width } => {
        let p = self.pool_size;
        let area = (p * p) as f32;
        let mut map = FeatureMap::zeros(height, width, self.channels);
        // 被池化丢弃的尾部行列梯度为 0
        for h in 0..top_h * p {
          for w in 0..top_w * p {
            for (c, g) in top_grad.iter().enumerate() {
              map.set(h, w, c, g / area);
            }
          }
        }
        map
      }
    };

    Ok(map)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  use crate::tensor::Normalization;

  fn weights() -> ConvNetWeights {
    let channels = 2;
    let mut stem_kernel = vec![0.0; channels * KERNEL_SIZE * KERNEL_SIZE * INPUT_CHANNELS];
    // 通道 0 响应红色，通道 1 响应蓝色，均只看中心像素
    let center = (KERNEL_SIZE + 1) * INPUT_CHANNELS;
    stem_kernel[center] = 0.01;
    stem_kernel[KERNEL_SIZE * KERNEL_SIZE * INPUT_CHANNELS + center + 2] = 0.01;

    ConvNetWeights {
      stem_channels: channels,
      stem_kernel,
      stem_bias: vec![0.0, 0.0],
      pool_size: 2,
      num_classes: 3,
      dense_weights: vec![2.0, -1.0, -1.0, 2.0, 0.5, 0.5],
      dense_bias: vec![0.0, 0.0, 0.1],
    }
  }

  fn red_image() -> ModelInput {
    let image = RgbImage::from_pixel(4, 4, Rgb([200, 0, 0]));
    ModelInput::from_rgb_image(&image, &Normalization::default())
  }

  #[test]
  fn scores_are_a_probability_distribution() {
    let net = ConvNetBuilder::from_weights(weights()).build().unwrap();
    let scores = net.forward_scores(&red_image()).unwrap();
    assert_eq!(scores.len(), 3);
    assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    assert!(scores[0] > scores[1]);
  }

  #[test]
  fn top_gradient_matches_finite_difference() {
    let net = ConvNetBuilder::from_weights(weights()).build().unwrap();
    let capture = net.forward_with_gradient(&red_image(), TOP_LAYER).unwrap();
    let grad = capture.gradients.gradient(0).unwrap();
    assert_eq!(grad.shape(), capture.feature_map.shape());

    let eps = 1e-3;
    for c in 0..2 {
      let mut plus = capture.feature_map.clone();
      plus.set(0, 1, c, plus.at(0, 1, c) + eps);
      let mut minus = capture.feature_map.clone();
      minus.set(0, 1, c, minus.at(0, 1, c) - eps);
      let numeric = (net.head(&plus)[0] - net.head(&minus)[0]) / (2.0 * eps);
      assert!(
        (numeric - grad.at(0, 1, c)).abs() < 1e-3,
        "通道 {}: 数值梯度 {} 解析梯度 {}",
        c,
        numeric,
        grad.at(0, 1, c)
      );
    }
  }

  #[test]
  fn stem_gradient_spreads_over_pool_window() {
    let net = ConvNetBuilder::from_weights(weights()).build().unwrap();
    let input = {
      let image = RgbImage::from_pixel(5, 5, Rgb([200, 0, 0]));
      ModelInput::from_rgb_image(&image, &Normalization::default())
    };
    let top = net.forward_with_gradient(&input, TOP_LAYER).unwrap();
    let stem = net.forward_with_gradient(&input, STEM_LAYER).unwrap();
    assert_eq!(stem.feature_map.shape(), (5, 5, 2));

    let top_grad = top.gradients.gradient(0).unwrap();
    let stem_grad = stem.gradients.gradient(0).unwrap();
    assert!((stem_grad.at(0, 0, 0) * 4.0 - top_grad.at(0, 0, 0)).abs() < 1e-6);
    // 第 5 行被池化丢弃
    assert_eq!(stem_grad.at(4, 0, 0), 0.0);
  }

  #[test]
  fn unknown_layer_and_class_are_rejected() {
    let net = ConvNetBuilder::from_weights(weights()).build().unwrap();
    assert!(!net.has_layer("block7a"));
    assert!(matches!(
      net.forward_with_gradient(&red_image(), "block7a"),
      Err(ConvNetError::UnknownLayer(_))
    ));

    let capture = net.forward_with_gradient(&red_image(), TOP_LAYER).unwrap();
    assert!(matches!(
      capture.gradients.gradient(3),
      Err(ConvNetError::ClassIndexOutOfRange { index: 3, .. })
    ));
  }

  #[test]
  fn inconsistent_weights_are_invalid() {
    let mut bad = weights();
    bad.dense_bias.pop();
    assert!(matches!(
      ConvNetBuilder::from_weights(bad).build(),
      Err(ConvNetError::ModelInvalid(_))
    ));
  }

  #[test]
  fn input_smaller_than_pool_is_an_error() {
    let mut w = weights();
    w.pool_size = 8;
    let net = ConvNetBuilder::from_weights(w).build().unwrap();
    assert!(matches!(
      net.forward_scores(&red_image()),
      Err(ConvNetError::InputTooSmall { pool: 8, .. })
    ));
  }

  #[test]
  fn builder_requires_convnet_scheme() {
    let url = Url::parse("onnx:///tmp/model.onnx").unwrap();
    assert!(matches!(
      ConvNetBuilder::from_url(&url),
      Err(ConvNetError::ModelPathError(_))
    ));
  }

  #[test]
  fn builder_loads_weights_from_json_file() {
    let path = std::env::temp_dir().join(format!("jianshi-convnet-{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_vec(&weights()).unwrap()).unwrap();

    let url = Url::parse(&format!("convnet://{}", path.display())).unwrap();
    let net = ConvNetBuilder::from_url(&url).unwrap().build().unwrap();
    assert_eq!(net.num_classes(), 3);
    assert!(net.has_layer(TOP_LAYER));

    std::fs::remove_file(&path).unwrap();
  }
}
