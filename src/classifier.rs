// 该文件是 Jianshi （拣识） 项目的一部分。
// src/classifier.rs - 分类器接口
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

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::tensor::{FeatureMap, GradientMap, ModelInput, ScoreVector};

/// 给定类别下标，返回该类别分数对所捕获特征图的梯度
pub trait GradientProvider {
  type Error;

  fn gradient(&self, class_index: usize) -> Result<GradientMap, Self::Error>;
}

/// 一次前向计算同时得到的指定层特征图、最终分数以及梯度计算入口
pub struct LayerCapture<G> {
  pub feature_map: FeatureMap,
  pub scores: ScoreVector,
  pub gradients: G,
}

/// 分类器只暴露两种能力：前向打分，以及带梯度的指定层前向
///
/// 推理不修改权重，实现者若可重入，则可以在多个请求之间无锁共享。
pub trait Classifier {
  type Error: std::error::Error + Send + Sync + 'static;
  type Gradients: GradientProvider<Error = Self::Error>;

  /// 输出分数向量的长度
  fn num_classes(&self) -> usize;

  /// 是否存在可捕获的指定内部层
  fn has_layer(&self, name: &str) -> bool;

  fn forward_scores(&self, input: &ModelInput) -> Result<ScoreVector, Self::Error>;

  fn forward_with_gradient(
    &self,
    input: &ModelInput,
    layer: &str,
  ) -> Result<LayerCapture<Self::Gradients>, Self::Error>;
}

/// 将不可重入的分类器包装为串行调用
///
/// 前向计算与之后的梯度计算都在同一把锁内进行，预处理与渲染不受影响。
pub struct SerializedClassifier<C> {
  inner: Arc<Mutex<C>>,
  num_classes: usize,
}

fn lock<C>(inner: &Mutex<C>) -> MutexGuard<'_, C> {
  // 推理不修改分类器状态，锁中毒时沿用内部值即可
  inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: Classifier> SerializedClassifier<C> {
  pub fn new(inner: C) -> Self {
    let num_classes = inner.num_classes();
    Self {
      inner: Arc::new(Mutex::new(inner)),
      num_classes,
    }
  }
}

/// 计算梯度前先取得分类器的锁
pub struct SerializedGradients<C, G> {
  inner: Arc<Mutex<C>>,
  gradients: G,
}

impl<C, G: GradientProvider> GradientProvider for SerializedGradients<C, G> {
  type Error = G::Error;

  fn gradient(&self, class_index: usize) -> Result<GradientMap, Self::Error> {
    let _guard = lock(&self.inner);
    self.gradients.gradient(class_index)
  }
}

impl<C: Classifier> Classifier for SerializedClassifier<C> {
  type Error = C::Error;
  type Gradients = SerializedGradients<C, C::Gradients>;

  fn num_classes(&self) -> usize {
    self.num_classes
  }

  fn has_layer(&self, name: &str) -> bool {
    lock(&self.inner).has_layer(name)
  }

  fn forward_scores(&self, input: &ModelInput) -> Result<ScoreVector, Self::Error> {
    lock(&self.inner).forward_scores(input)
  }

  fn forward_with_gradient(
    &self,
    input: &ModelInput,
    layer: &str,
  ) -> Result<LayerCapture<Self::Gradients>, Self::Error> {
    let capture = lock(&self.inner).forward_with_gradient(input, layer)?;
    Ok(LayerCapture {
      feature_map: capture.feature_map,
      scores: capture.scores,
      gradients: SerializedGradients {
        inner: Arc::clone(&self.inner),
        gradients: capture.gradients,
      },
    })
  }
}

mod convnet;
pub use self::convnet::{
  ConvNet, ConvNetBuilder, ConvNetError, ConvNetGradients, ConvNetWeights, STEM_LAYER, TOP_LAYER,
};

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
    time::Duration,
  };

  #[derive(Debug, thiserror::Error)]
  #[error("模拟错误")]
  struct MockError;

  /// 记录运行时是否被并发进入
  #[derive(Default)]
  struct Runtime {
    busy: AtomicBool,
    overlaps: AtomicUsize,
    entries: AtomicUsize,
  }

  impl Runtime {
    fn enter(&self) {
      if self.busy.swap(true, Ordering::SeqCst) {
        self.overlaps.fetch_add(1, Ordering::SeqCst);
      }
      self.entries.fetch_add(1, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(5));
      self.busy.store(false, Ordering::SeqCst);
    }
  }

  struct NonReentrant {
    runtime: Arc<Runtime>,
  }

  struct NonReentrantGradients {
    runtime: Arc<Runtime>,
  }

  impl GradientProvider for NonReentrantGradients {
    type Error = MockError;

    fn gradient(&self, _class_index: usize) -> Result<GradientMap, MockError> {
      self.runtime.enter();
      Ok(GradientMap::zeros(2, 2, 1))
    }
  }

  impl Classifier for NonReentrant {
    type Error = MockError;
    type Gradients = NonReentrantGradients;

    fn num_classes(&self) -> usize {
      2
    }

    fn has_layer(&self, _name: &str) -> bool {
      true
    }

    fn forward_scores(&self, _input: &ModelInput) -> Result<ScoreVector, MockError> {
      self.runtime.enter();
      Ok(vec![0.4, 0.6])
    }

    fn forward_with_gradient(
      &self,
      _input: &ModelInput,
      _layer: &str,
    ) -> Result<LayerCapture<NonReentrantGradients>, MockError> {
      self.runtime.enter();
      Ok(LayerCapture {
        feature_map: FeatureMap::zeros(2, 2, 1),
        scores: vec![0.4, 0.6],
        gradients: NonReentrantGradients {
          runtime: Arc::clone(&self.runtime),
        },
      })
    }
  }

  #[test]
  fn forward_and_backward_never_overlap() {
    let runtime = Arc::new(Runtime::default());
    let classifier = SerializedClassifier::new(NonReentrant {
      runtime: Arc::clone(&runtime),
    });
    let input = ModelInput::from_rgb_image(
      &image::RgbImage::new(4, 4),
      &crate::tensor::Normalization::default(),
    );

    thread::scope(|scope| {
      for _ in 0..6 {
        scope.spawn(|| {
          for _ in 0..3 {
            classifier.forward_scores(&input).unwrap();
            let capture = classifier.forward_with_gradient(&input, "any").unwrap();
            // 模拟预处理等锁外工作，给其他线程进入的机会
            thread::sleep(Duration::from_millis(1));
            capture.gradients.gradient(1).unwrap();
          }
        });
      }
    });

    assert_eq!(runtime.entries.load(Ordering::SeqCst), 6 * 3 * 3);
    assert_eq!(runtime.overlaps.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn serialized_keeps_class_count() {
    let classifier = SerializedClassifier::new(NonReentrant {
      runtime: Arc::default(),
    });
    assert_eq!(classifier.num_classes(), 2);
    assert!(classifier.has_layer("top_activation"));
  }
}
