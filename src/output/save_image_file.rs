// 该文件是 Jianshi （拣识） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像与结果记录
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

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl,
  input::RawImage,
  label::WithLabel,
  output::Render,
  pipeline::ClassificationResult,
};

const IMAGE_SCHEME: &str = "image";
const DIR_SCHEME: &str = "dir";
const DIR_IMAGE_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("记录序列化错误: {0}")]
  RecordError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

enum Target {
  /// 固定输出文件
  File(PathBuf),
  /// 目录下按输入文件名生成
  Directory(PathBuf),
}

/// 标注图像写入图像文件，结果记录写入同名 `.json`
pub struct SaveImageFileOutput {
  target: Target,
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    let path = PathBuf::from(uri.path());
    let target = match uri.scheme() {
      IMAGE_SCHEME => Target::File(path),
      DIR_SCHEME => Target::Directory(path),
      other => {
        return Err(SaveImageFileError::SchemeMismatch(format!(
          "期望保存方式 '{}' 或 '{}', 实际保存方式 '{}'",
          IMAGE_SCHEME, DIR_SCHEME, other
        )));
      }
    };

    Ok(SaveImageFileOutput { target })
  }
}

/// 供调用方传输的结果记录，图像本身另存为文件
pub fn result_record(source: &str, result: &ClassificationResult) -> Value {
  let bbox = result.bounding_box.map(|b| {
    json!({
      "x": b.x,
      "y": b.y,
      "width": b.width,
      "height": b.height,
    })
  });

  json!({
    "source": source,
    "label": result.label.to_label_str(),
    "class_index": result.class_index,
    "confidence": result.confidence,
    "bbox": bbox,
    "created_at": chrono::Local::now().to_rfc3339(),
  })
}

impl SaveImageFileOutput {
  fn image_path(&self, frame: &RawImage) -> PathBuf {
    match &self.target {
      Target::File(path) => path.clone(),
      Target::Directory(dir) => {
        let stem = Path::new(&frame.name)
          .file_stem()
          .map(|s| s.to_string_lossy().into_owned())
          .unwrap_or_else(|| "image".to_string());
        dir.join(format!("{}.{}", stem, DIR_IMAGE_EXTENSION))
      }
    }
  }

  fn save(&self, path: &Path, frame: &RawImage, result: &ClassificationResult) -> Result<(), SaveImageFileError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    result.annotated_image.save(path)?;
    let record = result_record(&frame.name, result);
    std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(&record)?)?;

    info!("保存结果到文件: {}", path.display());
    Ok(())
  }
}

impl Render<RawImage, ClassificationResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RawImage, result: &ClassificationResult) -> Result<(), Self::Error> {
    let path = self.image_path(frame);
    self.save(&path, frame, result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  use crate::{label::WasteLabel, region::BoundingBox};

  fn result() -> ClassificationResult {
    ClassificationResult {
      label: WasteLabel::Glass,
      confidence: 92.0,
      class_index: 1,
      bounding_box: Some(BoundingBox {
        x: 1,
        y: 2,
        width: 3,
        height: 4,
      }),
      annotated_image: RgbImage::new(8, 8),
    }
  }

  #[test]
  fn record_carries_decision_and_geometry() {
    let record = result_record("bottle.jpg", &result());
    assert_eq!(record["label"], "GLASS");
    assert_eq!(record["confidence"], 92.0);
    assert_eq!(record["bbox"]["height"], 4);
    assert_eq!(record["source"], "bottle.jpg");
  }

  #[test]
  fn directory_target_writes_image_and_record() {
    let dir = std::env::temp_dir().join(format!("jianshi-out-{}", std::process::id()));
    let url = Url::parse(&format!("dir://{}", dir.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    let frame = RawImage {
      name: "bottle.png".to_string(),
      bytes: Vec::new(),
    };

    output.render_result(&frame, &result()).unwrap();
    assert!(dir.join("bottle.jpg").is_file());
    let record: Value =
      serde_json::from_slice(&std::fs::read(dir.join("bottle.json")).unwrap()).unwrap();
    assert_eq!(record["class_index"], 1);

    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
