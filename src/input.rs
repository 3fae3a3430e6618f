// 该文件是 Jianshi （拣识） 项目的一部分。
// src/input.rs - 图像输入
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

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod directory;
mod image_file;

pub use directory::DirectoryInput;
pub use image_file::ImageFileInput;

/// 未解码的图像字节，解码交给流水线
#[derive(Debug, Clone)]
pub struct RawImage {
  /// 来源文件名（不含目录），用于生成输出文件名
  pub name: String,
  pub bytes: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按 URI 方案选择输入源
pub enum InputWrapper {
  ImageFile(ImageFileInput),
  Directory(DirectoryInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let scheme = url.scheme();
    if scheme == ImageFileInput::SCHEME {
      Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?))
    } else if scheme == DirectoryInput::SCHEME {
      Ok(InputWrapper::Directory(DirectoryInput::from_url(url)?))
    } else {
      error!("不支持的输入方案: {}", scheme);
      Err(InputError::SchemeMismatch(format!(
        "期望 '{}' 或 '{}', 实际为 '{}'",
        ImageFileInput::SCHEME,
        DirectoryInput::SCHEME,
        scheme
      )))
    }
  }
}

impl Iterator for InputWrapper {
  type Item = RawImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ImageFile(input) => input.next(),
      InputWrapper::Directory(input) => input.next(),
    }
  }
}

fn file_name(path: &std::path::Path) -> String {
  path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| "image".to_string())
}
