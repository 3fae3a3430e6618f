// 该文件是 Jianshi （拣识） 项目的一部分。
// src/input/image_file.rs - 单个图像文件输入
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

use std::path::Path;

use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, RawImage, file_name},
};

pub struct ImageFileInput {
  image: Option<RawImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = Path::new(url.path());
    let bytes = std::fs::read(path)?;
    debug!("读取图像文件 {} ({} 字节)", path.display(), bytes.len());

    Ok(ImageFileInput {
      image: Some(RawImage {
        name: file_name(path),
        bytes,
      }),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = RawImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_file_once() {
    let path = std::env::temp_dir().join(format!("jianshi-input-{}.png", std::process::id()));
    std::fs::write(&path, b"not really a png").unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let first = input.next().unwrap();
    assert_eq!(first.bytes, b"not really a png");
    assert!(first.name.starts_with("jianshi-input-"));
    assert!(input.next().is_none());

    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("file:///tmp/a.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}
