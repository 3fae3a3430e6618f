// 该文件是 Jianshi （拣识） 项目的一部分。
// src/input/directory.rs - 目录批量输入
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

use std::{collections::VecDeque, path::PathBuf};

use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, RawImage, file_name},
};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// 按文件名顺序逐个读取目录中的图像文件
pub struct DirectoryInput {
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "dir";
}

impl FromUrl for DirectoryInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(url.path())? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));
      if path.is_file() && is_image {
        paths.push(path);
      }
    }
    paths.sort();
    info!("目录 {} 中找到 {} 张图像", url.path(), paths.len());

    Ok(DirectoryInput {
      pending: paths.into(),
    })
  }
}

impl Iterator for DirectoryInput {
  type Item = RawImage;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.pending.pop_front() {
      match std::fs::read(&path) {
        Ok(bytes) => {
          return Some(RawImage {
            name: file_name(&path),
            bytes,
          });
        }
        Err(e) => error!("读取 {} 失败, 跳过: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lists_images_in_name_order() {
    let dir = std::env::temp_dir().join(format!("jianshi-dir-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("b.PNG"), b"b").unwrap();
    std::fs::write(dir.join("a.jpg"), b"a").unwrap();
    std::fs::write(dir.join("notes.txt"), b"skip").unwrap();

    let url = Url::parse(&format!("dir://{}", dir.display())).unwrap();
    let names: Vec<String> = DirectoryInput::from_url(&url)
      .unwrap()
      .map(|image| image.name)
      .collect();
    assert_eq!(names, vec!["a.jpg".to_string(), "b.PNG".to_string()]);

    std::fs::remove_dir_all(&dir).unwrap();
  }
}
