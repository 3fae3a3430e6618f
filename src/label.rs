// 该文件是 Jianshi （拣识） 项目的一部分。
// src/label.rs - 垃圾类别标签
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

use std::fmt;

pub trait WithLabel: Sized + fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;
}

/// 垃圾材质类别，顺序与模型输出分数向量一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WasteLabel {
  Cardboard,
  Glass,
  Metal,
  Organic,
  Paper,
  Pen,
  Pet,
  PlasticBag,
  Unicel,
  Wrapper,
  /// 兜底类别：低置信度预测一律归为此类
  Other,
}

impl WasteLabel {
  pub const ALL: [WasteLabel; 11] = [
    WasteLabel::Cardboard,
    WasteLabel::Glass,
    WasteLabel::Metal,
    WasteLabel::Organic,
    WasteLabel::Paper,
    WasteLabel::Pen,
    WasteLabel::Pet,
    WasteLabel::PlasticBag,
    WasteLabel::Unicel,
    WasteLabel::Wrapper,
    WasteLabel::Other,
  ];

  pub const fn count() -> usize {
    Self::ALL.len()
  }

  pub const fn name(&self) -> &'static str {
    match self {
      WasteLabel::Cardboard => "CARDBOARD",
      WasteLabel::Glass => "GLASS",
      WasteLabel::Metal => "METAL",
      WasteLabel::Organic => "ORGANIC",
      WasteLabel::Paper => "PAPER",
      WasteLabel::Pen => "PEN",
      WasteLabel::Pet => "PET",
      WasteLabel::PlasticBag => "PLASTIC_BAG",
      WasteLabel::Unicel => "UNICEL",
      WasteLabel::Wrapper => "WRAPPER",
      WasteLabel::Other => "OTHER",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    let upper = name.to_uppercase();
    Self::ALL.into_iter().find(|label| label.name() == upper)
  }
}

impl WithLabel for WasteLabel {
  fn to_label_str(&self) -> String {
    self.name().to_string()
  }

  fn to_label_id(&self) -> u32 {
    *self as u32
  }

  fn from_label_id(id: u32) -> Option<Self> {
    Self::ALL.get(id as usize).copied()
  }
}

impl fmt::Display for WasteLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn label_ids_follow_table_order() {
    for (idx, label) in WasteLabel::ALL.iter().enumerate() {
      assert_eq!(label.to_label_id() as usize, idx);
      assert_eq!(WasteLabel::from_label_id(idx as u32), Some(*label));
    }
    assert_eq!(WasteLabel::from_label_id(11), None);
  }

  #[test]
  fn names_match_model_class_table() {
    assert_eq!(WasteLabel::count(), 11);
    assert_eq!(WasteLabel::Glass.to_label_str(), "GLASS");
    assert_eq!(WasteLabel::from_name("plastic_bag"), Some(WasteLabel::PlasticBag));
    assert_eq!(WasteLabel::from_name("STONE"), None);
  }
}
