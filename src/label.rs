// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/label.rs - 类别标签表
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

use thiserror::Error;
use tracing::{debug, info, warn};

/// 类别索引越界时使用的占位标签
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("类别索引越界: {index}，标签总数 {len}")]
  IndexOutOfRange { index: usize, len: usize },
}

/// 类别标签表，按行号索引，构建后不可变
///
/// 文件按行切分，兼容 `\r\n` 换行；末尾的空行会被丢弃，
/// 中间的空行保留为空标签以维持索引位置。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
  names: Box<[String]>,
}

impl LabelTable {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let table = Self::parse(&content);
    debug!("标签数量: {}", table.len());
    Ok(table)
  }

  pub fn parse(content: &str) -> Self {
    let mut names: Vec<String> = content.lines().map(str::to_string).collect();
    while names.last().is_some_and(|name| name.trim().is_empty()) {
      names.pop();
    }
    Self {
      names: names.into_boxed_slice(),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn class_name_at(&self, index: usize) -> Result<&str, LabelError> {
    self
      .names
      .get(index)
      .map(String::as_str)
      .ok_or(LabelError::IndexOutOfRange {
        index,
        len: self.names.len(),
      })
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

/// 类别名称解析能力
///
/// 返回 `None` 表示检测器不带标签表，检测结果只保留类别索引。
pub trait ResolveLabel {
  fn label_for(&self, class_index: u32) -> Option<String>;
}

impl ResolveLabel for LabelTable {
  fn label_for(&self, class_index: u32) -> Option<String> {
    match self.class_name_at(class_index as usize) {
      Ok(name) => Some(name.to_string()),
      Err(e) => {
        warn!("{}, 使用占位标签", e);
        Some(UNKNOWN_LABEL.to_string())
      }
    }
  }
}

impl<R: ResolveLabel> ResolveLabel for Option<R> {
  fn label_for(&self, class_index: u32) -> Option<String> {
    self.as_ref().and_then(|r| r.label_for(class_index))
  }
}

/// 不解析类别名称
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLabels;

impl ResolveLabel for NoLabels {
  fn label_for(&self, _class_index: u32) -> Option<String> {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_labels(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
  }

  #[test]
  fn trailing_newline_does_not_add_a_label() {
    let with_newline = write_labels("person\nbicycle\ncar\n");
    let without_newline = write_labels("person\nbicycle\ncar");

    assert_eq!(LabelTable::load(with_newline.path()).unwrap().len(), 3);
    assert_eq!(LabelTable::load(without_newline.path()).unwrap().len(), 3);
  }

  #[test]
  fn trailing_blank_lines_are_dropped_interior_kept() {
    let table = LabelTable::parse("a\n\nc\n\n  \n");
    assert_eq!(table.len(), 3);
    assert_eq!(table.class_name_at(1).unwrap(), "");
    assert_eq!(table.class_name_at(2).unwrap(), "c");
  }

  #[test]
  fn crlf_line_endings() {
    let table = LabelTable::parse("dog\r\ncat\r\n");
    assert_eq!(table.iter().collect::<Vec<_>>(), vec!["dog", "cat"]);
  }

  #[test]
  fn out_of_range_index_is_an_error() {
    let table: LabelTable = ["person", "bicycle"].into_iter().collect();
    assert!(matches!(
      table.class_name_at(2),
      Err(LabelError::IndexOutOfRange { index: 2, len: 2 })
    ));
    assert_eq!(table.label_for(7).as_deref(), Some(UNKNOWN_LABEL));
  }

  #[test]
  fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = LabelTable::load(dir.path().join("missing.txt"));
    assert!(matches!(result, Err(LabelError::Io(_))));
  }

  #[test]
  fn optional_and_absent_tables() {
    let table: LabelTable = ["a", "b"].into_iter().collect();
    assert_eq!(Some(table).label_for(1).as_deref(), Some("b"));
    assert_eq!(None::<LabelTable>.label_for(1), None);
    assert_eq!(NoLabels.label_for(0), None);
  }
}
