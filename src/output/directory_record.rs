// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::Detection,
  detector::Inference,
  input::InputFrame,
  output::{Render, display_name},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("路径解码失败: {0}")]
  PathError(String),
  #[error("帧计数器锁已损坏")]
  Poisoned,
}

/// 文本记录，每个目标一行: `名称, 分数, x1, y1, x2, y2`
#[derive(Debug, Clone, Copy)]
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn format(&self, detections: &[Detection]) -> String {
    detections
      .iter()
      .map(|det| {
        let name = if self.label_with_name {
          display_name(det)
        } else {
          det.class_index.to_string()
        };
        format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          name, det.score, det.bbox[0], det.bbox[1], det.bbox[2], det.bbox[3]
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn record(&self, detections: &[Detection], path: &Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.format(detections))
  }
}

/// 按日期分目录保存帧图像与检测记录
///
/// `folder:///data/records?record=id&always`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  record: Record,
  frame_counter: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let label_with_name = !uri.query_pairs().any(|(k, v)| k == "record" && v == "id");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    let directory = urlencoding::decode(uri.path())
      .map_err(|e| DirectoryRecordOutputError::PathError(e.to_string()))?;
    Ok(Self::new(
      directory.into_owned(),
      Record { label_with_name },
      always,
    ))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, record: Record, always: bool) -> Self {
    Self {
      directory: directory.into(),
      record,
      frame_counter: Mutex::new(0),
      always,
    }
  }

  fn frame_id(&self) -> Result<u16, DirectoryRecordOutputError> {
    let mut counter = self
      .frame_counter
      .lock()
      .map_err(|_| DirectoryRecordOutputError::Poisoned)?;
    *counter = counter.wrapping_add(1);
    Ok(*counter)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()?
    )))
  }
}

impl Render<InputFrame, Inference> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &InputFrame, result: &Inference) -> Result<(), Self::Error> {
    if result.skipped.is_some() || (!self.always && result.is_empty()) {
      return Ok(());
    }
    let path = self.frame_path()?;
    frame.frame.to_rgb_image().save(&path)?;
    self.record.record(&result.detections, &path)?;
    debug!("已保存记录: {}", path.display());
    Ok(())
  }
}
