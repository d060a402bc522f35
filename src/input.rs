// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
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

use std::path::PathBuf;

use thiserror::Error;

use crate::{
  FromUrl,
  frame::{FrameError, OwnedFrame, RegionOfInterest},
};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的帧来源
pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Iterator for InputWrapper {
  type Item = InputFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match *self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(ref mut input) => input.next(),
    }
  }
}

/// 输入源产出的一帧及其感兴趣区域
#[derive(Debug, Clone)]
pub struct InputFrame {
  pub index: usize,
  pub source: PathBuf,
  pub frame: OwnedFrame,
  pub roi: RegionOfInterest,
}

/// 解析 `x,y,w,h` 形式的归一化感兴趣区域
pub fn parse_normalized_roi(value: &str) -> Result<RegionOfInterest, FrameError> {
  let parts = value
    .split(',')
    .map(|v| v.trim().parse::<f32>())
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| FrameError::UnknownValue(format!("{}: {}", value, e)))?;
  match parts.as_slice() {
    &[x, y, width, height] => Ok(RegionOfInterest::Normalized {
      x,
      y,
      width,
      height,
    }),
    _ => Err(FrameError::UnknownValue(value.to_string())),
  }
}
