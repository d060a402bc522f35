// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, OwnedFrame, RegionOfInterest},
  input::{InputFrame, parse_normalized_roi},
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch: {0}")]
  SchemaMismatch(String),
  #[error("Invalid path: {0}")]
  PathError(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Frame error: {0}")]
  FrameError(#[from] FrameError),
}

/// 读取单个图像文件或目录下的全部图像，转为 BGRA 帧
///
/// `image:///path/to/dir?roi=0.1,0.1,0.8,0.8`
pub struct ImageFileInput {
  paths: VecDeque<PathBuf>,
  roi: RegionOfInterest,
  index: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch(url.scheme().to_string()));
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ImageFileInputError::PathError(e.to_string()))?;
    let roi = match url.query_pairs().find(|(k, _)| k == "roi") {
      Some((_, value)) => parse_normalized_roi(&value)?,
      None => RegionOfInterest::Full,
    };

    let input = Self::open(Path::new(path.as_ref()))?;
    Ok(input.with_roi(roi))
  }
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let paths = if path.is_dir() {
      let mut files = Vec::new();
      for entry in std::fs::read_dir(path)? {
        let file = entry?.path();
        if is_image(&file) {
          files.push(file);
        }
      }
      files.sort();
      files
    } else {
      vec![path.to_path_buf()]
    };

    info!("图像输入: {}, 共 {} 个文件", path.display(), paths.len());
    Ok(Self {
      paths: paths.into(),
      roi: RegionOfInterest::Full,
      index: 0,
    })
  }

  pub fn with_roi(mut self, roi: RegionOfInterest) -> Self {
    self.roi = roi;
    self
  }

  pub fn remaining(&self) -> usize {
    self.paths.len()
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn read_frame(path: &Path) -> Result<OwnedFrame, ImageFileInputError> {
  let image = ImageReader::open(path)?.decode()?.to_rgb8();
  Ok(OwnedFrame::from(&image))
}

impl Iterator for ImageFileInput {
  type Item = InputFrame;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.paths.pop_front() {
      match read_frame(&path) {
        Ok(frame) => {
          debug!("读取图像: {} ({}x{})", path.display(), frame.width(), frame.height());
          let item = InputFrame {
            index: self.index,
            source: path,
            frame,
            roi: self.roi,
          };
          self.index += 1;
          return Some(item);
        }
        Err(e) => error!("读取图像失败 {}: {}", path.display(), e),
      }
    }
    None
  }
}
