// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/preprocess.rs - 帧预处理：裁剪、缩放、去除 alpha、通道重排
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

use image::{
  ImageBuffer, Rgb, Rgba,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;

use crate::frame::{
  FrameError, InputTensor, PixelFormat, RGB_CHANNELS, RawFrame, Rect, RegionOfInterest,
  TensorLayout, TensorShape,
};

const RESIZE_FILTER: FilterType = FilterType::Triangle;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("不支持的像素格式: 期望 {expected}, 实际 {actual}")]
  UnsupportedFormat {
    expected: PixelFormat,
    actual: PixelFormat,
  },
  #[error("感兴趣区域与帧没有交集")]
  EmptyRegion,
  #[error("模型输入需要 3 个 RGB 通道, 实际为 {0}")]
  ChannelMismatch(usize),
  #[error("预处理只支持 batch = 1, 实际为 {0}")]
  BatchSize(usize),
  #[error("重排数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  LayoutLength { expected: usize, actual: usize },
  #[error("模型输入尺寸超出 32 位范围: {0}")]
  DimensionOverflow(TensorShape),
  #[error("裁剪缓冲区无效")]
  CropBuffer,
  #[error("张量错误: {0}")]
  Tensor(#[from] FrameError),
}

/// 将一帧原始图像转换为模型输入张量
///
/// 流程：校验像素格式 → 按感兴趣区域裁剪 → 双线性缩放到模型输入尺寸 →
/// 丢弃 alpha 得到 RGB 浮点数（保持 0~255 原始量程）→ 按布局重排。
#[derive(Debug, Clone)]
pub struct Preprocessor {
  shape: TensorShape,
  // 缩放目标尺寸
  width: u32,
  height: u32,
  layout: TensorLayout,
  format: PixelFormat,
}

impl Preprocessor {
  pub fn new(
    shape: TensorShape,
    layout: TensorLayout,
    format: PixelFormat,
  ) -> Result<Self, PreprocessError> {
    if shape.channels() != RGB_CHANNELS {
      return Err(PreprocessError::ChannelMismatch(shape.channels()));
    }
    if shape.batch() != 1 {
      return Err(PreprocessError::BatchSize(shape.batch()));
    }
    let width =
      u32::try_from(shape.width()).map_err(|_| PreprocessError::DimensionOverflow(shape))?;
    let height =
      u32::try_from(shape.height()).map_err(|_| PreprocessError::DimensionOverflow(shape))?;
    Ok(Self {
      shape,
      width,
      height,
      layout,
      format,
    })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn process(
    &self,
    frame: &RawFrame<'_>,
    roi: &RegionOfInterest,
  ) -> Result<InputTensor, PreprocessError> {
    if frame.format() != self.format {
      return Err(PreprocessError::UnsupportedFormat {
        expected: self.format,
        actual: frame.format(),
      });
    }

    let rect = roi
      .resolve(frame.width(), frame.height())
      .ok_or(PreprocessError::EmptyRegion)?;
    debug!(
      "裁剪区域: ({}, {}) {}x{}",
      rect.x, rect.y, rect.width, rect.height
    );

    let cropped = crop(frame, rect);
    let resized = self.resize(cropped, rect)?;
    let rgb = self.drop_alpha(&resized);

    let data = match self.layout {
      TensorLayout::Nhwc => rgb,
      TensorLayout::Nchw => to_channel_first(&rgb, self.shape)?,
    };

    Ok(InputTensor::new(self.shape, self.layout, data)?)
  }

  fn resize(&self, cropped: Vec<u8>, rect: Rect) -> Result<Vec<u8>, PreprocessError> {
    let (width, height) = (self.width, self.height);
    if rect.width == width && rect.height == height {
      return Ok(cropped);
    }

    let resized = match self.format.bytes_per_pixel() {
      4 => {
        let image = ImageBuffer::<Rgba<u8>, _>::from_raw(rect.width, rect.height, cropped)
          .ok_or(PreprocessError::CropBuffer)?;
        imageops::resize(&image, width, height, RESIZE_FILTER).into_raw()
      }
      _ => {
        let image = ImageBuffer::<Rgb<u8>, _>::from_raw(rect.width, rect.height, cropped)
          .ok_or(PreprocessError::CropBuffer)?;
        imageops::resize(&image, width, height, RESIZE_FILTER).into_raw()
      }
    };
    Ok(resized)
  }

  /// 交错像素 → HWC 排列的 RGB 浮点数
  fn drop_alpha(&self, pixels: &[u8]) -> Vec<f32> {
    let [r, g, b] = match self.format {
      PixelFormat::Bgra8 => [2, 1, 0],
      PixelFormat::Rgba8 | PixelFormat::Rgb8 => [0, 1, 2],
    };
    pixels
      .chunks_exact(self.format.bytes_per_pixel())
      .flat_map(|px| [px[r] as f32, px[g] as f32, px[b] as f32])
      .collect()
  }
}

fn crop(frame: &RawFrame<'_>, rect: Rect) -> Vec<u8> {
  let bpp = frame.format().bytes_per_pixel();
  let start = rect.x as usize * bpp;
  let end = start + rect.width as usize * bpp;
  let mut out = Vec::with_capacity(rect.width as usize * rect.height as usize * bpp);
  for y in rect.y..rect.y + rect.height {
    out.extend_from_slice(&frame.row(y)[start..end]);
  }
  out
}

/// NHWC → NCHW：`output[b, c, h, w] = input[b, h, w, c]`
pub fn to_channel_first<T: Copy + Default>(
  input: &[T],
  shape: TensorShape,
) -> Result<Vec<T>, PreprocessError> {
  permute(input, shape, true)
}

/// NCHW → NHWC，`to_channel_first` 的逆变换
pub fn to_channel_last<T: Copy + Default>(
  input: &[T],
  shape: TensorShape,
) -> Result<Vec<T>, PreprocessError> {
  permute(input, shape, false)
}

fn permute<T: Copy + Default>(
  input: &[T],
  shape: TensorShape,
  channel_first: bool,
) -> Result<Vec<T>, PreprocessError> {
  if input.len() != shape.len() {
    return Err(PreprocessError::LayoutLength {
      expected: shape.len(),
      actual: input.len(),
    });
  }

  let [batch, channels, height, width] = shape.dims();
  let plane = height * width;
  let per_batch = channels * plane;
  let mut output = vec![T::default(); input.len()];

  for b in 0..batch {
    for h in 0..height {
      for w in 0..width {
        for c in 0..channels {
          let nchw = b * per_batch + c * plane + h * width + w;
          let nhwc = b * per_batch + h * width * channels + w * channels + c;
          if channel_first {
            output[nchw] = input[nhwc];
          } else {
            output[nhwc] = input[nchw];
          }
        }
      }
    }
  }
  Ok(output)
}
