// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/frame.rs - 帧、张量形状与张量定义
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

use std::{fmt, str::FromStr};

use image::RgbImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("张量形状无效: {0}")]
  InvalidShape(String),
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
  #[error("行字节数 {bytes_per_row} 小于一行像素所需的 {required}")]
  InvalidStride { bytes_per_row: usize, required: usize },
  #[error("数据长度不足: 期望至少 {expected}, 实际 {actual}")]
  BufferTooSmall { expected: usize, actual: usize },
  #[error("张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  TensorLength { expected: usize, actual: usize },
  #[error("未知的取值: {0}")]
  UnknownValue(String),
}

/// 四维张量形状 (batch, channels, height, width)
///
/// 只能经由 `new` 或解析得到：各维度均为正，元素总数不溢出 `usize`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
  batch: usize,
  channels: usize,
  height: usize,
  width: usize,
}

impl TensorShape {
  pub fn new(
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
  ) -> Result<Self, FrameError> {
    let shape = Self {
      batch,
      channels,
      height,
      width,
    };
    if batch == 0 || channels == 0 || height == 0 || width == 0 {
      return Err(FrameError::InvalidShape(format!("维度必须为正: {}", shape)));
    }
    if shape.checked_len().is_none() {
      return Err(FrameError::InvalidShape(format!("元素总数溢出: {}", shape)));
    }
    Ok(shape)
  }

  fn checked_len(&self) -> Option<usize> {
    self
      .batch
      .checked_mul(self.channels)?
      .checked_mul(self.height)?
      .checked_mul(self.width)
  }

  pub fn batch(&self) -> usize {
    self.batch
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  /// 展平后的元素个数，构造时已保证不溢出
  pub fn len(&self) -> usize {
    self.batch * self.channels * self.height * self.width
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn dims(&self) -> [usize; 4] {
    [self.batch, self.channels, self.height, self.width]
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}x{}x{}x{}",
      self.batch, self.channels, self.height, self.width
    )
  }
}

impl FromStr for TensorShape {
  type Err = FrameError;

  /// 解析 `1x3x416x416` 形式的形状
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let dims = s
      .split(['x', 'X', ','])
      .map(|d| d.trim().parse::<usize>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| FrameError::InvalidShape(format!("{}: {}", s, e)))?;
    match dims.as_slice() {
      &[n, c, h, w] => Self::new(n, c, h, w),
      _ => Err(FrameError::InvalidShape(format!(
        "需要 4 个维度，实际为 {}: {}",
        dims.len(),
        s
      ))),
    }
  }
}

/// YOLOX-nano 在 416x416 输入下的模型输入形状
pub const YOLOX_NANO_INPUT: TensorShape = TensorShape {
  batch: 1,
  channels: 3,
  height: 416,
  width: 416,
};

/// YOLOX-nano 的检测头输出形状：3549 个锚点，每个 5 + 80 个值
pub const YOLOX_NANO_OUTPUT: TensorShape = TensorShape {
  batch: 1,
  channels: 3549,
  height: 85,
  width: 1,
};

/// 张量内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  /// 通道优先 (N, C, H, W)
  #[default]
  Nchw,
  /// 通道最后 (N, H, W, C)
  Nhwc,
}

impl FromStr for TensorLayout {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "nchw" | "channel-first" => Ok(TensorLayout::Nchw),
      "nhwc" | "channel-last" => Ok(TensorLayout::Nhwc),
      _ => Err(FrameError::UnknownValue(s.to_string())),
    }
  }
}

/// 源帧像素格式，均为 8 位交错存储
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
  #[default]
  Bgra8,
  Rgba8,
  Rgb8,
}

impl PixelFormat {
  pub fn bytes_per_pixel(&self) -> usize {
    match self {
      PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
      PixelFormat::Rgb8 => 3,
    }
  }
}

impl fmt::Display for PixelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PixelFormat::Bgra8 => "bgra",
      PixelFormat::Rgba8 => "rgba",
      PixelFormat::Rgb8 => "rgb",
    };
    f.write_str(name)
  }
}

impl FromStr for PixelFormat {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "bgra" | "bgra8" => Ok(PixelFormat::Bgra8),
      "rgba" | "rgba8" => Ok(PixelFormat::Rgba8),
      "rgb" | "rgb8" => Ok(PixelFormat::Rgb8),
      _ => Err(FrameError::UnknownValue(s.to_string())),
    }
  }
}

/// 像素坐标下的矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl Rect {
  pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }
}

/// 送入模型的感兴趣区域
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RegionOfInterest {
  /// 整帧
  #[default]
  Full,
  /// 像素坐标
  Pixels(Rect),
  /// 相对帧尺寸的归一化坐标
  Normalized {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
  },
}

impl RegionOfInterest {
  /// 将区域裁剪到帧范围内，区域为空时返回 `None`
  pub fn resolve(&self, frame_width: u32, frame_height: u32) -> Option<Rect> {
    let (x0, y0, x1, y1) = match *self {
      RegionOfInterest::Full => (0, 0, frame_width, frame_height),
      RegionOfInterest::Pixels(rect) => (
        rect.x.min(frame_width),
        rect.y.min(frame_height),
        rect.x.saturating_add(rect.width).min(frame_width),
        rect.y.saturating_add(rect.height).min(frame_height),
      ),
      RegionOfInterest::Normalized {
        x,
        y,
        width,
        height,
      } => {
        if ![x, y, width, height].iter().all(|v| v.is_finite()) {
          return None;
        }
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        (
          (x * fw).floor().clamp(0.0, fw) as u32,
          (y * fh).floor().clamp(0.0, fh) as u32,
          ((x + width) * fw).ceil().clamp(0.0, fw) as u32,
          ((y + height) * fh).ceil().clamp(0.0, fh) as u32,
        )
      }
    };

    if x1 <= x0 || y1 <= y0 {
      return None;
    }
    Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
  }
}

/// 外部持有的原始帧，只在一次调用期间借用
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
  data: &'a [u8],
  width: u32,
  height: u32,
  bytes_per_row: usize,
  format: PixelFormat,
}

impl<'a> RawFrame<'a> {
  /// 行与行之间无填充的帧
  pub fn new(
    data: &'a [u8],
    width: u32,
    height: u32,
    format: PixelFormat,
  ) -> Result<Self, FrameError> {
    Self::with_stride(
      data,
      width,
      height,
      width as usize * format.bytes_per_pixel(),
      format,
    )
  }

  /// 带行字节数的帧，相机缓冲区通常会对行做对齐
  pub fn with_stride(
    data: &'a [u8],
    width: u32,
    height: u32,
    bytes_per_row: usize,
    format: PixelFormat,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidDimensions { width, height });
    }

    let row_bytes = width as usize * format.bytes_per_pixel();
    if bytes_per_row < row_bytes {
      return Err(FrameError::InvalidStride {
        bytes_per_row,
        required: row_bytes,
      });
    }

    let expected = bytes_per_row * (height as usize - 1) + row_bytes;
    if data.len() < expected {
      return Err(FrameError::BufferTooSmall {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data,
      width,
      height,
      bytes_per_row,
      format,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  /// 第 `y` 行的像素字节，不含行尾填充
  pub fn row(&self, y: u32) -> &'a [u8] {
    let start = y as usize * self.bytes_per_row;
    let len = self.width as usize * self.format.bytes_per_pixel();
    &self.data[start..start + len]
  }
}

/// 进程内持有的帧，输入源产出此类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
  data: Vec<u8>,
  width: u32,
  height: u32,
  format: PixelFormat,
}

impl OwnedFrame {
  pub fn new(
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
  ) -> Result<Self, FrameError> {
    RawFrame::new(&data, width, height, format)?;
    Ok(Self {
      data,
      width,
      height,
      format,
    })
  }

  pub fn as_raw(&self) -> RawFrame<'_> {
    RawFrame {
      data: &self.data,
      width: self.width,
      height: self.height,
      bytes_per_row: self.width as usize * self.format.bytes_per_pixel(),
      format: self.format,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  /// 转回 RGB 图像，用于落盘
  pub fn to_rgb_image(&self) -> RgbImage {
    let bpp = self.format.bytes_per_pixel();
    let mut image = RgbImage::new(self.width, self.height);
    for (pixel, src) in image.pixels_mut().zip(self.data.chunks_exact(bpp)) {
      pixel.0 = match self.format {
        PixelFormat::Bgra8 => [src[2], src[1], src[0]],
        PixelFormat::Rgba8 | PixelFormat::Rgb8 => [src[0], src[1], src[2]],
      };
    }
    image
  }
}

impl From<&RgbImage> for OwnedFrame {
  /// 转为相机常见的 BGRA 排列，alpha 填充为 255
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for pixel in image.pixels() {
      let [r, g, b] = pixel.0;
      data.extend_from_slice(&[b, g, r, 255]);
    }
    Self {
      data,
      width,
      height,
      format: PixelFormat::Bgra8,
    }
  }
}

/// 模型输入张量，由预处理器创建并按值交给推理引擎
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  shape: TensorShape,
  layout: TensorLayout,
  data: Vec<f32>,
}

impl InputTensor {
  pub fn new(
    shape: TensorShape,
    layout: TensorLayout,
    data: Vec<f32>,
  ) -> Result<Self, FrameError> {
    if data.len() != shape.len() {
      return Err(FrameError::TensorLength {
        expected: shape.len(),
        actual: data.len(),
      });
    }
    Ok(Self {
      shape,
      layout,
      data,
    })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn into_vec(self) -> Vec<f32> {
    self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shape_parse_and_len() {
    let shape: TensorShape = "1x3x416x416".parse().unwrap();
    assert_eq!(shape.dims(), [1, 3, 416, 416]);
    assert_eq!(shape.len(), 3 * 416 * 416);
    assert_eq!(shape.to_string(), "1x3x416x416");
    assert!("1x3x416".parse::<TensorShape>().is_err());
    assert!("1x0x416x416".parse::<TensorShape>().is_err());
  }

  #[test]
  fn shape_rejects_overflowing_product() {
    assert!(matches!(
      "1x3x4294967296x4294967296".parse::<TensorShape>(),
      Err(FrameError::InvalidShape(_))
    ));
    assert!(TensorShape::new(usize::MAX, 2, 1, 1).is_err());
    let shape = TensorShape::new(1, 3, 416, 416).unwrap();
    assert_eq!(
      (shape.batch(), shape.channels(), shape.height(), shape.width()),
      (1, 3, 416, 416)
    );
  }

  #[test]
  fn rgb_image_survives_bgra_conversion() {
    let image = RgbImage::from_fn(3, 2, |x, y| image::Rgb([x as u8, y as u8, 200]));
    let frame = OwnedFrame::from(&image);
    assert_eq!(frame.format(), PixelFormat::Bgra8);
    assert_eq!(frame.to_rgb_image(), image);
  }

  #[test]
  fn roi_is_clamped_to_frame() {
    let roi = RegionOfInterest::Pixels(Rect::new(10, 20, 1000, 1000));
    assert_eq!(roi.resolve(100, 50), Some(Rect::new(10, 20, 90, 30)));

    let outside = RegionOfInterest::Pixels(Rect::new(200, 0, 10, 10));
    assert_eq!(outside.resolve(100, 50), None);
  }

  #[test]
  fn normalized_roi() {
    let roi = RegionOfInterest::Normalized {
      x: 0.25,
      y: 0.5,
      width: 0.5,
      height: 0.5,
    };
    assert_eq!(roi.resolve(400, 200), Some(Rect::new(100, 100, 200, 100)));

    let nan = RegionOfInterest::Normalized {
      x: f32::NAN,
      y: 0.0,
      width: 1.0,
      height: 1.0,
    };
    assert_eq!(nan.resolve(400, 200), None);
  }

  #[test]
  fn raw_frame_validates_stride_and_length() {
    let data = vec![0u8; 4 * 4 * 2];
    assert!(RawFrame::new(&data, 4, 2, PixelFormat::Bgra8).is_ok());
    assert!(matches!(
      RawFrame::new(&data, 4, 3, PixelFormat::Bgra8),
      Err(FrameError::BufferTooSmall { .. })
    ));
    assert!(matches!(
      RawFrame::with_stride(&data, 4, 2, 8, PixelFormat::Bgra8),
      Err(FrameError::InvalidStride { .. })
    ));
  }

  #[test]
  fn rgb_image_to_bgra_frame() {
    let image = RgbImage::from_raw(1, 1, vec![10, 20, 30]).unwrap();
    let frame = OwnedFrame::from(&image);
    assert_eq!(frame.format(), PixelFormat::Bgra8);
    assert_eq!(frame.as_raw().row(0), &[30, 20, 10, 255]);
  }
}
