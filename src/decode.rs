// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/decode.rs - 检测结果解码
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

use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::{FrameError, Rect, TensorShape},
  label::{NoLabels, ResolveLabel},
};

/// 每条检测记录的浮点数个数: class, score, x1, y1, x2, y2
pub const DECODE_STRIDE: usize = 6;

/// 负数或非有限的类别值解码后的索引，超出任何标签表范围
pub const INVALID_CLASS: u32 = u32::MAX;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输出长度 {len} 不是 6 的整数倍")]
  PartialRecord { len: usize },
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_index: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
  /// 不带标签表时为 `None`
  pub label: Option<String>,
  /// x_min > x_max 或 y_min > y_max
  pub inverted: bool,
}

impl Detection {
  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// 换算到给定尺寸的像素坐标
  pub fn to_pixels(&self, width: u32, height: u32) -> [f32; 4] {
    let (w, h) = (width as f32, height as f32);
    [
      self.bbox[0] * w,
      self.bbox[1] * h,
      self.bbox[2] * w,
      self.bbox[3] * h,
    ]
  }

  /// 换算到源帧像素坐标，`region` 为送入模型的裁剪区域
  pub fn to_region(&self, region: Rect) -> [f32; 4] {
    let [x1, y1, x2, y2] = self.to_pixels(region.width, region.height);
    let (ox, oy) = (region.x as f32, region.y as f32);
    [x1 + ox, y1 + oy, x2 + ox, y2 + oy]
  }
}

/// 引擎输出中边界框的坐标单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxUnits {
  /// 已归一化到 [0, 1]
  #[default]
  Normalized,
  /// 模型输入尺寸下的像素坐标
  Pixels,
}

impl FromStr for BoxUnits {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "normalized" => Ok(BoxUnits::Normalized),
      "pixels" => Ok(BoxUnits::Pixels),
      _ => Err(FrameError::UnknownValue(s.to_string())),
    }
  }
}

/// 检查输出长度是否为整数条记录，返回记录条数
pub fn check_stride(len: usize) -> Result<usize, DecodeError> {
  if len % DECODE_STRIDE != 0 {
    return Err(DecodeError::PartialRecord { len });
  }
  Ok(len / DECODE_STRIDE)
}

/// 不解析标签、坐标已归一化的解码
pub fn decode(buffer: &[f32]) -> Vec<Detection> {
  Decoder::new(NoLabels, BoxUnits::Normalized, None).decode(buffer)
}

/// 检测结果解码器
///
/// 缓冲区按 6 个浮点数一组切分，末尾不足一组的部分被丢弃。
#[derive(Debug, Clone)]
pub struct Decoder<R> {
  labels: R,
  units: BoxUnits,
  scale: [f32; 2],
}

impl<R: ResolveLabel> Decoder<R> {
  /// `input_shape` 仅在 `BoxUnits::Pixels` 时用于归一化
  pub fn new(labels: R, units: BoxUnits, input_shape: Option<TensorShape>) -> Self {
    let scale = match (units, input_shape) {
      (BoxUnits::Pixels, Some(shape)) => [shape.width() as f32, shape.height() as f32],
      (BoxUnits::Pixels, None) => {
        warn!("像素坐标缺少模型输入尺寸，按归一化坐标处理");
        [1.0, 1.0]
      }
      (BoxUnits::Normalized, _) => [1.0, 1.0],
    };
    Self {
      labels,
      units,
      scale,
    }
  }

  pub fn labels(&self) -> &R {
    &self.labels
  }

  pub fn units(&self) -> BoxUnits {
    self.units
  }

  pub fn decode(&self, buffer: &[f32]) -> Vec<Detection> {
    let remainder = buffer.len() % DECODE_STRIDE;
    if remainder != 0 {
      warn!("输出末尾有 {} 个多余元素，已丢弃", remainder);
    }

    let detections: Vec<Detection> = buffer
      .chunks_exact(DECODE_STRIDE)
      .map(|record| self.decode_record(record))
      .collect();
    debug!("解码得到 {} 个检测结果", detections.len());
    detections
  }

  fn decode_record(&self, record: &[f32]) -> Detection {
    let raw_class = record[0];
    let class_index = if raw_class.is_finite() && raw_class >= 0.0 {
      // 截断取整，过大的值饱和为 u32::MAX
      raw_class as u32
    } else {
      warn!("无效的类别索引 {}, 使用占位标签", raw_class);
      INVALID_CLASS
    };

    let [sx, sy] = self.scale;
    let bbox = [
      record[2] / sx,
      record[3] / sy,
      record[4] / sx,
      record[5] / sy,
    ];
    let inverted = bbox[0] > bbox[2] || bbox[1] > bbox[3];
    if inverted {
      warn!("检测框坐标颠倒: {:?}", bbox);
    }

    Detection {
      class_index,
      score: record[1],
      bbox,
      label: self.labels.label_for(class_index),
      inverted,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::{LabelTable, UNKNOWN_LABEL};
  use proptest::prelude::*;

  #[test]
  fn zero_buffer_gives_degenerate_records() {
    let detections = decode(&[0.0; 12]);
    assert_eq!(detections.len(), 2);
    for det in detections {
      assert_eq!(det.class_index, 0);
      assert_eq!(det.score, 0.0);
      assert_eq!(det.area(), 0.0);
      assert!(!det.inverted);
      assert_eq!(det.label, None);
    }
  }

  #[test]
  fn truncates_class_and_resolves_label() {
    let labels: LabelTable = ["person", "bicycle", "car"].into_iter().collect();
    let decoder = Decoder::new(labels, BoxUnits::Normalized, None);

    let detections = decoder.decode(&[2.7, 0.9, 0.1, 0.1, 0.5, 0.5]);
    assert_eq!(detections[0].class_index, 2);
    assert_eq!(detections[0].label.as_deref(), Some("car"));
  }

  #[test]
  fn unknown_class_gets_placeholder() {
    let labels: LabelTable = ["person"].into_iter().collect();
    let decoder = Decoder::new(labels, BoxUnits::Normalized, None);

    let detections = decoder.decode(&[5.0, 0.5, 0.0, 0.0, 1.0, 1.0]);
    assert_eq!(detections[0].label.as_deref(), Some(UNKNOWN_LABEL));
  }

  #[test]
  fn negative_or_nan_class_gets_placeholder() {
    let labels: LabelTable = ["person", "bicycle"].into_iter().collect();
    let decoder = Decoder::new(labels, BoxUnits::Normalized, None);

    let detections = decoder.decode(&[
      -3.0, 0.9, 0.0, 0.0, 1.0, 1.0, //
      f32::NAN, 0.9, 0.0, 0.0, 1.0, 1.0, //
      f32::NEG_INFINITY, 0.9, 0.0, 0.0, 1.0, 1.0,
    ]);
    assert_eq!(detections.len(), 3);
    for det in &detections {
      assert_eq!(det.class_index, INVALID_CLASS);
      assert_eq!(det.label.as_deref(), Some(UNKNOWN_LABEL));
    }

    let unlabeled = decode(&[-3.0, 0.5, 0.0, 0.0, 1.0, 1.0]);
    assert_eq!(unlabeled[0].class_index, INVALID_CLASS);
    assert_eq!(unlabeled[0].label, None);
  }

  #[test]
  fn inverted_boxes_are_flagged() {
    let detections = decode(&[1.0, 0.5, 0.6, 0.1, 0.2, 0.5]);
    assert!(detections[0].inverted);
  }

  #[test]
  fn pixel_boxes_are_normalized_by_input_size() {
    let shape = TensorShape::new(1, 3, 200, 400).unwrap();
    let decoder = Decoder::new(NoLabels, BoxUnits::Pixels, Some(shape));

    let detections = decoder.decode(&[0.0, 1.0, 40.0, 20.0, 200.0, 100.0]);
    assert_eq!(detections[0].bbox, [0.1, 0.1, 0.5, 0.5]);
    assert_eq!(detections[0].to_pixels(400, 200), [40.0, 20.0, 200.0, 100.0]);
  }

  #[test]
  fn stride_check() {
    assert_eq!(check_stride(12), Ok(2));
    assert_eq!(check_stride(0), Ok(0));
    assert_eq!(check_stride(7), Err(DecodeError::PartialRecord { len: 7 }));
  }

  proptest! {
    #[test]
    fn record_count_is_floor_of_len(buffer in proptest::collection::vec(-1.0f32..1.0, 0..64)) {
      let detections = decode(&buffer);
      prop_assert_eq!(detections.len(), buffer.len() / DECODE_STRIDE);
      for (det, record) in detections.iter().zip(buffer.chunks_exact(DECODE_STRIDE)) {
        prop_assert_eq!(det.score, record[1]);
        prop_assert_eq!(det.bbox, [record[2], record[3], record[4], record[5]]);
      }
    }
  }
}
