// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/engine/yolox.rs - YOLOX 检测头解码与非极大值抑制
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

use std::{path::Path, time::Instant};

use tracing::{debug, warn};

use crate::{
  decode::DECODE_STRIDE,
  engine::{EngineError, InferenceEngine, Prediction},
  frame::{InputTensor, TensorShape},
};

pub const YOLOX_STRIDES: [usize; 3] = [8, 16, 32];
// cx, cy, w, h, objectness
const YOLOX_BOX_FIELDS: usize = 5;
const YOLOX_SCORE_THRESH: f32 = 0.3;
const YOLOX_NMS_THRESH: f32 = 0.45;
const YOLOX_MAX_DETECTIONS: usize = 100;

#[derive(Debug, Clone, Copy)]
struct Anchor {
  grid_x: f32,
  grid_y: f32,
  stride: f32,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
  class_id: usize,
  score: f32,
  bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
}

/// 将 YOLOX 原始检测头输出 `[1, A, 5 + K]` 解码为 6 元组记录
/// `[class, score, x1, y1, x2, y2]`，坐标按模型输入尺寸归一化
#[derive(Debug, Clone)]
pub struct YoloxDecoder {
  input_width: f32,
  input_height: f32,
  num_classes: usize,
  score_threshold: f32,
  nms_threshold: f32,
  max_detections: usize,
  anchors: Box<[Anchor]>,
}

impl YoloxDecoder {
  pub fn new(input_shape: TensorShape, num_classes: usize) -> Self {
    let mut anchors = Vec::new();
    for stride in YOLOX_STRIDES {
      let grid_h = input_shape.height() / stride;
      let grid_w = input_shape.width() / stride;
      for y in 0..grid_h {
        for x in 0..grid_w {
          anchors.push(Anchor {
            grid_x: x as f32,
            grid_y: y as f32,
            stride: stride as f32,
          });
        }
      }
    }

    Self {
      input_width: input_shape.width() as f32,
      input_height: input_shape.height() as f32,
      num_classes,
      score_threshold: YOLOX_SCORE_THRESH,
      nms_threshold: YOLOX_NMS_THRESH,
      max_detections: YOLOX_MAX_DETECTIONS,
      anchors: anchors.into_boxed_slice(),
    }
  }

  pub fn with_score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn with_max_detections(mut self, max: usize) -> Self {
    self.max_detections = max;
    self
  }

  pub fn num_anchors(&self) -> usize {
    self.anchors.len()
  }

  /// 每个锚点的输出长度
  pub fn features(&self) -> usize {
    YOLOX_BOX_FIELDS + self.num_classes
  }

  pub fn expected_len(&self) -> usize {
    self.num_anchors() * self.features()
  }

  pub fn decode(&self, raw: &[f32]) -> Result<Vec<f32>, EngineError> {
    if raw.len() != self.expected_len() {
      return Err(EngineError::Backend(format!(
        "检测头输出长度不匹配: 期望 {}, 实际 {}",
        self.expected_len(),
        raw.len()
      )));
    }

    let mut candidates = Vec::new();
    for (row, anchor) in raw.chunks_exact(self.features()).zip(self.anchors.iter()) {
      let objectness = row[4];
      let (class_id, class_score) = row[YOLOX_BOX_FIELDS..].iter().enumerate().fold(
        (0usize, f32::NEG_INFINITY),
        |(best_idx, best), (idx, &score)| {
          if score > best {
            (idx, score)
          } else {
            (best_idx, best)
          }
        },
      );

      let score = objectness * class_score;
      if !score.is_finite() || score < self.score_threshold {
        continue;
      }

      let cx = (row[0] + anchor.grid_x) * anchor.stride;
      let cy = (row[1] + anchor.grid_y) * anchor.stride;
      let w = row[2].exp() * anchor.stride;
      let h = row[3].exp() * anchor.stride;
      if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
        continue;
      }

      candidates.push(Candidate {
        class_id,
        score,
        bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
      });
    }

    debug!("候选框数量: {}", candidates.len());
    let kept = nms(candidates, self.nms_threshold, self.max_detections);
    debug!("NMS 后保留: {}", kept.len());

    let mut records = Vec::with_capacity(kept.len() * DECODE_STRIDE);
    for item in kept {
      records.extend_from_slice(&[
        item.class_id as f32,
        item.score,
        (item.bbox[0] / self.input_width).clamp(0.0, 1.0),
        (item.bbox[1] / self.input_height).clamp(0.0, 1.0),
        (item.bbox[2] / self.input_width).clamp(0.0, 1.0),
        (item.bbox[3] / self.input_height).clamp(0.0, 1.0),
      ]);
    }
    Ok(records)
  }
}

/// 按类别的非极大值抑制，候选框按置信度降序处理
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, limit: usize) -> Vec<Candidate> {
  candidates.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    if kept.len() >= limit {
      warn!("检测数量达到上限 {}, 其余候选框被丢弃", limit);
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) >= iou_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// 为返回原始检测头的引擎补上后处理阶段
pub struct HeadDecoding<E> {
  inner: E,
  decoder: YoloxDecoder,
}

impl<E> HeadDecoding<E> {
  pub fn new(inner: E, decoder: YoloxDecoder) -> Self {
    Self { inner, decoder }
  }

  pub fn into_inner(self) -> E {
    self.inner
  }
}

impl<E: InferenceEngine> InferenceEngine for HeadDecoding<E> {
  fn load_model(
    &mut self,
    model_path: &Path,
    input_shape: TensorShape,
    output_shape: TensorShape,
  ) -> Result<(), EngineError> {
    if output_shape.len() != self.decoder.expected_len() {
      return Err(EngineError::OutputShape {
        expected: self.decoder.expected_len(),
        actual: output_shape.len(),
      });
    }
    self.inner.load_model(model_path, input_shape, output_shape)
  }

  fn predict(&mut self, input: InputTensor) -> Result<Prediction, EngineError> {
    let mut prediction = self.inner.predict(input)?;
    let now = Instant::now();
    prediction.data = self.decoder.decode(&prediction.data)?;
    prediction.timings.postprocess_ms += now.elapsed().as_secs_f32() * 1000.0;
    Ok(prediction)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const NUM_CLASSES: usize = 2;

  fn decoder() -> YoloxDecoder {
    YoloxDecoder::new(TensorShape::new(1, 3, 64, 64).unwrap(), NUM_CLASSES)
  }

  fn set_anchor(raw: &mut [f32], index: usize, values: [f32; 7]) {
    let start = index * (YOLOX_BOX_FIELDS + NUM_CLASSES);
    raw[start..start + 7].copy_from_slice(&values);
  }

  fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
      assert!((a - e).abs() < 1e-5, "{:?} != {:?}", actual, expected);
    }
  }

  #[test]
  fn anchor_count_for_416_input() {
    let decoder = YoloxDecoder::new(TensorShape::new(1, 3, 416, 416).unwrap(), 80);
    assert_eq!(decoder.num_anchors(), 3549);
    assert_eq!(decoder.expected_len(), 3549 * 85);
  }

  #[test]
  fn decodes_grid_offsets_and_scales() {
    let decoder = decoder();
    assert_eq!(decoder.num_anchors(), 64 + 16 + 4);
    let mut raw = vec![0.0; decoder.expected_len()];
    // stride 8 网格上的 (2, 3)
    set_anchor(
      &mut raw,
      3 * 8 + 2,
      [0.5, 0.5, 2f32.ln(), 2f32.ln(), 0.9, 0.1, 0.8],
    );

    let records = decoder.decode(&raw).unwrap();
    assert_close(&records, &[1.0, 0.72, 0.1875, 0.3125, 0.4375, 0.5625]);
  }

  #[test]
  fn nms_suppresses_same_class_only() {
    let decoder = decoder();
    let mut raw = vec![0.0; decoder.expected_len()];
    set_anchor(&mut raw, 10, [0.0, 0.0, 1.0, 1.0, 1.0, 0.9, 0.0]);
    set_anchor(&mut raw, 11, [-1.0, 0.0, 1.0, 1.0, 1.0, 0.7, 0.0]);
    set_anchor(&mut raw, 12, [0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.6]);

    let records = decoder.decode(&raw).unwrap();
    let classes: Vec<f32> = records.chunks(DECODE_STRIDE).map(|r| r[0]).collect();
    let scores: Vec<f32> = records.chunks(DECODE_STRIDE).map(|r| r[1]).collect();
    assert_eq!(classes, vec![0.0, 1.0]);
    assert_close(&scores, &[0.9, 0.6]);
  }

  #[test]
  fn max_detections_caps_output() {
    let decoder = decoder().with_max_detections(1).with_score_threshold(0.1);
    let mut raw = vec![0.0; decoder.expected_len()];
    set_anchor(&mut raw, 0, [0.0, 0.0, 0.0, 0.0, 1.0, 0.5, 0.0]);
    set_anchor(&mut raw, 40, [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.4]);

    let records = decoder.decode(&raw).unwrap();
    assert_eq!(records.len(), DECODE_STRIDE);
  }

  #[test]
  fn rejects_wrong_length() {
    assert!(matches!(
      decoder().decode(&[0.0; 5]),
      Err(EngineError::Backend(_))
    ));
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = [0.0, 0.0, 2.0, 2.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[3.0, 3.0, 4.0, 4.0]), 0.0);
  }
}
