// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// tests/pipeline.rs - 端到端流水线测试
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

use std::{convert::Infallible, io::Write, path::Path, sync::Mutex};

use yolox_mobile::{
  DetectorBuilder, DetectorConfig, DetectorError, EngineError, FrameSkip, Inference,
  InferenceEngine, InputTensor, OwnedFrame, PixelFormat, Prediction, RawFrame, RegionOfInterest,
  StageTimings, TensorShape,
  engine::{HeadDecoding, YoloxDecoder},
  input::InputFrame,
  output::Render,
  task::{ContinuousTask, OneShotTask, Task},
};

/// 返回固定输出，并记录收到的输入张量
struct EchoEngine {
  output: Vec<f32>,
  last_input: Option<InputTensor>,
}

impl EchoEngine {
  fn new(output: Vec<f32>) -> Self {
    Self {
      output,
      last_input: None,
    }
  }
}

impl InferenceEngine for EchoEngine {
  fn load_model(
    &mut self,
    _model_path: &Path,
    _input_shape: TensorShape,
    _output_shape: TensorShape,
  ) -> Result<(), EngineError> {
    Ok(())
  }

  fn predict(&mut self, input: InputTensor) -> Result<Prediction, EngineError> {
    self.last_input = Some(input);
    Ok(Prediction {
      data: self.output.clone(),
      timings: StageTimings {
        preprocess_ms: 1.0,
        inference_ms: 2.0,
        postprocess_ms: 3.0,
      },
    })
  }
}

#[derive(Default)]
struct Collect {
  results: Mutex<Vec<(usize, Inference)>>,
}

impl Render<InputFrame, Inference> for Collect {
  type Error = Infallible;

  fn render_result(&self, frame: &InputFrame, result: &Inference) -> Result<(), Self::Error> {
    self
      .results
      .lock()
      .unwrap()
      .push((frame.index, result.clone()));
    Ok(())
  }
}

fn labels_file() -> tempfile::NamedTempFile {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  file.write_all(b"person\nbicycle\ncar\n").unwrap();
  file
}

#[test]
fn single_detection_end_to_end() {
  let labels = labels_file();
  let detector = DetectorBuilder::new(DetectorConfig::new("yolox_nano.onnx"))
    .labels(labels.path())
    .build(EchoEngine::new(vec![2.0, 0.9, 0.1, 0.1, 0.5, 0.5]))
    .unwrap();

  let data = vec![128u8; 416 * 416 * 4];
  let frame = RawFrame::new(&data, 416, 416, PixelFormat::Bgra8).unwrap();
  let result = detector.infer(&frame, &RegionOfInterest::Full).unwrap();

  assert_eq!(result.skipped, None);
  assert_eq!(result.detections.len(), 1);
  let det = &result.detections[0];
  assert_eq!(det.class_index, 2);
  assert_eq!(det.score, 0.9);
  assert_eq!(det.bbox, [0.1, 0.1, 0.5, 0.5]);
  assert_eq!(det.label.as_deref(), Some("car"));
  assert!(!det.inverted);
  assert_eq!(result.engine_timings.total_ms(), 6.0);

  let engine = detector.into_engine().unwrap();
  let input = engine.last_input.unwrap();
  assert_eq!(input.len(), 3 * 416 * 416);
  assert!(input.as_slice().iter().all(|&v| v == 128.0));
}

#[test]
fn unknown_class_gets_placeholder_label() {
  let labels = labels_file();
  let detector = DetectorBuilder::new(DetectorConfig::new("yolox_nano.onnx"))
    .labels(labels.path())
    .build(EchoEngine::new(vec![7.0, 0.5, 0.0, 0.0, 1.0, 1.0]))
    .unwrap();

  let data = vec![0u8; 416 * 416 * 4];
  let frame = RawFrame::new(&data, 416, 416, PixelFormat::Bgra8).unwrap();
  let result = detector.infer(&frame, &RegionOfInterest::Full).unwrap();
  assert_eq!(result.detections[0].label.as_deref(), Some("unknown"));
}

#[test]
fn wrong_pixel_format_is_skipped() {
  let detector = DetectorBuilder::new(DetectorConfig::new("yolox_nano.onnx"))
    .build(EchoEngine::new(vec![2.0, 0.9, 0.1, 0.1, 0.5, 0.5]))
    .unwrap();

  let data = vec![0u8; 416 * 416 * 3];
  let frame = RawFrame::new(&data, 416, 416, PixelFormat::Rgb8).unwrap();
  let result = detector.infer(&frame, &RegionOfInterest::Full).unwrap();
  assert_eq!(result.skipped, Some(FrameSkip::UnsupportedFormat));
  assert!(result.is_empty());
  assert!(detector.into_engine().unwrap().last_input.is_none());
}

#[test]
fn partial_record_is_a_native_failure() {
  let detector = DetectorBuilder::new(DetectorConfig::new("yolox_nano.onnx"))
    .build(EchoEngine::new(vec![2.0, 0.9, 0.1]))
    .unwrap();

  let data = vec![0u8; 416 * 416 * 4];
  let frame = RawFrame::new(&data, 416, 416, PixelFormat::Bgra8).unwrap();
  let result = detector.infer(&frame, &RegionOfInterest::Full).unwrap();
  assert_eq!(result.skipped, Some(FrameSkip::NativeCallFailure));
}

#[test]
fn missing_labels_file_fails_build() {
  let dir = tempfile::tempdir().unwrap();
  let result = DetectorBuilder::new(DetectorConfig::new("yolox_nano.onnx"))
    .labels(dir.path().join("missing.txt"))
    .build(EchoEngine::new(Vec::new()));
  assert!(matches!(result, Err(DetectorError::Labels(_))));
}

#[test]
fn raw_head_is_decoded_before_the_detector() {
  let input_shape = TensorShape::new(1, 3, 64, 64).unwrap();
  let decoder = YoloxDecoder::new(input_shape, 2);
  // 64x64 输入: 8x8 + 4x4 + 2x2 个锚点，每个锚点 5 + 2 个值
  assert_eq!(decoder.num_anchors(), 84);

  let mut raw = vec![0.0f32; decoder.expected_len()];
  // stride 8 下网格 (1, 1) 的锚点
  let start = 9 * decoder.features();
  raw[start..start + 7].copy_from_slice(&[0.5, 0.5, 2f32.ln(), 2f32.ln(), 0.9, 0.1, 1.0]);

  let mut config = DetectorConfig::new("yolox_tiny.onnx");
  config.input_shape = input_shape;
  config.output_shape = TensorShape::new(1, 84, 7, 1).unwrap();
  let detector = DetectorBuilder::new(config)
    .build(HeadDecoding::new(EchoEngine::new(raw), decoder))
    .unwrap();

  let data = vec![0u8; 32 * 32 * 4];
  let frame = RawFrame::new(&data, 32, 32, PixelFormat::Bgra8).unwrap();
  let result = detector.infer(&frame, &RegionOfInterest::Full).unwrap();

  assert_eq!(result.detections.len(), 1);
  let det = &result.detections[0];
  assert_eq!(det.class_index, 1);
  assert!((det.score - 0.9).abs() < 1e-5);
  for (actual, expected) in det.bbox.iter().zip([0.0625, 0.0625, 0.3125, 0.3125]) {
    assert!((actual - expected).abs() < 1e-5, "{:?}", det.bbox);
  }
}

#[test]
fn tasks_feed_every_frame_to_the_output() {
  let detector = DetectorBuilder::new(DetectorConfig::new("yolox_nano.onnx"))
    .build(EchoEngine::new(vec![0.0, 0.8, 0.2, 0.2, 0.4, 0.4]))
    .unwrap();
  let frames = (0..5).map(|index| InputFrame {
    index,
    source: format!("frame-{}.png", index).into(),
    frame: OwnedFrame::new(vec![0; 8 * 8 * 4], 8, 8, PixelFormat::Bgra8).unwrap(),
    roi: RegionOfInterest::Full,
  });

  let output = Collect::default();
  OneShotTask
    .run_task(frames.clone(), &detector, &output)
    .unwrap();
  assert_eq!(output.results.lock().unwrap().len(), 1);

  let output = Collect::default();
  ContinuousTask::default()
    .with_frame_number(Some(3))
    .run_task(frames, &detector, &output)
    .unwrap();
  let results = output.results.lock().unwrap();
  assert_eq!(
    results.iter().map(|(index, _)| *index).collect::<Vec<_>>(),
    vec![0, 1, 2]
  );
  assert!(results.iter().all(|(_, r)| r.detections.len() == 1));
}
