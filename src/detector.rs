// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/detector.rs - 检测流水线：预处理 → 推理引擎 → 解码
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
  path::PathBuf,
  sync::{Mutex, TryLockError},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::{BoxUnits, Decoder, Detection, check_stride},
  engine::{EngineError, HeadDecoding, InferenceEngine, StageTimings, YoloxDecoder},
  frame::{
    FrameError, PixelFormat, RawFrame, RegionOfInterest, TensorLayout, TensorShape,
    YOLOX_NANO_INPUT, YOLOX_NANO_OUTPUT,
  },
  label::{LabelError, LabelTable, NoLabels, ResolveLabel},
  preprocess::{PreprocessError, Preprocessor},
};


#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型加载失败: {0}")]
  ModelLoad(#[source] EngineError),
  #[error("模型尚未加载")]
  NotLoaded,
  #[error("模型已加载，不支持重新加载")]
  AlreadyLoaded,
  #[error("标签表错误: {0}")]
  Labels(#[from] LabelError),
  #[error("预处理配置错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("配置错误: {0}")]
  Config(String),
  #[error("推理引擎锁已损坏")]
  Poisoned,
}

impl From<FrameError> for DetectorError {
  fn from(err: FrameError) -> Self {
    DetectorError::Config(err.to_string())
  }
}

/// 跳过某一帧的原因，此时检测结果为空、耗时为零
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSkip {
  /// 上一帧仍在推理
  Busy,
  UnsupportedFormat,
  EmptyPreprocess,
  /// 引擎调用失败或返回的缓冲区长度不合法
  NativeCallFailure,
}

/// 单帧推理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inference {
  pub detections: Vec<Detection>,
  /// 本进程测得的各阶段耗时
  pub timings: StageTimings,
  /// 引擎上报的各阶段耗时
  pub engine_timings: StageTimings,
  pub skipped: Option<FrameSkip>,
}

impl Inference {
  fn skipped(reason: FrameSkip) -> Self {
    Self {
      skipped: Some(reason),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub model_path: PathBuf,
  pub input_shape: TensorShape,
  pub output_shape: TensorShape,
  pub layout: TensorLayout,
  pub pixel_format: PixelFormat,
  pub labels_path: Option<PathBuf>,
  pub box_units: BoxUnits,
}

impl DetectorConfig {
  /// YOLOX-nano 的默认配置
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      input_shape: YOLOX_NANO_INPUT,
      output_shape: YOLOX_NANO_OUTPUT,
      layout: TensorLayout::Nchw,
      pixel_format: PixelFormat::Bgra8,
      labels_path: None,
      box_units: BoxUnits::Normalized,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
  Unloaded,
  Loaded,
}

/// 检测流水线
///
/// 构造后处于 `Unloaded` 状态，`load` 成功后进入 `Loaded` 且不再变化。
/// 引擎放在互斥锁中，同一时刻最多一帧在推理，后到的帧直接丢弃。
pub struct Detector<E, R = NoLabels> {
  config: DetectorConfig,
  preprocessor: Preprocessor,
  decoder: Decoder<R>,
  engine: Mutex<E>,
  state: DetectorState,
}

impl<E: InferenceEngine, R: ResolveLabel> Detector<E, R> {
  pub fn new(config: DetectorConfig, engine: E, labels: R) -> Result<Self, DetectorError> {
    let preprocessor = Preprocessor::new(config.input_shape, config.layout, config.pixel_format)?;
    let decoder = Decoder::new(labels, config.box_units, Some(config.input_shape));
    Ok(Self {
      config,
      preprocessor,
      decoder,
      engine: Mutex::new(engine),
      state: DetectorState::Unloaded,
    })
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn state(&self) -> DetectorState {
    self.state
  }

  pub fn labels(&self) -> &R {
    self.decoder.labels()
  }

  pub fn load(&mut self) -> Result<(), DetectorError> {
    if self.state == DetectorState::Loaded {
      return Err(DetectorError::AlreadyLoaded);
    }

    info!(
      "加载模型: {}, 输入形状 {}, 输出形状 {}",
      self.config.model_path.display(),
      self.config.input_shape,
      self.config.output_shape
    );
    let engine = self.engine.get_mut().map_err(|_| DetectorError::Poisoned)?;
    engine
      .load_model(
        &self.config.model_path,
        self.config.input_shape,
        self.config.output_shape,
      )
      .map_err(|e| {
        error!("模型加载失败: {}", e);
        DetectorError::ModelLoad(e)
      })?;

    self.state = DetectorState::Loaded;
    info!("模型加载完成");
    Ok(())
  }

  /// 对一帧执行检测
  ///
  /// 单帧内的可恢复错误不会返回 `Err`，而是得到空结果并在 `skipped` 中注明原因。
  pub fn infer(
    &self,
    frame: &RawFrame<'_>,
    roi: &RegionOfInterest,
  ) -> Result<Inference, DetectorError> {
    if self.state != DetectorState::Loaded {
      return Err(DetectorError::NotLoaded);
    }

    let mut engine = match self.engine.try_lock() {
      Ok(engine) => engine,
      Err(TryLockError::WouldBlock) => {
        debug!("上一帧仍在推理，丢弃当前帧");
        return Ok(Inference::skipped(FrameSkip::Busy));
      }
      Err(TryLockError::Poisoned(_)) => return Err(DetectorError::Poisoned),
    };

    let now = Instant::now();
    let tensor = match self.preprocessor.process(frame, roi) {
      Ok(tensor) => tensor,
      Err(e @ PreprocessError::UnsupportedFormat { .. }) => {
        warn!("跳过当前帧: {}", e);
        return Ok(Inference::skipped(FrameSkip::UnsupportedFormat));
      }
      Err(e) => {
        warn!("预处理无结果，跳过当前帧: {}", e);
        return Ok(Inference::skipped(FrameSkip::EmptyPreprocess));
      }
    };
    let preprocess = now.elapsed();

    let now = Instant::now();
    let prediction = match engine.predict(tensor) {
      Ok(prediction) => prediction,
      Err(e) => {
        warn!("推理引擎调用失败: {}", e);
        return Ok(Inference::skipped(FrameSkip::NativeCallFailure));
      }
    };
    drop(engine);
    let inference = now.elapsed();

    if let Err(e) = check_stride(prediction.data.len()) {
      warn!("引擎输出格式错误: {}", e);
      return Ok(Inference::skipped(FrameSkip::NativeCallFailure));
    }

    let now = Instant::now();
    let detections = self.decoder.decode(&prediction.data);
    let postprocess = now.elapsed();

    let timings = StageTimings {
      preprocess_ms: millis(preprocess),
      inference_ms: millis(inference),
      postprocess_ms: millis(postprocess),
    };
    debug!(
      "预处理 {:.2} ms, 推理 {:.2} ms, 后处理 {:.2} ms",
      timings.preprocess_ms, timings.inference_ms, timings.postprocess_ms
    );

    Ok(Inference {
      detections,
      timings,
      engine_timings: prediction.timings,
      skipped: None,
    })
  }

  pub fn into_engine(self) -> Result<E, DetectorError> {
    self.engine.into_inner().map_err(|_| DetectorError::Poisoned)
  }
}

fn millis(duration: Duration) -> f32 {
  duration.as_secs_f32() * 1000.0
}

/// 从 URL 构建检测器
///
/// `yolox:///path/model.onnx?input=1x3x416x416&output=1x3549x85x1&layout=nchw&format=bgra&labels=/path/coco.txt&boxes=normalized`
#[derive(Debug, Clone)]
pub struct DetectorBuilder {
  config: DetectorConfig,
}

impl FromUrlWithScheme for DetectorBuilder {
  const SCHEME: &'static str = "yolox";
}

impl FromUrl for DetectorBuilder {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::Config(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| DetectorError::Config(format!("模型路径解码失败: {}", e)))?;
    let mut config = DetectorConfig::new(path.into_owned());

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "input" => config.input_shape = value.parse()?,
        "output" => config.output_shape = value.parse()?,
        "layout" => config.layout = value.parse()?,
        "format" => config.pixel_format = value.parse()?,
        "boxes" => config.box_units = value.parse()?,
        "labels" => config.labels_path = Some(PathBuf::from(value.as_ref())),
        other => warn!("忽略未知的模型参数: {}={}", other, value),
      }
    }

    Ok(Self { config })
  }
}

impl DetectorBuilder {
  pub fn new(config: DetectorConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn labels(mut self, path: impl Into<PathBuf>) -> Self {
    self.config.labels_path = Some(path.into());
    self
  }

  /// 加载标签表并加载模型，返回处于 `Loaded` 状态的检测器
  pub fn build<E: InferenceEngine>(
    self,
    engine: E,
  ) -> Result<Detector<E, Option<LabelTable>>, DetectorError> {
    let labels = self
      .config
      .labels_path
      .as_ref()
      .map(LabelTable::load)
      .transpose()?;
    let mut detector = Detector::new(self.config, engine, labels)?;
    detector.load()?;
    Ok(detector)
  }

  /// 引擎只输出原始检测头时使用，解码与 NMS 在本进程完成
  ///
  /// `YoloxDecoder` 输出的已是归一化坐标，不能再按像素坐标换算。
  pub fn build_raw_head<E: InferenceEngine>(
    self,
    engine: E,
    num_classes: usize,
  ) -> Result<Detector<HeadDecoding<E>, Option<LabelTable>>, DetectorError> {
    if self.config.box_units != BoxUnits::Normalized {
      return Err(DetectorError::Config(
        "原始检测头解码输出归一化坐标, 不能与 boxes=pixels 同时使用".to_string(),
      ));
    }
    let decoder = YoloxDecoder::new(self.config.input_shape, num_classes);
    self.build(HeadDecoding::new(engine, decoder))
  }
}
