// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/engine.rs - 推理引擎接口
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

use crate::frame::{InputTensor, TensorShape};

#[cfg(feature = "native")]
mod native;
#[cfg(feature = "native")]
pub use self::native::NativeEngine;

mod yolox;
pub use self::yolox::{HeadDecoding, YOLOX_STRIDES, YoloxDecoder};

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型路径无效: {0}")]
  ModelPath(String),
  #[error("模型加载失败，状态码: {status}")]
  LoadFailed { status: i32 },
  #[error("模型尚未加载")]
  NotLoaded,
  #[error("输入长度不匹配: 期望 {expected}, 实际 {actual}")]
  InputLength { expected: usize, actual: usize },
  #[error("输出形状不匹配: 期望 {expected} 个元素, 模型声明 {actual}")]
  OutputShape { expected: usize, actual: usize },
  #[error("张量形状超出 32 位范围: {0}")]
  ShapeOverflow(TensorShape),
  #[error("引擎返回空指针，声明长度 {len}")]
  NullBuffer { len: usize },
  #[error("原生引擎已被占用")]
  AlreadyClaimed,
  #[error("推理后端错误: {0}")]
  Backend(String),
}

/// 推理各阶段耗时（毫秒）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
  pub preprocess_ms: f32,
  pub inference_ms: f32,
  pub postprocess_ms: f32,
}

impl StageTimings {
  pub fn total_ms(&self) -> f32 {
    self.preprocess_ms + self.inference_ms + self.postprocess_ms
  }
}

/// 引擎输出，数据已复制到进程持有的内存中
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
  pub data: Vec<f32>,
  pub timings: StageTimings,
}

impl Prediction {
  /// 从引擎持有的缓冲区复制一份输出
  ///
  /// # Safety
  ///
  /// `len > 0` 时 `data` 必须指向至少 `len` 个有效且已初始化的 `f32`，
  /// 并在本函数返回前保持有效。
  pub unsafe fn copy_from_raw(
    data: *const f32,
    len: usize,
    timings: StageTimings,
  ) -> Result<Self, EngineError> {
    if len == 0 {
      return Ok(Self {
        data: Vec::new(),
        timings,
      });
    }
    if data.is_null() {
      return Err(EngineError::NullBuffer { len });
    }

    // SAFETY: 由调用方保证指针与长度有效；复制完成后不再持有该指针
    let data = unsafe { std::slice::from_raw_parts(data, len) }.to_vec();
    Ok(Self { data, timings })
  }
}

/// 推理引擎
///
/// 必须先成功调用 `load_model` 才能调用 `predict`；`predict` 为同步阻塞调用。
pub trait InferenceEngine {
  fn load_model(
    &mut self,
    model_path: &Path,
    input_shape: TensorShape,
    output_shape: TensorShape,
  ) -> Result<(), EngineError>;

  fn predict(&mut self, input: InputTensor) -> Result<Prediction, EngineError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
  fn load_model(
    &mut self,
    model_path: &Path,
    input_shape: TensorShape,
    output_shape: TensorShape,
  ) -> Result<(), EngineError> {
    (**self).load_model(model_path, input_shape, output_shape)
  }

  fn predict(&mut self, input: InputTensor) -> Result<Prediction, EngineError> {
    (**self).predict(input)
  }
}
