// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/engine/native.rs - 原生推理引擎 FFI 绑定
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
  ffi::{CString, c_char},
  path::Path,
  sync::atomic::{AtomicBool, Ordering},
};

use tracing::{debug, error, info};

use crate::{
  engine::{EngineError, InferenceEngine, Prediction, StageTimings},
  frame::{InputTensor, TensorShape},
};

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RawPrediction {
  data: *mut f32,
  len: u32,
  preprocess_time: f32,
  inference_time: f32,
  post_process_time: f32,
}

#[link(name = "wonnx_mobile")]
unsafe extern "C" {
  fn load_model(
    model_path: *const c_char,
    input_batch_size: u32,
    input_channels: u32,
    input_height: u32,
    input_width: u32,
    output_batch_size: u32,
    output_channels: u32,
    output_height: u32,
    output_width: u32,
  ) -> i32;

  fn predict(data: *mut f32, len: u32) -> RawPrediction;
}

// 原生库内部只有一个全局解释器
static CLAIMED: AtomicBool = AtomicBool::new(false);

/// 原生推理引擎，进程内同一时刻只允许存在一个实例
#[derive(Debug)]
pub struct NativeEngine {
  input_shape: Option<TensorShape>,
}

impl NativeEngine {
  pub fn acquire() -> Result<Self, EngineError> {
    CLAIMED
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .map_err(|_| EngineError::AlreadyClaimed)?;
    Ok(Self { input_shape: None })
  }
}

impl Drop for NativeEngine {
  fn drop(&mut self) {
    CLAIMED.store(false, Ordering::Release);
  }
}

fn shape_u32(shape: TensorShape) -> Result<[u32; 4], EngineError> {
  let mut dims = [0u32; 4];
  for (dst, src) in dims.iter_mut().zip(shape.dims()) {
    *dst = u32::try_from(src).map_err(|_| EngineError::ShapeOverflow(shape))?;
  }
  Ok(dims)
}

impl InferenceEngine for NativeEngine {
  fn load_model(
    &mut self,
    model_path: &Path,
    input_shape: TensorShape,
    output_shape: TensorShape,
  ) -> Result<(), EngineError> {
    let path = model_path
      .to_str()
      .ok_or_else(|| EngineError::ModelPath(model_path.display().to_string()))?;
    let c_path = CString::new(path).map_err(|e| EngineError::ModelPath(e.to_string()))?;
    let [in_n, in_c, in_h, in_w] = shape_u32(input_shape)?;
    let [out_n, out_c, out_h, out_w] = shape_u32(output_shape)?;

    info!("原生引擎加载模型: {}", path);
    // SAFETY: c_path 在调用期间有效且以 NUL 结尾
    let status = unsafe {
      load_model(
        c_path.as_ptr(),
        in_n,
        in_c,
        in_h,
        in_w,
        out_n,
        out_c,
        out_h,
        out_w,
      )
    };

    if status < 0 {
      error!("原生引擎加载模型失败，状态码: {}", status);
      return Err(EngineError::LoadFailed { status });
    }

    debug!("原生引擎加载完成，状态码: {}", status);
    self.input_shape = Some(input_shape);
    Ok(())
  }

  fn predict(&mut self, input: InputTensor) -> Result<Prediction, EngineError> {
    let expected = self.input_shape.ok_or(EngineError::NotLoaded)?.len();
    if input.len() != expected {
      return Err(EngineError::InputLength {
        expected,
        actual: input.len(),
      });
    }
    let len = u32::try_from(expected).map_err(|_| EngineError::ShapeOverflow(input.shape()))?;

    let mut data = input.into_vec();
    // SAFETY: data 长度恰为 len，调用期间不会被释放或移动
    let raw = unsafe { predict(data.as_mut_ptr(), len) };
    drop(data);

    let timings = StageTimings {
      preprocess_ms: raw.preprocess_time,
      inference_ms: raw.inference_time,
      postprocess_ms: raw.post_process_time,
    };
    // SAFETY: 引擎保证 raw.data 指向 raw.len 个 f32；此处立即复制，之后不再访问
    unsafe { Prediction::copy_from_raw(raw.data, raw.len as usize, timings) }
  }
}
