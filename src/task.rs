// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/task.rs - 推理任务
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
  thread,
  time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{
  detector::{Detector, DetectorError, Inference},
  engine::InferenceEngine,
  input::InputFrame,
  label::ResolveLabel,
  output::Render,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: &M, output: &O) -> Result<(), Self::Error>;
}

fn infer_frame<E: InferenceEngine, R: ResolveLabel>(
  detector: &Detector<E, R>,
  frame: &InputFrame,
) -> Result<Inference, DetectorError> {
  detector.infer(&frame.frame.as_raw(), &frame.roi)
}

pub struct OneShotTask;

impl<E, R, RE, I, O> Task<I, Detector<E, R>, O> for OneShotTask
where
  E: InferenceEngine,
  R: ResolveLabel,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = InputFrame>,
  O: Render<InputFrame, Inference, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &Detector<E, R>, output: &O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = infer_frame(model, &frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复推理，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times;
    self
  }
}

impl<E, R, RE, I, O> Task<I, Detector<E, R>, O> for RepeatShotTask
where
  E: InferenceEngine,
  R: ResolveLabel,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = InputFrame>,
  O: Render<InputFrame, Inference, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &Detector<E, R>, output: &O) -> Result<(), Self::Error> {
    // 前两次用于预热，不计入平均
    const WARMUP: usize = 2;

    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.times);
    let mut engine_ms = 0.0f32;
    for i in 0..self.times {
      let now = Instant::now();
      let result = infer_frame(model, &frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      if i >= WARMUP {
        engine_ms += result.engine_timings.total_ms();
      }
      times.push(elapsed);
    }

    if times.len() > WARMUP {
      let counted = (times.len() - WARMUP) as u32;
      warn!(
        "平均推理时间: {:.2?}, 引擎上报平均 {:.2} ms",
        times.iter().skip(WARMUP).sum::<Duration>() / counted,
        engine_ms / counted as f32
      );
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<E, R, RE, I, O> Task<I, Detector<E, R>, O> for ContinuousTask
where
  E: InferenceEngine,
  R: ResolveLabel,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = InputFrame>,
  O: Render<InputFrame, Inference, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: &Detector<E, R>, output: &O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_count = 0usize;
    let mut skipped = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_count += 1;
      info!("处理第 {} 帧图像", frame_count);
      let result = infer_frame(model, &frame)?;
      if result.skipped.is_some() {
        skipped += 1;
      }
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_count >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_count);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共 {} 帧，跳过 {} 帧", frame_count, skipped);
    Ok(())
  }
}
