// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/main.rs - 检测程序入口
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use yolox_mobile::{
  Detector, DetectorBuilder, FromUrl, InferenceEngine, ResolveLabel,
  engine::NativeEngine,
  input::InputWrapper,
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, RepeatShotTask, Task},
};

use args::{Args, TaskKind};

fn run<E: InferenceEngine, R: ResolveLabel>(args: &Args, detector: &Detector<E, R>) -> Result<()> {
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  match args.task {
    TaskKind::Oneshot => OneShotTask.run_task(input, detector, &output),
    TaskKind::Repeat => RepeatShotTask::default()
      .with_times(args.repeat)
      .run_task(input, detector, &output),
    TaskKind::Continuous => ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .run_task(input, detector, &output),
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出地址: {}", args.output);

  let builder = DetectorBuilder::from_url(&args.model)?;
  let engine = NativeEngine::acquire()?;

  if args.raw_head {
    let detector = builder.build_raw_head(engine, args.num_classes)?;
    run(&args, &detector)
  } else {
    let detector = builder.build(engine)?;
    run(&args, &detector)
  }
}
