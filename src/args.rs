// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Parser, ValueEnum};
use url::Url;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
  /// 单帧推理
  Oneshot,
  /// 同一帧重复推理，统计平均耗时
  Repeat,
  /// 逐帧推理直到输入结束或收到中断
  Continuous,
}

/// YOLOX 移动端检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolox:///models/yolox_nano.onnx?labels=/models/coco.txt
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 image:///data/frames?roi=0,0,1,1
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出地址: log://, jsonl:///path/result.jsonl 或 folder:///path/records
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  #[arg(long, value_enum, default_value_t = TaskKind::Continuous)]
  pub task: TaskKind,
  /// 连续任务的最大帧数
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
  /// 重复任务的推理次数
  #[arg(long, value_name = "COUNT", default_value_t = 1000)]
  pub repeat: usize,
  /// 引擎只输出原始检测头，由本进程完成解码与 NMS
  #[arg(long)]
  pub raw_head: bool,
  /// 原始检测头的类别数
  #[arg(long, value_name = "COUNT", default_value_t = 80)]
  pub num_classes: usize,
}
