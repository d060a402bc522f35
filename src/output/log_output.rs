// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::Inference,
  frame::Rect,
  input::InputFrame,
  output::{Render, display_name},
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 将检测结果写入日志，坐标按感兴趣区域换算到源帧像素
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(LogOutput)
  }
}

impl Render<InputFrame, Inference> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, frame: &InputFrame, result: &Inference) -> Result<(), Self::Error> {
    if let Some(reason) = result.skipped {
      warn!("第 {} 帧被跳过: {:?}", frame.index, reason);
      return Ok(());
    }

    info!(
      "第 {} 帧 ({}): 检测到 {} 个目标, 总耗时 {:.2} ms",
      frame.index,
      frame.source.display(),
      result.detections.len(),
      result.timings.total_ms()
    );
    let (width, height) = (frame.frame.width(), frame.frame.height());
    let region = frame
      .roi
      .resolve(width, height)
      .unwrap_or(Rect::new(0, 0, width, height));
    for det in &result.detections {
      let [x1, y1, x2, y2] = det.to_region(region);
      info!(
        "  - {}: {:.2}% at ({:.0}, {:.0}) - ({:.0}, {:.0})",
        display_name(det),
        det.score * 100.0,
        x1,
        y1,
        x2,
        y2
      );
    }
    Ok(())
  }
}
