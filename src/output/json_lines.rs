// 该文件是 YoloxMobile （移动端目标检测） 项目的一部分。
// src/output/json_lines.rs - JSON Lines 输出
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
  fs::File,
  io::{BufWriter, Write},
  path::Path,
  sync::Mutex,
};

use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::Inference,
  input::InputFrame,
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("路径解码失败: {0}")]
  PathError(String),
  #[error("输出文件锁已损坏")]
  Poisoned,
}

/// 每帧一行 JSON 写入文件
pub struct JsonLinesOutput {
  writer: Mutex<BufWriter<File>>,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesOutputError::SchemeMismatch(
        url.scheme().to_string(),
      ));
    }
    let path = urlencoding::decode(url.path())
      .map_err(|e| JsonLinesOutputError::PathError(e.to_string()))?;
    Self::create(path.as_ref())
  }
}

impl JsonLinesOutput {
  pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, JsonLinesOutputError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    info!("JSON 输出文件: {}", path.display());
    Ok(Self {
      writer: Mutex::new(BufWriter::new(File::create(path)?)),
    })
  }
}

impl Render<InputFrame, Inference> for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_result(&self, frame: &InputFrame, result: &Inference) -> Result<(), Self::Error> {
    let detections: Vec<_> = result
      .detections
      .iter()
      .map(|det| {
        json!({
          "class": det.class_index,
          "label": det.label,
          "score": det.score,
          "bbox": det.bbox,
          "inverted": det.inverted,
        })
      })
      .collect();

    let record = json!({
      "index": frame.index,
      "source": frame.source.display().to_string(),
      "skipped": result.skipped.map(|reason| format!("{:?}", reason)),
      "timings": {
        "preprocess_ms": result.timings.preprocess_ms,
        "inference_ms": result.timings.inference_ms,
        "postprocess_ms": result.timings.postprocess_ms,
      },
      "engine_timings": {
        "preprocess_ms": result.engine_timings.preprocess_ms,
        "inference_ms": result.engine_timings.inference_ms,
        "postprocess_ms": result.engine_timings.postprocess_ms,
      },
      "detections": detections,
    });

    let mut writer = self
      .writer
      .lock()
      .map_err(|_| JsonLinesOutputError::Poisoned)?;
    serde_json::to_writer(&mut *writer, &record)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    decode::Detection,
    frame::{OwnedFrame, PixelFormat, RegionOfInterest},
  };

  #[test]
  fn writes_one_line_per_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/result.jsonl");
    let output = JsonLinesOutput::create(&path).unwrap();

    let frame = InputFrame {
      index: 3,
      source: "dog.jpg".into(),
      frame: OwnedFrame::new(vec![0; 4], 1, 1, PixelFormat::Bgra8).unwrap(),
      roi: RegionOfInterest::Full,
    };
    let result = Inference {
      detections: vec![Detection {
        class_index: 16,
        score: 0.5,
        bbox: [0.0, 0.25, 0.5, 0.75],
        label: Some("dog".to_string()),
        inverted: false,
      }],
      ..Inference::default()
    };
    output.render_result(&frame, &result).unwrap();
    output.render_result(&frame, &Inference::default()).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["index"], 3);
    assert_eq!(lines[0]["detections"][0]["label"], "dog");
    assert_eq!(lines[0]["detections"][0]["bbox"][1], 0.25);
    assert!(lines[1]["detections"].as_array().unwrap().is_empty());
  }

  #[test]
  fn url_path_is_percent_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("night run").join("result.jsonl");
    let url = Url::parse(&format!(
      "jsonl://{}/night%20run/result.jsonl",
      dir.path().display()
    ))
    .unwrap();

    JsonLinesOutput::from_url(&url).unwrap();
    assert!(target.exists());
  }
}
