// 该文件是 Tianlin （田林） 项目的一部分。
// src/output/json_file.rs - JSON 结果文件
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use geojson::FeatureCollection;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::raster::GeoTiffInfo;
use crate::tiling::Tile;
use crate::{FromUrl, FromUrlWithScheme, output::Render, task::DetectionOutcome};

#[derive(Error, Debug)]
pub enum JsonFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// `json:///path/result.json[?pretty]`
pub struct JsonFileOutput {
  path: String,
  pretty: bool,
}

impl FromUrlWithScheme for JsonFileOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonFileOutput {
  type Error = JsonFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonFileError::SchemeMismatch);
    }

    let pretty = uri.query_pairs().any(|(k, _)| k == "pretty");

    Ok(JsonFileOutput {
      path: uri.path().to_string(),
      pretty,
    })
  }
}

impl JsonFileOutput {
  pub fn path(&self) -> &str {
    &self.path
  }

  fn write_json<T: Serialize>(&self, value: &T) -> Result<(), JsonFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(&self.path)?);
    if self.pretty {
      serde_json::to_writer_pretty(&mut writer, value)?;
    } else {
      serde_json::to_writer(&mut writer, value)?;
    }
    writer.flush()?;

    info!("写入结果到文件: {}", self.path);
    Ok(())
  }
}

impl Render<DetectionOutcome> for JsonFileOutput {
  type Error = JsonFileError;

  fn render_result(&self, result: &DetectionOutcome) -> Result<(), Self::Error> {
    self.write_json(&result.report)
  }
}

impl Render<FeatureCollection> for JsonFileOutput {
  type Error = JsonFileError;

  fn render_result(&self, result: &FeatureCollection) -> Result<(), Self::Error> {
    self.write_json(result)
  }
}

impl Render<GeoTiffInfo> for JsonFileOutput {
  type Error = JsonFileError;

  fn render_result(&self, result: &GeoTiffInfo) -> Result<(), Self::Error> {
    self.write_json(result)
  }
}

impl Render<Vec<Tile>> for JsonFileOutput {
  type Error = JsonFileError;

  fn render_result(&self, result: &Vec<Tile>) -> Result<(), Self::Error> {
    self.write_json(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn writes_tiles_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/tiles.json");
    let url = Url::parse(&format!("json://{}?pretty", path.display())).unwrap();
    let output = JsonFileOutput::from_url(&url).unwrap();
    assert!(output.pretty);

    let tiles = vec![Tile {
      x1: 0,
      y1: 0,
      x2: 10,
      y2: 10,
    }];
    output.render_result(&tiles).unwrap();

    let written: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written[0]["x2"], 10);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert!(matches!(
      JsonFileOutput::from_url(&url),
      Err(JsonFileError::SchemeMismatch)
    ));
  }
}
