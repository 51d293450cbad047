// 该文件是 Tianlin （田林） 项目的一部分。
// src/output.rs - 输出定义
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

use geojson::FeatureCollection;
use thiserror::Error;
use url::Url;

use crate::task::DetectionOutcome;
use crate::{FromUrl, FromUrlWithScheme};

pub trait Render<Output>: Sized {
  type Error;
  fn render_result(&self, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;
pub mod report;

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

mod json_file;
pub use self::json_file::{JsonFileError, JsonFileOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("写入 JSON 文件错误: {0}")]
  JsonFileError(#[from] JsonFileError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("输出方式 '{0}' 不支持该结果")]
  Unsupported(&'static str),
}

pub enum OutputWrapper {
  SaveImageFileOutput(SaveImageFileOutput),
  JsonFileOutput(JsonFileOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      JsonFileOutput::SCHEME => {
        let output = JsonFileOutput::from_url(url)?;
        Ok(OutputWrapper::JsonFileOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<DetectionOutcome> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, result: &DetectionOutcome) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => {
        output.render_result(result).map_err(OutputError::from)
      }
      OutputWrapper::JsonFileOutput(output) => output.render_result(result).map_err(OutputError::from),
    }
  }
}

impl Render<FeatureCollection> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, result: &FeatureCollection) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFileOutput(_) => {
        Err(OutputError::Unsupported(SaveImageFileOutput::SCHEME))
      }
      OutputWrapper::JsonFileOutput(output) => output.render_result(result).map_err(OutputError::from),
    }
  }
}
