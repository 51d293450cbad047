// 该文件是 Tianlin （田林） 项目的一部分。
// src/error.rs - 错误分类
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

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::georef::GeorefError;
use crate::model::DetectorError;
use crate::raster::RasterError;
use crate::tiling::TilingError;
use crate::vectorize::NoFeaturesFound;

/// 调用方输入错误，不进行任何处理
#[derive(Error, Debug)]
pub enum InputError {
  #[error("未上传文件")]
  MissingFile,
  #[error("输入方式不匹配: {0}")]
  SchemeMismatch(String),
  #[error("只接受 GeoTIFF (.tif 或 .tiff) 文件: {0}")]
  UnsupportedExtension(String),
  #[error("文件大小超过 {limit_mb} MB 限制")]
  FileTooLarge { limit_mb: u64 },
  #[error("无效的地类 '{0}'，必须为 'trees' 或 'crops'")]
  InvalidLandType(String),
  #[error("阈值 {name} = {value} 不在 [0, 1] 范围内")]
  InvalidThreshold { name: &'static str, value: f32 },
  #[error("无效的模型 '{0}'")]
  UnknownModel(String),
  #[error("暂存上传文件失败: {0}")]
  Staging(#[from] std::io::Error),
}

/// 切片、检测、合并、地理定位或矢量化过程中的意外失败
#[derive(Error, Debug)]
pub enum ProcessingError {
  #[error("配置无效: {0}")]
  Config(#[from] ConfigError),
  #[error("切片规划失败: {0}")]
  Tiling(#[from] TilingError),
  #[error("地理定位失败: {0}")]
  Georef(#[from] GeorefError),
  #[error("模型推理失败: {0}")]
  Detector(#[from] DetectorError),
  #[error("线程池创建失败: {0}")]
  ThreadPool(#[from] rayon::ThreadPoolBuildError),
  #[error("{0}")]
  Other(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error(transparent)]
  Input(#[from] InputError),
  #[error(transparent)]
  Raster(#[from] RasterError),
  #[error("模型 '{selector}' 未加载: {reason}")]
  ModelUnavailable { selector: String, reason: String },
  #[error("在提供的 GeoTIFF 中未检测到 {land_type}")]
  NoFeaturesFound { land_type: String },
  #[error(transparent)]
  Processing(#[from] ProcessingError),
  #[error("请求已取消")]
  Cancelled,
}

impl From<GeorefError> for PipelineError {
  fn from(err: GeorefError) -> Self {
    match err {
      GeorefError::MissingCrs => PipelineError::Raster(RasterError::MissingCrs),
      GeorefError::UnsupportedCrs(crs) => PipelineError::Raster(RasterError::UnsupportedCrs(crs)),
      other => PipelineError::Processing(ProcessingError::Georef(other)),
    }
  }
}

impl From<NoFeaturesFound> for PipelineError {
  fn from(err: NoFeaturesFound) -> Self {
    PipelineError::NoFeaturesFound {
      land_type: err.land_type.to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  InputError,
  RasterError,
  ModelUnavailable,
  NoFeaturesFound,
  ProcessingError,
  Cancelled,
}

/// 对外的结构化失败信息，只包含类别与可读原因
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
  pub kind: FailureKind,
  pub message: String,
}

impl PipelineError {
  pub fn kind(&self) -> FailureKind {
    match self {
      PipelineError::Input(_) => FailureKind::InputError,
      PipelineError::Raster(_) => FailureKind::RasterError,
      PipelineError::ModelUnavailable { .. } => FailureKind::ModelUnavailable,
      PipelineError::NoFeaturesFound { .. } => FailureKind::NoFeaturesFound,
      PipelineError::Processing(_) => FailureKind::ProcessingError,
      PipelineError::Cancelled => FailureKind::Cancelled,
    }
  }

  pub fn failure(&self) -> Failure {
    Failure {
      kind: self.kind(),
      message: self.to_string(),
    }
  }
}
