// 该文件是 Tianlin （田林） 项目的一部分。
// src/config.rs - 流水线配置
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const DEFAULT_TILE_SIZE: u32 = 640;
const DEFAULT_OVERLAP: f64 = 0.3;
const DEFAULT_MERGE_IOU: f32 = 0.4;
const DEFAULT_TILE_SKIP: f64 = 0.6;
const DEFAULT_DETECTION_DISCARD: f64 = 0.5;
const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 0.0001;
const DEFAULT_TREES_CODE: i64 = 2;
const DEFAULT_CROPS_CODE: i64 = 5;
const DEFAULT_MAX_UPLOAD_MB: u64 = 50;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("解析配置文件失败: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
}

impl ConfigError {
  fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
    ConfigError::Invalid {
      field,
      reason: reason.into(),
    }
  }
}

/// 切片参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
  /// 切片边长（像素）
  pub tile_size: u32,
  /// 相邻切片重叠比例，取值 [0, 1)
  pub overlap: f64,
}

impl Default for TilingConfig {
  fn default() -> Self {
    Self {
      tile_size: DEFAULT_TILE_SIZE,
      overlap: DEFAULT_OVERLAP,
    }
  }
}

/// 跨切片合并参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
  /// 合并用 IoU 阈值，通常低于模型内部的 NMS 阈值
  pub iou_threshold: f32,
  /// 仅在同类别之间抑制
  pub class_aware: bool,
}

impl Default for MergeConfig {
  fn default() -> Self {
    Self {
      iou_threshold: DEFAULT_MERGE_IOU,
      class_aware: false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodataConfig {
  pub tile_skip_threshold: f64,
  pub detection_discard_threshold: f64,
}

impl Default for NodataConfig {
  fn default() -> Self {
    Self {
      tile_skip_threshold: DEFAULT_TILE_SKIP,
      detection_discard_threshold: DEFAULT_DETECTION_DISCARD,
    }
  }
}

/// 地类到栅格分类值的映射
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandCoverCodes {
  pub trees: i64,
  pub crops: i64,
}

impl Default for LandCoverCodes {
  fn default() -> Self {
    Self {
      trees: DEFAULT_TREES_CODE,
      crops: DEFAULT_CROPS_CODE,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizeConfig {
  /// 简化容差（目标坐标系单位，WGS84 下为度）
  pub simplify_tolerance: f64,
  pub land_cover_codes: LandCoverCodes,
}

impl Default for VectorizeConfig {
  fn default() -> Self {
    Self {
      simplify_tolerance: DEFAULT_SIMPLIFY_TOLERANCE,
      land_cover_codes: LandCoverCodes::default(),
    }
  }
}

/// 流水线整体配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub tiling: TilingConfig,
  pub merge: MergeConfig,
  pub nodata: NodataConfig,
  pub vectorize: VectorizeConfig,
  /// 切片检测线程数，0 表示使用全部可用核心
  pub workers: usize,
  pub max_upload_mb: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      tiling: TilingConfig::default(),
      merge: MergeConfig::default(),
      nodata: NodataConfig::default(),
      vectorize: VectorizeConfig::default(),
      workers: 0,
      max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
    }
  }
}

fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
  if value.is_finite() && (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::invalid(field, format!("{} 不在 [0, 1] 范围内", value)))
  }
}

impl PipelineConfig {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let config: PipelineConfig = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.tiling.tile_size == 0 {
      return Err(ConfigError::invalid("tiling.tile_size", "必须大于 0"));
    }
    if !(self.tiling.overlap.is_finite() && (0.0..1.0).contains(&self.tiling.overlap)) {
      return Err(ConfigError::invalid(
        "tiling.overlap",
        format!("{} 不在 [0, 1) 范围内", self.tiling.overlap),
      ));
    }
    check_fraction("merge.iou_threshold", self.merge.iou_threshold as f64)?;
    check_fraction("nodata.tile_skip_threshold", self.nodata.tile_skip_threshold)?;
    check_fraction(
      "nodata.detection_discard_threshold",
      self.nodata.detection_discard_threshold,
    )?;
    let tolerance = self.vectorize.simplify_tolerance;
    if !(tolerance.is_finite() && tolerance >= 0.0) {
      return Err(ConfigError::invalid(
        "vectorize.simplify_tolerance",
        format!("{} 不是非负数", tolerance),
      ));
    }
    if self.max_upload_mb == 0 {
      return Err(ConfigError::invalid("max_upload_mb", "必须大于 0"));
    }
    Ok(())
  }

  pub fn max_upload_bytes(&self) -> u64 {
    self.max_upload_mb.saturating_mul(1024 * 1024)
  }

  /// 实际使用的工作线程数
  pub fn worker_count(&self) -> usize {
    if self.workers > 0 {
      self.workers
    } else {
      std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
    }
  }
}
