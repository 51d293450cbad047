// 该文件是 Tianlin （田林） 项目的一部分。
// src/output/report.rs - 检测结果报告
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

use crate::detection::PixelBox;
use crate::georef::{Crs, GpsCoordinates};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeolocatedDetection {
  pub label: String,
  /// 裁剪到影像范围内的像素坐标
  pub coordinates: PixelBox,
  /// 边界框中心的经纬度
  pub gps_coordinates: GpsCoordinates,
  pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageSize {
  pub width: u32,
  pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportMetadata {
  pub crs: String,
  pub converted_to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
  pub detections: Vec<GeolocatedDetection>,
  pub image_size: ImageSize,
  pub metadata: ReportMetadata,
}

impl DetectionReport {
  pub fn new(detections: Vec<GeolocatedDetection>, width: u32, height: u32, source: Crs) -> Self {
    Self {
      detections,
      image_size: ImageSize { width, height },
      metadata: ReportMetadata {
        crs: source.to_string(),
        converted_to: Crs::WGS84.to_string(),
      },
    }
  }
}
