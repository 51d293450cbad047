// 该文件是 Tianlin （田林） 项目的一部分。
// src/georef.rs - 像素坐标到地理坐标的转换
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

use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

/// WGS84 经纬度
pub const WGS84_EPSG: u16 = 4326;

#[derive(Error, Debug)]
pub enum GeorefError {
  #[error("影像缺少坐标参考系，无法计算地理坐标")]
  MissingCrs,
  #[error("坐标参考系 {0} 不受支持")]
  UnsupportedCrs(Crs),
  #[error("投影定义无效 {crs}: {reason}")]
  InvalidProjection { crs: Crs, reason: String },
  #[error("坐标转换失败 ({x}, {y}): {reason}")]
  TransformFailed { x: f64, y: f64, reason: String },
}

/// 以 EPSG 编码标识的坐标参考系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
  pub epsg: u16,
}

impl Crs {
  pub const WGS84: Crs = Crs { epsg: WGS84_EPSG };
  /// GeoKey 中的用户自定义坐标系（WKT 或参数化定义），无法转换
  pub const USER_DEFINED: Crs = Crs { epsg: 32767 };

  pub fn from_epsg(epsg: u16) -> Self {
    Self { epsg }
  }

  pub fn proj_string(&self) -> Option<&'static str> {
    crs_definitions::from_code(self.epsg).map(|def| def.proj4)
  }

  /// 经纬度坐标系（proj4rs 中以弧度计算）
  pub fn is_geographic(&self) -> bool {
    match self.proj_string() {
      Some(proj) => proj.contains("+proj=longlat"),
      None => self.epsg == WGS84_EPSG,
    }
  }

  fn to_proj(self) -> Result<Proj, GeorefError> {
    let proj_str = self.proj_string().ok_or(GeorefError::UnsupportedCrs(self))?;
    Proj::from_proj_string(proj_str).map_err(|e| GeorefError::InvalidProjection {
      crs: self,
      reason: format!("{:?}", e),
    })
  }
}

impl fmt::Display for Crs {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if *self == Crs::USER_DEFINED {
      f.write_str("用户自定义坐标系")
    } else {
      write!(f, "EPSG:{}", self.epsg)
    }
  }
}

impl Serialize for Crs {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

/// 像素 (列, 行) 到投影坐标的仿射变换
///
/// `x = a * col + b * row + c`，`y = d * col + e * row + f`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AffineTransform {
  pub a: f64,
  pub b: f64,
  pub c: f64,
  pub d: f64,
  pub e: f64,
  pub f: f64,
}

impl AffineTransform {
  pub const IDENTITY: AffineTransform = AffineTransform {
    a: 1.0,
    b: 0.0,
    c: 0.0,
    d: 0.0,
    e: 1.0,
    f: 0.0,
  };

  pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
    Self { a, b, c, d, e, f }
  }

  /// 北向上影像：左上角坐标与像元大小
  pub fn from_origin(west: f64, north: f64, pixel_width: f64, pixel_height: f64) -> Self {
    Self::new(pixel_width, 0.0, west, 0.0, -pixel_height, north)
  }

  pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
    (
      self.a * col + self.b * row + self.c,
      self.d * col + self.e * row + self.f,
    )
  }
}

/// 从源坐标系到 WGS84 的投影转换器，每个请求构造一次
pub struct CoordTransformer {
  source: Crs,
  source_proj: Proj,
  target_proj: Proj,
}

impl CoordTransformer {
  pub fn to_wgs84(source: Crs) -> Result<Self, GeorefError> {
    let source_proj = source.to_proj()?;
    let target_proj = Crs::WGS84.to_proj()?;
    debug!("构造坐标转换器: {} -> {}", source, Crs::WGS84);
    Ok(Self {
      source,
      source_proj,
      target_proj,
    })
  }

  pub fn source(&self) -> Crs {
    self.source
  }

  /// 返回 (lon, lat)，轴顺序始终为 x=经度, y=纬度
  pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), GeorefError> {
    if self.source == Crs::WGS84 {
      return Ok((x, y));
    }

    let mut point = if self.source.is_geographic() {
      (x.to_radians(), y.to_radians(), 0.0)
    } else {
      (x, y, 0.0)
    };

    transform(&self.source_proj, &self.target_proj, &mut point).map_err(|e| {
      GeorefError::TransformFailed {
        x,
        y,
        reason: format!("{:?}", e),
      }
    })?;

    let (lon, lat) = (point.0.to_degrees(), point.1.to_degrees());
    if !lon.is_finite() || !lat.is_finite() {
      return Err(GeorefError::TransformFailed {
        x,
        y,
        reason: "结果不是有限值".to_string(),
      });
    }
    Ok((lon, lat))
  }
}

/// GPS 坐标（EPSG:4326）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsCoordinates {
  pub lat: f64,
  pub lon: f64,
}

/// 组合仿射变换与投影转换
pub struct Georeferencer {
  affine: AffineTransform,
  transformer: CoordTransformer,
}

impl Georeferencer {
  pub fn new(affine: AffineTransform, crs: Option<Crs>) -> Result<Self, GeorefError> {
    let crs = crs.ok_or(GeorefError::MissingCrs)?;
    let transformer = CoordTransformer::to_wgs84(crs)?;
    Ok(Self {
      affine,
      transformer,
    })
  }

  pub fn crs(&self) -> Crs {
    self.transformer.source()
  }

  pub fn pixel_to_projected(&self, col: f64, row: f64) -> (f64, f64) {
    self.affine.apply(col, row)
  }

  pub fn pixel_to_gps(&self, col: f64, row: f64) -> Result<GpsCoordinates, GeorefError> {
    let (x, y) = self.pixel_to_projected(col, row);
    let (lon, lat) = self.transformer.transform(x, y)?;
    Ok(GpsCoordinates { lat, lon })
  }

  /// 像元中心的地理坐标
  pub fn pixel_center_to_gps(&self, col: f64, row: f64) -> Result<GpsCoordinates, GeorefError> {
    self.pixel_to_gps(col + 0.5, row + 0.5)
  }
}
