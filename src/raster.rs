// 该文件是 Tianlin （田林） 项目的一部分。
// src/raster.rs - 栅格数据定义
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

use image::RgbImage;
use thiserror::Error;

use crate::georef::{AffineTransform, Crs};

mod geotiff;
pub use self::geotiff::{GeoTiff, GeoTiffError, GeoTiffInfo};

#[derive(Error, Debug)]
pub enum RasterError {
  #[error("GeoTIFF 不包含任何波段")]
  NoBands,
  #[error("GeoTIFF 未声明 nodata 值")]
  MissingNodata,
  #[error("GeoTIFF 缺少坐标参考系")]
  MissingCrs,
  #[error("坐标参考系 {0} 不受支持")]
  UnsupportedCrs(Crs),
  #[error("GeoTIFF 读取失败: {0}")]
  GeoTiff(#[from] GeoTiffError),
}

/// 有效像素掩膜，true 表示像素有效
///
/// 同时保存无效像素的积分图，任意矩形内的无效比例可在常数时间内求得。
#[derive(Debug, Clone)]
pub struct ValidityMask {
  width: u32,
  height: u32,
  valid: Vec<bool>,
  // (width + 1) * (height + 1)，首行首列为 0
  invalid_integral: Vec<u64>,
}

impl ValidityMask {
  pub fn from_fn(width: u32, height: u32, is_valid: impl Fn(u32, u32) -> bool) -> Self {
    let mut valid = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
      for x in 0..width {
        valid.push(is_valid(x, y));
      }
    }
    Self::from_vec(width, height, valid)
  }

  /// `valid` 为按行排列的 width * height 个元素
  pub fn from_vec(width: u32, height: u32, valid: Vec<bool>) -> Self {
    assert_eq!(
      valid.len(),
      width as usize * height as usize,
      "掩膜长度与尺寸不匹配"
    );
    let stride = width as usize + 1;
    let mut invalid_integral = vec![0u64; stride * (height as usize + 1)];
    for y in 0..height as usize {
      let mut row_sum = 0u64;
      for x in 0..width as usize {
        if !valid[y * width as usize + x] {
          row_sum += 1;
        }
        invalid_integral[(y + 1) * stride + x + 1] = invalid_integral[y * stride + x + 1] + row_sum;
      }
    }
    Self {
      width,
      height,
      valid,
      invalid_integral,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn is_valid(&self, x: u32, y: u32) -> bool {
    self.valid[y as usize * self.width as usize + x as usize]
  }

  /// 矩形 `[x1,x2) × [y1,y2)` 内的无效像素数，超出部分被裁剪
  pub fn invalid_count(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> u64 {
    let (x1, x2) = (x1.min(self.width) as usize, x2.min(self.width) as usize);
    let (y1, y2) = (y1.min(self.height) as usize, y2.min(self.height) as usize);
    if x2 <= x1 || y2 <= y1 {
      return 0;
    }
    let stride = self.width as usize + 1;
    let at = |x: usize, y: usize| self.invalid_integral[y * stride + x];
    at(x2, y2) + at(x1, y1) - at(x1, y2) - at(x2, y1)
  }

  /// 无效像素比例，空矩形返回 None
  pub fn invalid_fraction(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> Option<f64> {
    let w = x2.min(self.width).saturating_sub(x1) as u64;
    let h = y2.min(self.height).saturating_sub(y1) as u64;
    let area = w * h;
    if area == 0 {
      return None;
    }
    Some(self.invalid_count(x1, y1, x2, y2) as f64 / area as f64)
  }
}

/// 带地理参考的 RGB 影像，请求期间不可变
#[derive(Debug, Clone)]
pub struct GeoImage {
  pub image: RgbImage,
  pub transform: AffineTransform,
  pub crs: Option<Crs>,
  pub mask: Option<ValidityMask>,
}

impl GeoImage {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 单波段地类分类栅格
#[derive(Debug, Clone)]
pub struct ClassifiedRaster {
  pub width: u32,
  pub height: u32,
  /// 按行排列的分类值
  pub values: Vec<f64>,
  pub transform: AffineTransform,
  pub crs: Option<Crs>,
  pub nodata: f64,
}

impl ClassifiedRaster {
  pub fn value(&self, x: u32, y: u32) -> f64 {
    self.values[y as usize * self.width as usize + x as usize]
  }

  /// 像素值不等于 nodata 时有效；nodata 为 NaN 时 NaN 像素无效
  pub fn is_valid_value(&self, value: f64) -> bool {
    if self.nodata.is_nan() {
      !value.is_nan()
    } else {
      value != self.nodata
    }
  }

  pub fn validity_mask(&self) -> ValidityMask {
    let valid = self.values.iter().map(|&v| self.is_valid_value(v)).collect();
    ValidityMask::from_vec(self.width, self.height, valid)
  }
}
